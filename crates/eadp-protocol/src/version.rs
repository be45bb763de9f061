//! Protocol versioning for the login handshake.

use std::fmt;
use thiserror::Error;

/// Protocol name announced in the handshake.
pub const PROTOCOL_NAME: &str = "EADP";

/// Protocol version announced by clients, e.g. `EADP/0.1`.
///
/// Uses `major.minor`:
/// - Major version bump: breaking changes, incompatible
/// - Minor version bump: additive changes, backward compatible
/// - While major is 0, every minor bump is breaking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

impl ProtocolVersion {
    /// Current protocol version.
    pub const CURRENT: ProtocolVersion = ProtocolVersion { major: 0, minor: 1 };

    /// Creates a new ProtocolVersion.
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// Parses a version string like `EADP/0.1`.
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let invalid = || VersionError::InvalidFormat(s.to_string());

        let number = s
            .strip_prefix(PROTOCOL_NAME)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(invalid)?;

        let (major, minor) = number.split_once('.').ok_or_else(invalid)?;
        let digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
        if !digits(major) || !digits(minor) {
            return Err(invalid());
        }

        Ok(Self {
            major: major.parse().map_err(|_| invalid())?,
            minor: minor.parse().map_err(|_| invalid())?,
        })
    }

    /// Returns true if this version is compatible with another.
    ///
    /// Compatibility rules:
    /// - Major versions must match
    /// - For major 0, minor versions must match too
    pub fn is_compatible_with(&self, other: &ProtocolVersion) -> bool {
        if self.major == 0 {
            return self == other;
        }
        self.major == other.major
    }

    /// Checks that this version can talk to `expected`.
    ///
    /// # Errors
    ///
    /// `VersionError::Incompatible` naming both versions.
    pub fn ensure_compatible(&self, expected: &ProtocolVersion) -> Result<(), VersionError> {
        if self.is_compatible_with(expected) {
            Ok(())
        } else {
            Err(VersionError::Incompatible {
                got: *self,
                expected: *expected,
            })
        }
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}.{}", PROTOCOL_NAME, self.major, self.minor)
    }
}

/// Errors that can occur with version handling.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("Invalid version format: {0}")]
    InvalidFormat(String),

    #[error("Incompatible version: got {got}, expected {expected}")]
    Incompatible {
        got: ProtocolVersion,
        expected: ProtocolVersion,
    },
}
