//! Client command grammar.
//!
//! | Header | Kind    | Payload                              |
//! |--------|---------|--------------------------------------|
//! | `CH`   | helo    | `<name>,EADP/0.1`                    |
//! | `RE`   | read    | `<addr>[,<addr>...]`                 |
//! | `SE`   | send    | `<addr>=<value>[,<addr>=<value>...]` |
//! | `WE`   | watch   | `<addr>[,<addr>...]`                 |
//! | `UE`   | unwatch | `<addr>[,<addr>...]`                 |
//! | `QE`   | bye     | anything                             |
//!
//! `<addr>` is one to three `/`-separated groups of 1-3 digits that must
//! also pack into a 16-bit group address. `<value>` is alphanumeric.

use eadp_core::{CommandKind, GroupAddress};
use thiserror::Error;

use crate::version::ProtocolVersion;

/// Maximum digits per address level.
const MAX_LEVEL_DIGITS: usize = 3;

/// Maximum levels per address.
const MAX_LEVELS: usize = 3;

// ============================================================================
// Generic Shape
// ============================================================================

/// A line that passed generic validation: `XX payload`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope<'a> {
    /// Two uppercase ASCII letters
    pub header: &'a str,

    /// Non-empty remainder after the separating whitespace
    pub payload: &'a str,
}

impl Envelope<'_> {
    /// Command kind named by the header, if known.
    pub fn kind(&self) -> Option<CommandKind> {
        CommandKind::from_header(self.header)
    }
}

/// Checks the generic command shape and splits header from payload.
///
/// # Errors
///
/// `CommandError::InvalidArgument` unless the line is two uppercase letters, one
/// whitespace character and a non-empty payload.
pub fn split_envelope(line: &str) -> Result<Envelope<'_>, CommandError> {
    let malformed = |reason: &str| CommandError::InvalidArgument {
        command: line.to_string(),
        reason: reason.to_string(),
    };

    let header = line.get(..2).ok_or_else(|| malformed("missing header"))?;
    if !header.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(malformed("header must be two uppercase letters"));
    }

    let rest = line.get(2..).unwrap_or_default();
    let mut chars = rest.chars();
    match chars.next() {
        Some(c) if c.is_whitespace() => {}
        _ => return Err(malformed("header must be followed by whitespace")),
    }

    let payload = chars.as_str();
    if payload.is_empty() {
        return Err(malformed("empty payload"));
    }

    Ok(Envelope { header, payload })
}

/// Returns true if the line has the generic command shape.
pub fn is_well_formed(line: &str) -> bool {
    split_envelope(line).is_ok()
}

// ============================================================================
// Commands
// ============================================================================

/// A fully validated client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Login handshake
    Helo {
        /// Name the client announces
        name: String,
        /// Protocol version the client speaks
        version: ProtocolVersion,
    },

    /// Read group values
    Read { targets: Vec<GroupAddress> },

    /// Write group values
    Send {
        /// Targets with their undecoded values
        targets: Vec<(GroupAddress, String)>,
    },

    /// Subscribe to group values
    Watch { targets: Vec<GroupAddress> },

    /// Unsubscribe from group values
    Unwatch { targets: Vec<GroupAddress> },

    /// Leave the session
    Bye,
}

impl Command {
    /// Parses a trimmed client line.
    ///
    /// # Errors
    ///
    /// - `CommandError::InvalidArgument` if the generic shape or the kind's grammar
    ///   does not match
    /// - `CommandError::UnknownCommand` if the header names no command
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let envelope = split_envelope(line)?;
        let kind = envelope.kind().ok_or_else(|| CommandError::UnknownCommand {
            command: line.to_string(),
            header: envelope.header.to_string(),
        })?;

        let malformed = |reason: &str| CommandError::InvalidArgument {
            command: line.to_string(),
            reason: reason.to_string(),
        };

        let payload = envelope.payload;
        match kind {
            CommandKind::Helo => {
                let (name, version) = parse_helo(payload).map_err(|reason| malformed(&reason))?;
                Ok(Self::Helo { name, version })
            }
            CommandKind::Read => Ok(Self::Read {
                targets: parse_address_list(payload)
                    .ok_or_else(|| malformed("invalid address list"))?,
            }),
            CommandKind::Watch => Ok(Self::Watch {
                targets: parse_address_list(payload)
                    .ok_or_else(|| malformed("invalid address list"))?,
            }),
            CommandKind::Unwatch => Ok(Self::Unwatch {
                targets: parse_address_list(payload)
                    .ok_or_else(|| malformed("invalid address list"))?,
            }),
            CommandKind::Send => Ok(Self::Send {
                targets: parse_assignment_list(payload)
                    .ok_or_else(|| malformed("invalid address=value list"))?,
            }),
            CommandKind::Bye => Ok(Self::Bye),
        }
    }

    /// Returns the command kind.
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Helo { .. } => CommandKind::Helo,
            Self::Read { .. } => CommandKind::Read,
            Self::Send { .. } => CommandKind::Send,
            Self::Watch { .. } => CommandKind::Watch,
            Self::Unwatch { .. } => CommandKind::Unwatch,
            Self::Bye => CommandKind::Bye,
        }
    }
}

/// Parses `<name>,EADP/0.1`, tolerating one space after the comma.
fn parse_helo(payload: &str) -> Result<(String, ProtocolVersion), String> {
    let usage = || "expected <name>,EADP/0.1".to_string();

    let (name, version) = payload.split_once(',').ok_or_else(usage)?;
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
        return Err(usage());
    }

    let version = version.strip_prefix(' ').unwrap_or(version);
    let version = ProtocolVersion::parse(version).map_err(|e| e.to_string())?;
    version
        .ensure_compatible(&ProtocolVersion::CURRENT)
        .map_err(|e| e.to_string())?;

    Ok((name.to_string(), version))
}

/// Parses one address: 1-3 levels of 1-3 digits, packable into 16 bits.
fn parse_address(text: &str) -> Option<GroupAddress> {
    let levels: Vec<&str> = text.split('/').collect();
    if levels.len() > MAX_LEVELS {
        return None;
    }

    let well_formed = levels.iter().all(|level| {
        !level.is_empty()
            && level.len() <= MAX_LEVEL_DIGITS
            && level.bytes().all(|b| b.is_ascii_digit())
    });
    if !well_formed {
        return None;
    }

    text.parse().ok()
}

fn parse_address_list(payload: &str) -> Option<Vec<GroupAddress>> {
    payload.split(',').map(parse_address).collect()
}

fn parse_assignment_list(payload: &str) -> Option<Vec<(GroupAddress, String)>> {
    payload
        .split(',')
        .map(|item| {
            let (address, value) = item.split_once('=')?;
            if value.is_empty() || !value.bytes().all(|b| b.is_ascii_alphanumeric()) {
                return None;
            }
            Some((parse_address(address)?, value.to_string()))
        })
        .collect()
}

// ============================================================================
// Errors
// ============================================================================

/// Errors produced while validating a client line.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Generic shape or per-kind grammar mismatch (E22)
    #[error("Malformed command {command:?}: {reason}")]
    InvalidArgument { command: String, reason: String },

    /// Well-formed line with an unknown header (E22)
    #[error("Unknown command {header:?} in {command:?}")]
    UnknownCommand { command: String, header: String },

    /// Well-formed command sent before login (E13)
    #[error("Permission denied for {command:?}: not logged in")]
    PermissionDenied { command: String },
}

impl CommandError {
    /// The client line that caused the error.
    pub fn command(&self) -> &str {
        match self {
            Self::InvalidArgument { command, .. }
            | Self::UnknownCommand { command, .. }
            | Self::PermissionDenied { command } => command,
        }
    }
}
