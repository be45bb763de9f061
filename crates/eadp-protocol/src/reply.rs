//! Server-to-client reply lines.
//!
//! Every reply renders to its exact wire form through `Display`, trailing
//! newline included, so callers write `reply.to_string()` verbatim.

use std::fmt;

use eadp_core::{CommandKind, GroupAddress};

/// Marker that ends a multi-line response.
pub const END_OF_RESPONSE: &str = "aE";

/// Error header prefix.
const ERROR_HEADER: &str = "nE";

/// Connect banner header.
const BANNER_HEADER: &str = "cE";

/// Returns the acknowledgement header for a command kind.
pub const fn ack_code(kind: CommandKind) -> &'static str {
    match kind {
        CommandKind::Helo => "aH",
        CommandKind::Read => "dE",
        CommandKind::Send => "sE",
        CommandKind::Watch | CommandKind::Unwatch => "eE",
        CommandKind::Bye => "qE",
    }
}

// ============================================================================
// Error Codes
// ============================================================================

/// Protocol error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// E13: command sent before login
    PermissionDenied,
    /// E22: malformed or unknown command
    InvalidArgument,
}

impl ErrorCode {
    /// Returns the wire code, e.g. `E13`.
    pub const fn code(self) -> &'static str {
        match self {
            Self::PermissionDenied => "E13",
            Self::InvalidArgument => "E22",
        }
    }

    /// Returns the human-readable message.
    pub const fn message(self) -> &'static str {
        match self {
            Self::PermissionDenied => "Permission denied",
            Self::InvalidArgument => "Invalid argument",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ============================================================================
// Replies
// ============================================================================

/// One reply sent to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Login accepted: `aH <name>`
    Welcome { name: String },

    /// Direct answer to bus activity: `dE <group>=<value>` then `aE`
    Value { group: GroupAddress, value: String },

    /// Unsolicited watch fan-out: `dE <group>=<value>`
    Notification { group: GroupAddress, value: String },

    /// Bare end-of-response marker
    EndOfResponse,

    /// Session is closing: `qE <name>`
    Bye { name: String },

    /// Greeting sent on accept: `cE <text>`
    Banner { text: String },

    /// Error line quoting the offending command
    Error { code: ErrorCode, command: String },

    /// Cross-domain policy document, sent as-is
    Policy { document: String },
}

impl Reply {
    /// E13 for `command`.
    pub fn permission_denied(command: impl Into<String>) -> Self {
        Self::Error {
            code: ErrorCode::PermissionDenied,
            command: command.into(),
        }
    }

    /// E22 for `command`.
    pub fn invalid_argument(command: impl Into<String>) -> Self {
        Self::Error {
            code: ErrorCode::InvalidArgument,
            command: command.into(),
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Welcome { name } => writeln!(f, "{} {name}", ack_code(CommandKind::Helo)),
            Self::Value { group, value } => {
                writeln!(f, "{} {group}={value}", ack_code(CommandKind::Read))?;
                writeln!(f, "{END_OF_RESPONSE}")
            }
            Self::Notification { group, value } => {
                writeln!(f, "{} {group}={value}", ack_code(CommandKind::Read))
            }
            Self::EndOfResponse => writeln!(f, "{END_OF_RESPONSE}"),
            Self::Bye { name } => writeln!(f, "{} {name}", ack_code(CommandKind::Bye)),
            Self::Banner { text } => writeln!(f, "{BANNER_HEADER} {text}"),
            Self::Error { code, command } => writeln!(
                f,
                "{ERROR_HEADER} {code}, \"{command}: {}\"",
                code.message()
            ),
            Self::Policy { document } => write!(f, "{document}"),
        }
    }
}
