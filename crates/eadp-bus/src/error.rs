//! Bus transport errors.

use thiserror::Error;

/// Errors raised by bus transports and connections.
#[derive(Error, Debug)]
pub enum BusError {
    /// Underlying socket failure
    #[error("Bus I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer closed the connection
    #[error("Bus connection closed")]
    ConnectionClosed,

    /// Connecting took too long
    #[error("Timed out connecting to {endpoint}")]
    ConnectTimeout { endpoint: String },

    /// Peer answered with a message of the wrong type
    #[error("Unexpected bus message type {got:#06x} (expected {expected:#06x})")]
    UnexpectedMessage { expected: u16, got: u16 },

    /// Message too short for its type
    #[error("Bus message too short: {len} bytes (min: {min})")]
    MessageTooShort { len: usize, min: usize },

    /// Group operation before `open_group_socket`
    #[error("Group socket not open")]
    NotOpen,

    /// Bus URL could not be understood
    #[error("Invalid bus URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl BusError {
    /// Returns true if the connection is unusable and must be re-established.
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::ConnectionClosed | Self::ConnectTimeout { .. } | Self::NotOpen
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_lost_classification() {
        assert!(BusError::ConnectionClosed.is_connection_lost());
        assert!(BusError::Io(std::io::Error::other("reset")).is_connection_lost());
        assert!(!BusError::MessageTooShort { len: 3, min: 6 }.is_connection_lost());
        assert!(!BusError::UnexpectedMessage {
            expected: 0x27,
            got: 0x26
        }
        .is_connection_lost());
    }
}
