//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors raised by the telegram codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Group address text could not be packed into 16 bits
    #[error("Invalid group address: {address} ({reason})")]
    InvalidGroupAddress { address: String, reason: String },

    /// Physical address text could not be packed into 16 bits
    #[error("Invalid physical address: {address} ({reason})")]
    InvalidPhysicalAddress { address: String, reason: String },

    /// Bus frame shorter than the two APDU header bytes
    #[error("Frame too short: {len} bytes (min: 2)")]
    FrameTooShort { len: usize },

    /// Header bits do not describe a group read, response or write
    #[error("Unknown APDU: {byte0:#04x} {byte1:#04x}")]
    UnknownApdu { byte0: u8, byte1: u8 },

    /// Write value is neither an integer nor a byte sequence
    #[error("Unsupported value encoding: {value:?}")]
    UnsupportedValueEncoding { value: String },
}

/// Errors raised while building or decomposing tasks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Header does not name a known command
    #[error("Unknown command header: {header:?}")]
    UnknownHeader { header: String },

    /// Command carries no targets
    #[error("Command has no targets: {raw:?}")]
    EmptyBody { raw: String },

    /// A comma-separated target is empty or malformed
    #[error("Invalid target {item:?} in command {raw:?}")]
    InvalidTarget { raw: String, item: String },
}
