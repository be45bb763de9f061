//! EADP Core - Shared types for the KNX gateway
//!
//! This crate provides the domain types shared between the protocol
//! codec, the bus transports and the gateway daemon (eadpd):
//! - `address` - group and physical address packing/unpacking
//! - `apdu` - APDU flag decoding, value formatting and frame builders
//! - `task` - atomic bus operations and command decomposition
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod address;
pub mod apdu;
pub mod error;
pub mod task;

// Re-exports for convenience
pub use address::{GroupAddress, PhysicalAddress};
pub use apdu::{format_value, parse_hex_value, read_apdu, write_apdu, ApduKind, Telegram};
pub use error::{CodecError, TaskError};
pub use task::{BusOp, CommandKind, Task, TaskId};
