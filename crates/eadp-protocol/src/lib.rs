//! EADP Protocol - Line protocol spoken between clients and the gateway
//!
//! This crate provides command validation and reply formatting for the
//! `EADP/0.1` text protocol. Every client line is validated in two phases:
//! the generic shape (`XX payload`) first, then the grammar of its kind.

pub mod command;
pub mod policy;
pub mod reply;
pub mod version;

pub use command::{is_well_formed, split_envelope, Command, CommandError, Envelope};
pub use policy::{is_policy_request, normalize_policy, DEFAULT_POLICY};
pub use reply::{ack_code, ErrorCode, Reply, END_OF_RESPONSE};
pub use version::ProtocolVersion;

/// Literal line that ends a session.
pub const QUIT: &str = "quit";
