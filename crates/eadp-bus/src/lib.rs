//! EADP Bus - KNX bus transports
//!
//! This crate abstracts the bus behind two traits so the gateway daemons
//! never depend on a concrete transport:
//! - `BusTransport` - creates connections (one per daemon per session)
//! - `BusConnection` - group-communication socket on one connection
//!
//! Implementations:
//! - `eibd` - eibd/knxd client protocol over TCP or a Unix socket
//! - `sim` - in-process simulated bus for development and tests
//!
//! # Bus URLs
//!
//! | URL                  | Transport                          |
//! |----------------------|------------------------------------|
//! | `ip:host[:port]`     | eibd over TCP (default port 6720)  |
//! | `local:/path/socket` | eibd over a Unix socket            |
//! | `sim:`               | fresh simulated bus                |

pub mod eibd;
pub mod error;
pub mod sim;

use std::sync::Arc;

use async_trait::async_trait;
use eadp_core::GroupAddress;

pub use eibd::{EibdEndpoint, EibdTransport, DEFAULT_EIBD_PORT};
pub use error::BusError;
pub use sim::SimulatedBus;

/// One group telegram as delivered by the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupPacket {
    /// Raw source physical address
    pub src: u16,

    /// Raw destination group address
    pub dest: u16,

    /// APDU bytes, header included
    pub apdu: Vec<u8>,
}

/// Factory for bus connections.
#[async_trait]
pub trait BusTransport: Send + Sync {
    /// Opens a new connection to the bus.
    async fn connect(&self) -> Result<Box<dyn BusConnection>, BusError>;

    /// Human-readable endpoint, for logs.
    fn describe(&self) -> String;
}

/// A connection carrying group communication.
#[async_trait]
pub trait BusConnection: Send {
    /// Switches the connection into group mode.
    ///
    /// A write-only socket never receives telegrams.
    async fn open_group_socket(&mut self, write_only: bool) -> Result<(), BusError>;

    /// Sends one APDU to a group.
    async fn send_group(&mut self, dest: GroupAddress, apdu: &[u8]) -> Result<(), BusError>;

    /// Waits for the next group telegram.
    async fn recv_group(&mut self) -> Result<GroupPacket, BusError>;

    /// Closes the connection.
    async fn close(&mut self) -> Result<(), BusError>;
}

/// Builds the transport named by a bus URL.
///
/// # Errors
///
/// `BusError::InvalidUrl` for unknown schemes or unparseable endpoints.
pub fn transport_from_url(url: &str) -> Result<Arc<dyn BusTransport>, BusError> {
    if url.starts_with("sim:") {
        return Ok(Arc::new(SimulatedBus::new()));
    }

    let endpoint = EibdEndpoint::parse(url)?;
    Ok(Arc::new(EibdTransport::new(endpoint)))
}
