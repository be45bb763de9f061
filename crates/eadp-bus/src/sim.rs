//! In-process simulated bus.
//!
//! Behaves like a bus with one cooperative device per group address:
//! - a write stores the value and is seen by every connection
//! - a read is seen by every connection and, if the group has a value,
//!   answered with a response telegram
//!
//! All connections of one `SimulatedBus` share the same value store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use eadp_core::apdu::APCI_MASK;
use eadp_core::{ApduKind, GroupAddress, PhysicalAddress};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

use crate::{BusConnection, BusError, BusTransport, GroupPacket};

/// Telegram buffer per connection.
const CHANNEL_CAPACITY: usize = 256;

/// Source address of telegrams sent through the gateway (1.1.255).
pub const GATEWAY_ADDRESS: PhysicalAddress = PhysicalAddress::from_raw(0x11FF);

/// Source address of simulated device responses (1.1.1).
pub const DEVICE_ADDRESS: PhysicalAddress = PhysicalAddress::from_raw(0x1101);

struct SimState {
    /// Last written APDU per group, header included
    values: RwLock<HashMap<GroupAddress, Vec<u8>>>,
    telegrams: broadcast::Sender<GroupPacket>,
}

/// Simulated bus; cheap to clone, clones share state.
#[derive(Clone)]
pub struct SimulatedBus {
    state: Arc<SimState>,
}

impl SimulatedBus {
    pub fn new() -> Self {
        let (telegrams, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            state: Arc::new(SimState {
                values: RwLock::new(HashMap::new()),
                telegrams,
            }),
        }
    }

    /// Sets a group's value without emitting a telegram.
    pub async fn seed(&self, group: GroupAddress, apdu: Vec<u8>) {
        self.state.values.write().await.insert(group, apdu);
    }

    /// Returns the last APDU written to a group.
    pub async fn value(&self, group: GroupAddress) -> Option<Vec<u8>> {
        self.state.values.read().await.get(&group).cloned()
    }

    /// Emits a telegram as if sent by another device.
    ///
    /// Writes update the value store like writes from a connection.
    pub async fn inject(&self, source: PhysicalAddress, dest: GroupAddress, apdu: Vec<u8>) {
        if let Ok(ApduKind::Write) = ApduKind::decode(&apdu) {
            self.state.values.write().await.insert(dest, apdu.clone());
        }
        self.broadcast(source, dest, apdu);
    }

    fn broadcast(&self, source: PhysicalAddress, dest: GroupAddress, apdu: Vec<u8>) {
        let packet = GroupPacket {
            src: source.raw(),
            dest: dest.raw(),
            apdu,
        };
        // No receivers is normal before any listener connects
        let _ = self.state.telegrams.send(packet);
    }

    /// Applies a telegram sent through a connection.
    async fn handle(&self, dest: GroupAddress, apdu: &[u8]) {
        match ApduKind::decode(apdu) {
            Ok(ApduKind::Write) => {
                self.state.values.write().await.insert(dest, apdu.to_vec());
                self.broadcast(GATEWAY_ADDRESS, dest, apdu.to_vec());
            }
            Ok(ApduKind::Read) => {
                self.broadcast(GATEWAY_ADDRESS, dest, apdu.to_vec());
                let stored = self.state.values.read().await.get(&dest).cloned();
                if let Some(mut response) = stored {
                    if let Some(flags) = response.get_mut(1) {
                        *flags = (*flags & !APCI_MASK) | ApduKind::Response.flag();
                    }
                    self.broadcast(DEVICE_ADDRESS, dest, response);
                }
            }
            Ok(ApduKind::Response) => {
                self.broadcast(GATEWAY_ADDRESS, dest, apdu.to_vec());
            }
            Err(e) => {
                debug!(group = %dest, error = %e, "Simulated bus ignoring malformed APDU");
            }
        }
    }
}

impl Default for SimulatedBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BusTransport for SimulatedBus {
    async fn connect(&self) -> Result<Box<dyn BusConnection>, BusError> {
        Ok(Box::new(SimConnection {
            bus: self.clone(),
            telegrams: None,
            write_only: false,
            closed: false,
        }))
    }

    fn describe(&self) -> String {
        "sim:".to_string()
    }
}

/// One connection to a `SimulatedBus`.
struct SimConnection {
    bus: SimulatedBus,
    telegrams: Option<broadcast::Receiver<GroupPacket>>,
    write_only: bool,
    closed: bool,
}

#[async_trait]
impl BusConnection for SimConnection {
    async fn open_group_socket(&mut self, write_only: bool) -> Result<(), BusError> {
        if self.closed {
            return Err(BusError::ConnectionClosed);
        }
        self.write_only = write_only;
        self.telegrams = Some(self.bus.state.telegrams.subscribe());
        Ok(())
    }

    async fn send_group(&mut self, dest: GroupAddress, apdu: &[u8]) -> Result<(), BusError> {
        if self.closed {
            return Err(BusError::ConnectionClosed);
        }
        if self.telegrams.is_none() {
            return Err(BusError::NotOpen);
        }
        self.bus.handle(dest, apdu).await;
        Ok(())
    }

    async fn recv_group(&mut self) -> Result<GroupPacket, BusError> {
        if self.closed {
            return Err(BusError::ConnectionClosed);
        }
        if self.write_only {
            // A write-only group socket never delivers telegrams
            return std::future::pending().await;
        }
        let telegrams = self.telegrams.as_mut().ok_or(BusError::NotOpen)?;

        loop {
            match telegrams.recv().await {
                Ok(packet) => return Ok(packet),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Simulated bus connection lagged, telegrams dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return Err(BusError::ConnectionClosed),
            }
        }
    }

    async fn close(&mut self) -> Result<(), BusError> {
        self.closed = true;
        self.telegrams = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn ga(text: &str) -> GroupAddress {
        text.parse().unwrap()
    }

    async fn monitor(bus: &SimulatedBus) -> Box<dyn BusConnection> {
        let mut conn = bus.connect().await.unwrap();
        conn.open_group_socket(false).await.unwrap();
        conn
    }

    async fn next(conn: &mut Box<dyn BusConnection>) -> GroupPacket {
        timeout(Duration::from_secs(1), conn.recv_group())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_write_is_stored_and_broadcast() {
        let bus = SimulatedBus::new();
        let mut watcher = monitor(&bus).await;
        let mut writer = bus.connect().await.unwrap();
        writer.open_group_socket(true).await.unwrap();

        writer
            .send_group(ga("15/0/1"), &[0x00, 0x80, 0xFF])
            .await
            .unwrap();

        let packet = next(&mut watcher).await;
        assert_eq!(packet.dest, ga("15/0/1").raw());
        assert_eq!(packet.src, GATEWAY_ADDRESS.raw());
        assert_eq!(packet.apdu, vec![0x00, 0x80, 0xFF]);
        assert_eq!(bus.value(ga("15/0/1")).await, Some(vec![0x00, 0x80, 0xFF]));
    }

    #[tokio::test]
    async fn test_read_of_known_value_gets_response() {
        let bus = SimulatedBus::new();
        bus.seed(ga("1/2/3"), vec![0x00, 0x81]).await;
        let mut conn = monitor(&bus).await;

        conn.send_group(ga("1/2/3"), &[0x00, 0x00]).await.unwrap();

        let read = next(&mut conn).await;
        assert_eq!(ApduKind::decode(&read.apdu), Ok(ApduKind::Read));

        let response = next(&mut conn).await;
        assert_eq!(response.src, DEVICE_ADDRESS.raw());
        assert_eq!(response.apdu, vec![0x00, 0x41]);
    }

    #[tokio::test]
    async fn test_read_of_unknown_value_gets_no_response() {
        let bus = SimulatedBus::new();
        let mut conn = monitor(&bus).await;

        conn.send_group(ga("1/2/3"), &[0x00, 0x00]).await.unwrap();
        let read = next(&mut conn).await;
        assert_eq!(ApduKind::decode(&read.apdu), Ok(ApduKind::Read));

        let more = timeout(Duration::from_millis(50), conn.recv_group()).await;
        assert!(more.is_err());
    }

    #[tokio::test]
    async fn test_inject_external_write() {
        let bus = SimulatedBus::new();
        let mut conn = monitor(&bus).await;

        bus.inject(DEVICE_ADDRESS, ga("2/0/7"), vec![0x00, 0x80, 0x0C, 0x1A])
            .await;

        let packet = next(&mut conn).await;
        assert_eq!(packet.dest, ga("2/0/7").raw());
        assert_eq!(bus.value(ga("2/0/7")).await, Some(vec![0x00, 0x80, 0x0C, 0x1A]));
    }

    #[tokio::test]
    async fn test_connection_lifecycle() {
        let bus = SimulatedBus::new();
        let mut conn = bus.connect().await.unwrap();

        assert!(matches!(
            conn.send_group(ga("1/0/1"), &[0x00, 0x00]).await,
            Err(BusError::NotOpen)
        ));

        conn.open_group_socket(false).await.unwrap();
        conn.close().await.unwrap();
        assert!(conn.recv_group().await.unwrap_err().is_connection_lost());
    }
}
