//! Bus listener: relays group values from the bus to one client.
//!
//! Every response or write telegram is answered to the client as
//! `dE <group>=<value>` followed by `aE`. If the group is watched, an
//! unsolicited `dE <group>=<value>` follows. Client write failures are
//! logged and never stop the loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use eadp_bus::{BusConnection, BusError, BusTransport, GroupPacket};
use eadp_core::Telegram;
use eadp_protocol::Reply;

use crate::session::{send_reply, ClientWriter, WatchList};

/// Receives telegrams until cancelled.
pub struct BusListener {
    peer: SocketAddr,
    transport: Arc<dyn BusTransport>,
    watch: WatchList,
    client: ClientWriter,
    cancel_token: CancellationToken,
    reconnect_delay: Duration,
}

impl BusListener {
    pub fn new(
        peer: SocketAddr,
        transport: Arc<dyn BusTransport>,
        watch: WatchList,
        client: ClientWriter,
        cancel_token: CancellationToken,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            peer,
            transport,
            watch,
            client,
            cancel_token,
            reconnect_delay,
        }
    }

    pub async fn run(self) {
        debug!(peer = %self.peer, "Bus listener started");

        while let Some(mut connection) = self.connect().await {
            loop {
                let received = tokio::select! {
                    biased;

                    _ = self.cancel_token.cancelled() => {
                        if let Err(e) = connection.close().await {
                            debug!(peer = %self.peer, error = %e, "Error closing bus connection");
                        }
                        debug!(peer = %self.peer, "Bus listener stopped");
                        return;
                    }

                    received = connection.recv_group() => received,
                };

                match received {
                    Ok(packet) => self.relay(packet).await,
                    Err(e) if e.is_connection_lost() => {
                        warn!(peer = %self.peer, error = %e, "Bus connection lost, reconnecting");
                        break;
                    }
                    Err(e) => {
                        warn!(peer = %self.peer, error = %e, "Discarding bus message");
                    }
                }
            }
        }

        debug!(peer = %self.peer, "Bus listener stopped");
    }

    /// Connects and opens a group monitor, retrying until cancelled.
    ///
    /// Returns `None` once cancelled.
    async fn connect(&self) -> Option<Box<dyn BusConnection>> {
        loop {
            let attempt = async {
                let mut connection = self.transport.connect().await?;
                connection.open_group_socket(false).await?;
                Ok::<_, BusError>(connection)
            };

            tokio::select! {
                biased;

                _ = self.cancel_token.cancelled() => return None,

                result = attempt => match result {
                    Ok(connection) => {
                        info!(peer = %self.peer, bus = %self.transport.describe(), "Bus listener connected");
                        return Some(connection);
                    }
                    Err(e) => {
                        warn!(
                            peer = %self.peer,
                            bus = %self.transport.describe(),
                            error = %e,
                            retry_ms = self.reconnect_delay.as_millis() as u64,
                            "Bus listener cannot connect"
                        );
                    }
                },
            }

            tokio::select! {
                _ = self.cancel_token.cancelled() => return None,
                _ = sleep(self.reconnect_delay) => {}
            }
        }
    }

    /// Classifies one telegram and forwards its value.
    async fn relay(&self, packet: GroupPacket) {
        let telegram = match Telegram::decode(packet.src, packet.dest, &packet.apdu) {
            Ok(telegram) => telegram,
            Err(e) => {
                warn!(peer = %self.peer, error = %e, apdu = ?packet.apdu, "Discarding malformed telegram");
                return;
            }
        };

        if !telegram.kind.carries_value() {
            trace!(group = %telegram.destination, source = %telegram.source, "Ignoring group read");
            return;
        }

        let group = telegram.destination;
        let value = telegram.value();
        trace!(
            group = %group,
            source = %telegram.source,
            kind = %telegram.kind,
            value = %value,
            "Relaying telegram"
        );

        let response = Reply::Value {
            group,
            value: value.clone(),
        };
        if let Err(e) = send_reply(&self.client, &response).await {
            debug!(peer = %self.peer, group = %group, error = %e, "Failed to send value to client");
        }

        if self.watch.contains(group).await {
            let notification = Reply::Notification { group, value };
            if let Err(e) = send_reply(&self.client, &notification).await {
                debug!(peer = %self.peer, group = %group, error = %e, "Failed to notify watcher");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use eadp_bus::SimulatedBus;
    use eadp_core::{GroupAddress, PhysicalAddress};
    use tokio::io::{duplex, AsyncBufReadExt, BufReader, DuplexStream};
    use tokio::time::timeout;

    use crate::session::client_writer;

    fn ga(text: &str) -> GroupAddress {
        text.parse().unwrap()
    }

    fn listener(
        transport: Arc<dyn BusTransport>,
        watch: WatchList,
    ) -> (BusListener, BufReader<DuplexStream>) {
        let (client, server) = duplex(4096);
        let listener = BusListener::new(
            "127.0.0.1:4000".parse().unwrap(),
            transport,
            watch,
            client_writer(server),
            CancellationToken::new(),
            Duration::from_millis(20),
        );
        (listener, BufReader::new(client))
    }

    fn packet(dest: &str, apdu: &[u8]) -> GroupPacket {
        GroupPacket {
            src: 0x1105,
            dest: ga(dest).raw(),
            apdu: apdu.to_vec(),
        }
    }

    async fn recv(reader: &mut BufReader<DuplexStream>) -> String {
        let mut line = String::new();
        timeout(Duration::from_secs(1), reader.read_line(&mut line))
            .await
            .expect("line within timeout")
            .unwrap();
        line
    }

    #[tokio::test]
    async fn test_relay_skips_reads_and_malformed_telegrams() {
        let (listener, mut reader) = listener(Arc::new(SimulatedBus::new()), WatchList::new());

        listener.relay(packet("3/1/7", &[0x00])).await;
        listener.relay(packet("3/1/7", &[0x00, 0x00])).await;
        listener.relay(packet("3/1/7", &[0x03, 0x80])).await;
        listener.relay(packet("3/1/7", &[0x00, 0xC0])).await;
        listener.relay(packet("3/1/7", &[0x00, 0x80, 0x10])).await;

        // Only the write reaches the client
        assert_eq!(recv(&mut reader).await, "dE 3/1/7=10\n");
        assert_eq!(recv(&mut reader).await, "aE\n");
    }

    #[tokio::test]
    async fn test_relay_notifies_watched_group() {
        let watch = WatchList::new();
        watch.watch(&[ga("1/0/1")]).await;
        let (listener, mut reader) = listener(Arc::new(SimulatedBus::new()), watch);

        listener.relay(packet("1/0/1", &[0x00, 0x41])).await;
        assert_eq!(recv(&mut reader).await, "dE 1/0/1=01\n");
        assert_eq!(recv(&mut reader).await, "aE\n");
        assert_eq!(recv(&mut reader).await, "dE 1/0/1=01\n");

        listener.relay(packet("1/0/2", &[0x00, 0x80, 0x0C, 0x1A])).await;
        assert_eq!(recv(&mut reader).await, "dE 1/0/2=0C 1A\n");
        assert_eq!(recv(&mut reader).await, "aE\n");
    }

    #[tokio::test]
    async fn test_run_relays_bus_traffic_until_cancelled() {
        let bus = SimulatedBus::new();
        let (listener, mut reader) = listener(Arc::new(bus.clone()), WatchList::new());
        let cancel = listener.cancel_token.clone();
        let handle = tokio::spawn(listener.run());

        // Retry until the monitor connection is up
        let mut first = None;
        for _ in 0..50 {
            let source = PhysicalAddress::from_raw(0x1105);
            bus.inject(source, ga("2/0/1"), vec![0x00, 0x80, 0x07]).await;
            let mut line = String::new();
            let read = timeout(Duration::from_millis(50), reader.read_line(&mut line)).await;
            if let Ok(Ok(_)) = read {
                first = Some(line);
                break;
            }
        }
        assert_eq!(first.as_deref(), Some("dE 2/0/1=07\n"));
        assert_eq!(recv(&mut reader).await, "aE\n");

        cancel.cancel();
        timeout(Duration::from_secs(1), handle)
            .await
            .expect("listener stops on cancel")
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_stops_while_bus_unreachable() {
        let transport = eadp_bus::transport_from_url("local:/nonexistent/eibd.sock").unwrap();
        let (listener, _reader) = listener(transport, WatchList::new());
        let cancel = listener.cancel_token.clone();
        let handle = tokio::spawn(listener.run());

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        timeout(Duration::from_secs(1), handle)
            .await
            .expect("listener stops on cancel")
            .unwrap();
    }
}
