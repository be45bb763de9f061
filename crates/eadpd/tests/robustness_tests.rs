//! Robustness tests for the gateway.
//!
//! These tests verify the gateway handles edge cases gracefully:
//! - Malformed and oversized lines
//! - Connection limits
//! - Rapid connect/disconnect
//! - Many concurrent clients
//! - An unreachable bus
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use eadp_bus::{transport_from_url, BusTransport, SimulatedBus};
use eadp_core::GroupAddress;
use eadpd::config::GatewayConfig;
use eadpd::server::GatewayServer;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

const REPLY_TIMEOUT: Duration = Duration::from_secs(2);
const SETTLE_TIME: Duration = Duration::from_millis(50);

// ============================================================================
// Test Helpers
// ============================================================================

struct TestServer {
    addr: SocketAddr,
    bus: SimulatedBus,
    cancel_token: CancellationToken,
}

impl TestServer {
    async fn spawn() -> Self {
        Self::spawn_with(GatewayConfig::default()).await
    }

    async fn spawn_with(config: GatewayConfig) -> Self {
        let bus = SimulatedBus::new();
        let transport: Arc<dyn BusTransport> = Arc::new(bus.clone());
        Self::spawn_on(config, transport, bus).await
    }

    async fn spawn_on(
        config: GatewayConfig,
        transport: Arc<dyn BusTransport>,
        bus: SimulatedBus,
    ) -> Self {
        let config = GatewayConfig {
            listen: "127.0.0.1:0".to_string(),
            bus_url: "sim:".to_string(),
            ..config
        };
        let cancel_token = CancellationToken::new();

        let server = GatewayServer::bind(&config, transport, cancel_token.clone())
            .await
            .expect("bind server");
        let addr = server.local_addr().expect("local addr");

        tokio::spawn(async move {
            let _ = server.run().await;
        });

        Self {
            addr,
            bus,
            cancel_token,
        }
    }

    async fn connect(&self) -> TestClient {
        let stream = TcpStream::connect(self.addr).await.expect("connect to server");
        let (reader, writer) = stream.into_split();
        TestClient {
            reader: BufReader::new(reader),
            writer,
        }
    }

    async fn shutdown(self) {
        self.cancel_token.cancel();
        sleep(Duration::from_millis(100)).await;
    }
}

struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn send(&mut self, line: &str) {
        self.send_raw(format!("{line}\n").as_bytes()).await;
    }

    async fn recv(&mut self) -> String {
        let mut line = String::new();
        timeout(REPLY_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("reply within timeout")
            .unwrap();
        line
    }

    async fn login(&mut self, name: &str) {
        self.send(&format!("CH {name},EADP/0.1")).await;
        assert_eq!(self.recv().await, format!("aH {name}\n"));
        sleep(SETTLE_TIME).await;
    }
}

fn ga(text: &str) -> GroupAddress {
    text.parse().unwrap()
}

// ============================================================================
// Malformed Input Tests
// ============================================================================

#[tokio::test]
async fn test_malformed_lines_get_invalid_argument() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;
    client.login("mallory").await;

    for line in ["RE", "RE 1/0/", "XX 1/0/1", "re 1/0/1", "SE 1/0/1", "RE 99999/0/1"] {
        client.send(line).await;
        assert_eq!(
            client.recv().await,
            format!("nE E22, \"{line}: Invalid argument\"\n"),
            "line {line:?}"
        );
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_empty_line_handled() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    client.send("").await;
    assert_eq!(client.recv().await, "nE E22, \": Invalid argument\"\n");

    client.login("bob").await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_crlf_lines_accepted() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    client.send_raw(b"CH bob,EADP/0.1\r\n").await;
    assert_eq!(client.recv().await, "aH bob\n");

    server.shutdown().await;
}

#[tokio::test]
async fn test_oversized_line_rejected() {
    let config = GatewayConfig {
        max_line_len: 64,
        ..GatewayConfig::default()
    };
    let server = TestServer::spawn_with(config).await;
    let mut client = server.connect().await;
    client.login("bob").await;

    let addresses = vec!["1/0/1"; 100].join(",");
    client.send(&format!("RE {addresses}")).await;
    assert_eq!(
        client.recv().await,
        "nE E22, \"line too long: Invalid argument\"\n"
    );

    // The remainder of the long line was discarded
    client.send("UE 1/0/1").await;
    assert_eq!(client.recv().await, "aE\n");

    server.shutdown().await;
}

#[tokio::test]
async fn test_client_continues_after_errors() {
    let server = TestServer::spawn().await;
    server.bus.seed(ga("7/7/7"), vec![0x00, 0x40, 0x07]).await;
    let mut client = server.connect().await;
    client.login("bob").await;

    for _ in 0..5 {
        client.send("garbage").await;
        assert!(client.recv().await.starts_with("nE E22"));
    }

    client.send("RE 7/7/7").await;
    assert_eq!(client.recv().await, "dE 7/7/7=07\n");
    assert_eq!(client.recv().await, "aE\n");

    server.shutdown().await;
}

// ============================================================================
// Connection Limit Tests
// ============================================================================

#[tokio::test]
async fn test_excess_connections_refused() {
    let config = GatewayConfig {
        max_connections: 2,
        ..GatewayConfig::default()
    };
    let server = TestServer::spawn_with(config).await;

    let mut first = server.connect().await;
    first.login("one").await;
    let mut second = server.connect().await;
    second.login("two").await;

    let mut third = server.connect().await;
    assert_eq!(third.recv().await, "", "third client should be closed");

    // A freed slot is reusable
    first.send("quit").await;
    assert_eq!(first.recv().await, "qE one\n");
    assert_eq!(first.recv().await, "");
    sleep(Duration::from_millis(100)).await;

    let mut fourth = server.connect().await;
    fourth.login("four").await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_rapid_connect_disconnect() {
    let server = TestServer::spawn().await;

    for _ in 0..20 {
        let client = server.connect().await;
        drop(client);
    }

    let mut client = server.connect().await;
    client.login("survivor").await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_many_concurrent_clients() {
    let server = TestServer::spawn().await;
    let mut handles = Vec::new();

    for i in 0..20 {
        let mut client = server.connect().await;
        handles.push(tokio::spawn(async move {
            let name = format!("client{i}");
            client.login(&name).await;
            client.send("quit").await;
            assert_eq!(client.recv().await, format!("qE {name}\n"));
        }));
    }

    for handle in handles {
        timeout(Duration::from_secs(5), handle)
            .await
            .expect("client finished")
            .expect("client task");
    }

    server.shutdown().await;
}

// ============================================================================
// Bus Failure Tests
// ============================================================================

#[tokio::test]
async fn test_unreachable_bus_keeps_session_alive() {
    let transport = transport_from_url("local:/nonexistent/eibd.sock").unwrap();
    let config = GatewayConfig {
        reconnect_delay_ms: 50,
        ..GatewayConfig::default()
    };
    let server = TestServer::spawn_on(config, transport, SimulatedBus::new()).await;
    let mut client = server.connect().await;
    client.login("bob").await;

    client.send("SE 1/0/1=01").await;
    client.send("UE 1/0/1").await;
    assert_eq!(client.recv().await, "aE\n");

    client.send("quit").await;
    assert_eq!(client.recv().await, "qE bob\n");

    server.shutdown().await;
}
