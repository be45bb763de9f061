//! eibd/knxd client protocol.
//!
//! Every message is a 2-byte big-endian length followed by a 2-byte
//! message type and its payload. Only the group-connection subset is
//! spoken here:
//!
//! | Type   | Name                | Payload                       |
//! |--------|---------------------|-------------------------------|
//! | 0x0026 | `EIB_OPEN_GROUPCON` | `[0, 0, write_only ? 0xFF:0]` |
//! | 0x0027 | `EIB_GROUP_PACKET`  | send: `dest(2) apdu...`       |
//! |        |                     | recv: `src(2) dest(2) apdu...`|

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use eadp_core::GroupAddress;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};
use tokio::time::timeout;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::debug;

use crate::{BusConnection, BusError, BusTransport, GroupPacket};

/// Default eibd TCP port.
pub const DEFAULT_EIBD_PORT: u16 = 6720;

/// Open a group connection.
const EIB_OPEN_GROUPCON: u16 = 0x0026;

/// Group telegram, both directions.
const EIB_GROUP_PACKET: u16 = 0x0027;

/// Type + src + dest.
const GROUP_PACKET_HEADER_LEN: usize = 6;

/// Maximum time to establish a connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Endpoint
// ============================================================================

/// Where the eibd daemon listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EibdEndpoint {
    Tcp { host: String, port: u16 },
    Unix(PathBuf),
}

impl EibdEndpoint {
    /// Parses `ip:host[:port]` or `local:/path`.
    ///
    /// # Errors
    ///
    /// `BusError::InvalidUrl` for other schemes, empty hosts or bad ports.
    pub fn parse(url: &str) -> Result<Self, BusError> {
        let invalid = |reason: &str| BusError::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        };

        if let Some(path) = url.strip_prefix("local:") {
            if path.is_empty() {
                return Err(invalid("empty socket path"));
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }

        let rest = url
            .strip_prefix("ip:")
            .ok_or_else(|| invalid("expected ip:, local: or sim: scheme"))?;

        let (host, port) = match rest.split_once(':') {
            Some((host, port)) => (
                host,
                port.parse::<u16>().map_err(|_| invalid("invalid port"))?,
            ),
            None => (rest, DEFAULT_EIBD_PORT),
        };

        if host.is_empty() {
            return Err(invalid("empty host"));
        }

        Ok(Self::Tcp {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for EibdEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "ip:{host}:{port}"),
            Self::Unix(path) => write!(f, "local:{}", path.display()),
        }
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Connects to an eibd/knxd daemon.
#[derive(Debug, Clone)]
pub struct EibdTransport {
    endpoint: EibdEndpoint,
}

impl EibdTransport {
    pub fn new(endpoint: EibdEndpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl BusTransport for EibdTransport {
    async fn connect(&self) -> Result<Box<dyn BusConnection>, BusError> {
        let timed_out = || BusError::ConnectTimeout {
            endpoint: self.endpoint.to_string(),
        };

        let connection: Box<dyn BusConnection> = match &self.endpoint {
            EibdEndpoint::Tcp { host, port } => {
                let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect((host.as_str(), *port)))
                    .await
                    .map_err(|_| timed_out())??;
                stream.set_nodelay(true)?;
                Box::new(EibdConnection::new(stream))
            }
            EibdEndpoint::Unix(path) => {
                let stream = timeout(CONNECT_TIMEOUT, UnixStream::connect(path))
                    .await
                    .map_err(|_| timed_out())??;
                Box::new(EibdConnection::new(stream))
            }
        };

        debug!(endpoint = %self.endpoint, "Connected to eibd");
        Ok(connection)
    }

    fn describe(&self) -> String {
        self.endpoint.to_string()
    }
}

// ============================================================================
// Connection
// ============================================================================

/// One eibd client connection over any byte stream.
pub struct EibdConnection<S> {
    framed: Framed<S, LengthDelimitedCodec>,
    group_open: bool,
}

impl<S> EibdConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            framed: Framed::new(stream, codec()),
            group_open: false,
        }
    }

    async fn send_message(&mut self, message: Vec<u8>) -> Result<(), BusError> {
        self.framed.send(Bytes::from(message)).await?;
        Ok(())
    }

    async fn recv_message(&mut self) -> Result<BytesMut, BusError> {
        match self.framed.next().await {
            Some(frame) => Ok(frame?),
            None => Err(BusError::ConnectionClosed),
        }
    }
}

/// Length-prefixed framing: the 2-byte length excludes itself.
fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(2)
        .big_endian()
        .max_frame_length(usize::from(u16::MAX))
        .new_codec()
}

/// Reads the message type of a received frame.
fn message_type(frame: &[u8]) -> Result<u16, BusError> {
    match frame {
        [hi, lo, ..] => Ok(u16::from_be_bytes([*hi, *lo])),
        _ => Err(BusError::MessageTooShort {
            len: frame.len(),
            min: 2,
        }),
    }
}

#[async_trait]
impl<S> BusConnection for EibdConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn open_group_socket(&mut self, write_only: bool) -> Result<(), BusError> {
        let [hi, lo] = EIB_OPEN_GROUPCON.to_be_bytes();
        let mode = if write_only { 0xFF } else { 0x00 };
        self.send_message(vec![hi, lo, 0x00, 0x00, mode]).await?;

        let reply = self.recv_message().await?;
        let got = message_type(&reply)?;
        if got != EIB_OPEN_GROUPCON {
            return Err(BusError::UnexpectedMessage {
                expected: EIB_OPEN_GROUPCON,
                got,
            });
        }

        self.group_open = true;
        Ok(())
    }

    async fn send_group(&mut self, dest: GroupAddress, apdu: &[u8]) -> Result<(), BusError> {
        if !self.group_open {
            return Err(BusError::NotOpen);
        }

        let mut message = Vec::with_capacity(apdu.len() + 4);
        message.extend_from_slice(&EIB_GROUP_PACKET.to_be_bytes());
        message.extend_from_slice(&dest.to_bytes());
        message.extend_from_slice(apdu);
        self.send_message(message).await
    }

    async fn recv_group(&mut self) -> Result<GroupPacket, BusError> {
        if !self.group_open {
            return Err(BusError::NotOpen);
        }

        let frame = self.recv_message().await?;
        let got = message_type(&frame)?;
        if got != EIB_GROUP_PACKET {
            return Err(BusError::UnexpectedMessage {
                expected: EIB_GROUP_PACKET,
                got,
            });
        }

        match frame.as_ref() {
            [_, _, s0, s1, d0, d1, apdu @ ..] => Ok(GroupPacket {
                src: u16::from_be_bytes([*s0, *s1]),
                dest: u16::from_be_bytes([*d0, *d1]),
                apdu: apdu.to_vec(),
            }),
            _ => Err(BusError::MessageTooShort {
                len: frame.len(),
                min: GROUP_PACKET_HEADER_LEN,
            }),
        }
    }

    async fn close(&mut self) -> Result<(), BusError> {
        self.group_open = false;
        SinkExt::<Bytes>::close(&mut self.framed).await?;
        Ok(())
    }
}
