//! TCP server for the EADP gateway.
//!
//! The server:
//! - Listens on a TCP address for client connections
//! - Spawns a `Session` for each client, up to `max_connections`
//! - Gives every session a child of the server's cancellation token
//! - Waits for live sessions to wind down on shutdown
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  GatewayServer  │
//! │                 │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │     Session     │────▶│  BusWriter      │──┐
//! │   (per client)  │     └─────────────────┘  │
//! │                 │     ┌─────────────────┐  ▼
//! │                 │◀────│  BusListener    │◀─ KNX bus
//! └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Accept errors are logged and the loop continues
//! - A failing session never affects other sessions

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use eadp_bus::BusTransport;

use crate::config::{ConfigError, GatewayConfig};
use crate::session::{Session, SessionSettings};

/// Extra time sessions get on shutdown beyond their own join timeout.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// TCP server for the gateway.
pub struct GatewayServer {
    /// Bound listener
    listener: TcpListener,

    /// Settings shared by every session
    settings: Arc<SessionSettings>,

    /// Bus used by every session's daemons
    transport: Arc<dyn BusTransport>,

    /// Upper bound on concurrent sessions
    max_connections: usize,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    /// Connection counter for log correlation
    connection_counter: AtomicU64,

    /// Sessions currently running
    active: Arc<AtomicUsize>,
}

impl GatewayServer {
    /// Validates `config` and binds the listen address.
    ///
    /// # Errors
    ///
    /// - `ServerError::Config` if the configuration is invalid or the policy
    ///   file cannot be read
    /// - `ServerError::Bind` if the address cannot be bound
    pub async fn bind(
        config: &GatewayConfig,
        transport: Arc<dyn BusTransport>,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        config.validate()?;
        let addr = config.listen_addr()?;
        let policy = config.load_policy()?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr,
                error: e.to_string(),
            })?;

        Ok(Self {
            listener,
            settings: Arc::new(SessionSettings::from_config(config, policy)),
            transport,
            max_connections: config.max_connections,
            cancel_token,
            connection_counter: AtomicU64::new(0),
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Returns the bound address.
    ///
    /// # Errors
    ///
    /// `ServerError::Io` if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener
            .local_addr()
            .map_err(|e| ServerError::Io(e.to_string()))
    }

    /// Number of sessions currently running.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Accepts connections until the cancellation token is triggered.
    ///
    /// Does not return until every session has stopped or the shutdown
    /// grace period has passed.
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = self.local_addr()?;
        info!(
            listen = %addr,
            bus = %self.transport.describe(),
            max_connections = self.max_connections,
            "Gateway listening"
        );

        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Session task failed");
                    }
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let conn_num = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            self.handle_connection(&mut sessions, stream, peer, conn_num).await;
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        self.drain(sessions).await;
        info!("Server stopped");
        Ok(())
    }

    /// Spawns a session, or refuses the client if the server is full.
    async fn handle_connection(
        &self,
        sessions: &mut JoinSet<()>,
        mut stream: TcpStream,
        peer: SocketAddr,
        connection_number: u64,
    ) {
        let Some(slot) = ConnectionSlot::acquire(&self.active, self.max_connections) else {
            warn!(
                peer = %peer,
                max = self.max_connections,
                "Too many connections, refusing client"
            );
            if let Err(e) = stream.shutdown().await {
                debug!(peer = %peer, error = %e, "Error closing refused connection");
            }
            return;
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
        }

        info!(
            peer = %peer,
            connection = connection_number,
            active = self.active_connections(),
            "Client connected"
        );

        let (reader, writer) = stream.into_split();
        let session = Session::new(
            reader,
            writer,
            peer,
            Arc::clone(&self.settings),
            Arc::clone(&self.transport),
            self.cancel_token.child_token(),
        );

        sessions.spawn(async move {
            let _slot = slot;
            session.run().await;
        });
    }

    /// Waits for running sessions after cancellation; aborts stragglers.
    async fn drain(&self, mut sessions: JoinSet<()>) {
        if sessions.is_empty() {
            return;
        }

        let grace = self.settings.join_timeout * 2 + SHUTDOWN_GRACE;
        debug!(sessions = sessions.len(), "Waiting for sessions to stop");

        let drained = timeout(grace, async {
            while let Some(joined) = sessions.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "Session task failed");
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                sessions = sessions.len(),
                "Sessions did not stop in time, aborting"
            );
            sessions.shutdown().await;
        }
    }
}

/// Counts one running session; released on drop.
struct ConnectionSlot {
    active: Arc<AtomicUsize>,
}

impl ConnectionSlot {
    fn acquire(active: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .ok()
            .map(|_| Self {
                active: Arc::clone(active),
            })
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: SocketAddr, error: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(String),
}
