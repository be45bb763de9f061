//! Per-client session: login, command dispatch and ordered teardown.
//!
//! Each session owns:
//! - a bounded write queue drained by its `BusWriter`
//! - a watch-list shared with its `BusListener`
//! - the client writer, shared with the listener for direct responses
//!
//! ```text
//!   client ──lines──▶ Session ──tasks──▶ TaskQueue ──▶ BusWriter ──▶ bus
//!     ▲                  │                                           │
//!     │                  └──watch/unwatch──▶ WatchList               │
//!     │                                         │                    │
//!     └─────────── ClientWriter ◀── BusListener ◀────telegrams───────┘
//! ```
//!
//! # States
//!
//! `AwaitingLogin → LoggedIn → Closing → Closed`. Only `CH` is accepted
//! before login; other well-formed commands get E13, malformed ones E22.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Client I/O failures move the session to `Closing`; nothing else does

pub mod queue;
pub mod watch;

pub use queue::{task_queue, TaskQueue, TaskReceiver};
pub use watch::WatchList;

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use eadp_bus::BusTransport;
use eadp_core::{CommandKind, Task};
use eadp_protocol::{is_policy_request, is_well_formed, Command, Reply, QUIT};

use crate::config::GatewayConfig;
use crate::daemon::{BusListener, BusWriter, DaemonHandles};

/// Client writer shared between the session and its bus listener.
pub type ClientWriter = Arc<Mutex<BufWriter<Box<dyn AsyncWrite + Send + Unpin>>>>;

/// Boxed client read half.
pub type ClientReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write timeout per reply.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Wraps a write half for sharing.
pub fn client_writer(writer: impl AsyncWrite + Send + Unpin + 'static) -> ClientWriter {
    let boxed: Box<dyn AsyncWrite + Send + Unpin> = Box::new(writer);
    Arc::new(Mutex::new(BufWriter::new(boxed)))
}

/// Writes one reply and flushes.
///
/// # Errors
///
/// `SessionError::Io` on socket failure, `SessionError::WriteTimeout` if the
/// client stops reading.
pub async fn send_reply(writer: &ClientWriter, reply: &Reply) -> Result<(), SessionError> {
    let text = reply.to_string();
    let mut writer = writer.lock().await;

    match timeout(WRITE_TIMEOUT, async {
        writer.write_all(text.as_bytes()).await?;
        writer.flush().await?;
        Ok::<(), std::io::Error>(())
    })
    .await
    {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(SessionError::Io(e.to_string())),
        Err(_) => Err(SessionError::WriteTimeout),
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Per-session settings derived from the gateway configuration.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub banner: Option<String>,
    pub policy: String,
    pub max_line_len: usize,
    pub queue_capacity: usize,
    pub enqueue_timeout: Duration,
    pub join_timeout: Duration,
    pub reconnect_delay: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &GatewayConfig, policy: String) -> Self {
        Self {
            banner: config.banner.clone(),
            policy,
            max_line_len: config.max_line_len,
            queue_capacity: config.queue_capacity,
            enqueue_timeout: config.enqueue_timeout(),
            join_timeout: config.join_timeout(),
            reconnect_delay: config.reconnect_delay(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&GatewayConfig::default(), eadp_protocol::DEFAULT_POLICY.to_string())
    }
}

// ============================================================================
// Session
// ============================================================================

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingLogin,
    LoggedIn,
    Closing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AwaitingLogin => "awaiting-login",
            Self::LoggedIn => "logged-in",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        write!(f, "{name}")
    }
}

/// Outcome of one client line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// One line read from the client.
#[derive(Debug)]
enum ClientLine {
    Text(String),
    TooLong,
}

/// One client connection.
pub struct Session {
    peer: SocketAddr,
    state: SessionState,
    name: Option<String>,
    reader: BufReader<ClientReader>,
    writer: ClientWriter,
    watch: WatchList,
    queue: TaskQueue,
    tasks: Option<TaskReceiver>,
    settings: Arc<SessionSettings>,
    transport: Arc<dyn BusTransport>,
    cancel_token: CancellationToken,
}

impl Session {
    /// Creates a session; nothing runs until [`Session::run`].
    ///
    /// `cancel_token` ends the session from outside (server shutdown).
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
        peer: SocketAddr,
        settings: Arc<SessionSettings>,
        transport: Arc<dyn BusTransport>,
        cancel_token: CancellationToken,
    ) -> Self {
        let (queue, tasks) = task_queue(settings.queue_capacity, settings.enqueue_timeout);
        let reader: ClientReader = Box::new(reader);

        Self {
            peer,
            state: SessionState::AwaitingLogin,
            name: None,
            reader: BufReader::new(reader),
            writer: client_writer(writer),
            watch: WatchList::new(),
            queue,
            tasks: Some(tasks),
            settings,
            transport,
            cancel_token,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Name announced at login.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn watch_list(&self) -> &WatchList {
        &self.watch
    }

    /// Runs the session until the client leaves or the server shuts down.
    ///
    /// Returns the name the client logged in with, if any.
    pub async fn run(mut self) -> Option<String> {
        let daemons = self.spawn_daemons();
        debug!(
            peer = %self.peer,
            queue_capacity = self.queue.capacity(),
            "Session started"
        );

        if let Some(banner) = self.settings.banner.clone() {
            if let Err(e) = self.reply(Reply::Banner { text: banner }).await {
                debug!(peer = %self.peer, error = %e, "Failed to send banner");
                self.state = SessionState::Closing;
            }
        }

        let cancel_token = self.cancel_token.clone();
        while self.state != SessionState::Closing {
            let line = tokio::select! {
                biased;

                _ = cancel_token.cancelled() => {
                    debug!(peer = %self.peer, "Session cancelled");
                    break;
                }

                line = self.read_line() => line,
            };

            let flow = match line {
                Ok(Some(ClientLine::Text(line))) => self.handle_line(&line).await,
                Ok(Some(ClientLine::TooLong)) => {
                    warn!(
                        peer = %self.peer,
                        max = self.settings.max_line_len,
                        "Client line too long"
                    );
                    self.reply(Reply::invalid_argument("line too long"))
                        .await
                        .map(|()| Flow::Continue)
                }
                Ok(None) => {
                    debug!(peer = %self.peer, "Client sent EOF");
                    Ok(Flow::Close)
                }
                Err(e) => Err(e),
            };

            match flow {
                Ok(Flow::Continue) => {}
                Ok(Flow::Close) => self.state = SessionState::Closing,
                Err(e) => {
                    debug!(peer = %self.peer, error = %e, "Client connection broken");
                    self.state = SessionState::Closing;
                }
            }
        }

        self.state = SessionState::Closing;
        self.close(daemons).await;

        info!(peer = %self.peer, name = ?self.name, "Client disconnected");
        self.name
    }

    /// Starts the writer and listener; both stop with the returned handles.
    fn spawn_daemons(&mut self) -> DaemonHandles {
        let token = self.cancel_token.child_token();

        let writer = self.tasks.take().map(|tasks| {
            BusWriter::new(self.peer, Arc::clone(&self.transport), tasks, token.clone())
        });
        let listener = BusListener::new(
            self.peer,
            Arc::clone(&self.transport),
            self.watch.clone(),
            Arc::clone(&self.writer),
            token.clone(),
            self.settings.reconnect_delay,
        );

        DaemonHandles::spawn(writer, listener, token)
    }

    /// Stops both daemons, then flushes and shuts down the client socket.
    async fn close(&mut self, daemons: DaemonHandles) {
        daemons.shutdown(self.settings.join_timeout).await;

        if !self.watch.is_empty().await {
            let watched = self.watch.snapshot().await;
            debug!(peer = %self.peer, watched = ?watched, "Dropping watch-list");
        }
        let dropped = self.queue.dropped();
        if dropped > 0 {
            warn!(peer = %self.peer, dropped, "Tasks dropped during session");
        }

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!(peer = %self.peer, error = %e, "Error shutting down client socket");
        }
        drop(writer);

        self.state = SessionState::Closed;
    }

    /// Reads one line whose content is at most `max_line_len` bytes.
    ///
    /// The `\n` or `\r\n` terminator does not count towards the limit.
    /// Longer lines are consumed up to their newline and reported as
    /// `TooLong`. Returns `None` on EOF.
    async fn read_line(&mut self) -> Result<Option<ClientLine>, SessionError> {
        let limit = self.settings.max_line_len as u64;
        let mut buf = Vec::new();

        let read = (&mut self.reader)
            .take(limit + 2)
            .read_until(b'\n', &mut buf)
            .await
            .map_err(|e| SessionError::Io(e.to_string()))?;

        if read == 0 {
            return Ok(None);
        }

        if buf.last() != Some(&b'\n') && buf.len() as u64 > limit + 1 {
            loop {
                buf.clear();
                let read = (&mut self.reader)
                    .take(limit.max(1))
                    .read_until(b'\n', &mut buf)
                    .await
                    .map_err(|e| SessionError::Io(e.to_string()))?;
                if read == 0 || buf.last() == Some(&b'\n') {
                    break;
                }
            }
            return Ok(Some(ClientLine::TooLong));
        }

        let content = buf.strip_suffix(b"\n").unwrap_or(&buf);
        let content = content.strip_suffix(b"\r").unwrap_or(content);
        if content.len() as u64 > limit {
            return Ok(Some(ClientLine::TooLong));
        }

        Ok(Some(ClientLine::Text(String::from_utf8_lossy(&buf).into_owned())))
    }

    /// Handles one client line.
    async fn handle_line(&mut self, raw: &str) -> Result<Flow, SessionError> {
        let line = raw.trim_end();
        debug!(peer = %self.peer, state = %self.state, command = %line, "Received command");

        if line == QUIT {
            self.say_goodbye().await;
            return Ok(Flow::Close);
        }

        if is_policy_request(line) {
            let document = self.settings.policy.clone();
            self.reply(Reply::Policy { document }).await?;
            return Ok(Flow::Continue);
        }

        match self.state {
            SessionState::AwaitingLogin => self.handle_login(line).await,
            SessionState::LoggedIn => self.handle_command(line).await,
            SessionState::Closing | SessionState::Closed => Ok(Flow::Close),
        }
    }

    /// Accepts only `CH` until logged in.
    async fn handle_login(&mut self, line: &str) -> Result<Flow, SessionError> {
        if !is_well_formed(line) {
            debug!(peer = %self.peer, command = %line, "Rejecting malformed command");
            self.reply(Reply::invalid_argument(line)).await?;
            return Ok(Flow::Continue);
        }

        if !line.starts_with(CommandKind::Helo.header()) {
            debug!(peer = %self.peer, command = %line, "Command before login");
            self.reply(Reply::permission_denied(line)).await?;
            return Ok(Flow::Continue);
        }

        match Command::parse(line) {
            Ok(Command::Helo { name, version }) => {
                info!(peer = %self.peer, name = %name, version = %version, "Client logged in");
                self.name = Some(name.clone());
                self.state = SessionState::LoggedIn;
                self.reply(Reply::Welcome { name }).await?;
            }
            Ok(other) => {
                debug!(peer = %self.peer, kind = %other.kind(), "Expected login command");
                self.reply(Reply::invalid_argument(line)).await?;
            }
            Err(e) => {
                debug!(peer = %self.peer, error = %e, "Rejecting malformed login");
                self.reply(Reply::invalid_argument(line)).await?;
            }
        }

        Ok(Flow::Continue)
    }

    /// Dispatches a command once logged in.
    async fn handle_command(&mut self, line: &str) -> Result<Flow, SessionError> {
        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(e) => {
                debug!(peer = %self.peer, error = %e, "Rejecting malformed command");
                self.reply(Reply::invalid_argument(line)).await?;
                return Ok(Flow::Continue);
            }
        };

        match command {
            Command::Helo { .. } => {
                debug!(peer = %self.peer, name = ?self.name, "Already logged in");
                self.reply(Reply::invalid_argument(line)).await?;
            }
            Command::Bye => {
                self.say_goodbye().await;
                return Ok(Flow::Close);
            }
            Command::Watch { targets } => {
                let added = self.watch.watch(&targets).await;
                let watched = self.watch.len().await;
                debug!(peer = %self.peer, added, watched, "Watch-list updated");
                self.enqueue(line).await?;
            }
            Command::Unwatch { targets } => {
                let removed = self.watch.unwatch(&targets).await;
                let watched = self.watch.len().await;
                debug!(peer = %self.peer, removed, watched, "Watch-list updated");
                self.reply(Reply::EndOfResponse).await?;
            }
            Command::Read { .. } | Command::Send { .. } => {
                self.enqueue(line).await?;
            }
        }

        Ok(Flow::Continue)
    }

    /// Decomposes a command into tasks and queues them in order.
    ///
    /// Every write is followed by a read of the same group, queued even if
    /// the write itself was dropped.
    async fn enqueue(&mut self, line: &str) -> Result<(), SessionError> {
        let tasks = match Task::from_raw(line).and_then(|task| task.extract()) {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(peer = %self.peer, error = %e, "Cannot decompose command");
                return self.reply(Reply::invalid_argument(line)).await;
            }
        };

        let ordered = tasks.into_iter().flat_map(|task| {
            let follow_up = task.kind().is_write().then(|| task.follow_up_read());
            std::iter::once(task).chain(follow_up)
        });
        let accepted = self.queue.push_all(ordered).await;
        trace!(peer = %self.peer, accepted, "Tasks queued");

        Ok(())
    }

    /// Best-effort `qE <name>` before closing.
    async fn say_goodbye(&mut self) {
        let name = self.name.clone().unwrap_or_else(|| self.peer.to_string());
        if let Err(e) = self.reply(Reply::Bye { name }).await {
            debug!(peer = %self.peer, error = %e, "Failed to send goodbye");
        }
    }

    async fn reply(&mut self, reply: Reply) -> Result<(), SessionError> {
        send_reply(&self.writer, &reply).await
    }
}

/// Errors that end a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Write timeout")]
    WriteTimeout,
}
