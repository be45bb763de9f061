//! Bus writer: drains a session's write queue onto the bus.
//!
//! The bus connection is opened lazily on the first task and dropped after
//! a connection-level send failure, so the next task reconnects.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use eadp_bus::{BusConnection, BusError, BusTransport};
use eadp_core::{parse_hex_value, read_apdu, write_apdu, BusOp, GroupAddress, Task};

use crate::session::queue::TaskReceiver;

/// Consumes tasks until cancelled or the queue closes.
pub struct BusWriter {
    peer: SocketAddr,
    transport: Arc<dyn BusTransport>,
    tasks: TaskReceiver,
    cancel_token: CancellationToken,
    connection: Option<Box<dyn BusConnection>>,
}

impl BusWriter {
    pub fn new(
        peer: SocketAddr,
        transport: Arc<dyn BusTransport>,
        tasks: TaskReceiver,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            peer,
            transport,
            tasks,
            cancel_token,
            connection: None,
        }
    }

    pub async fn run(mut self) {
        debug!(peer = %self.peer, "Bus writer started");

        loop {
            let task = tokio::select! {
                biased;

                _ = self.cancel_token.cancelled() => break,

                task = self.tasks.recv() => match task {
                    Some(task) => task,
                    None => break,
                },
            };

            self.process(task).await;
        }

        self.disconnect().await;
        debug!(peer = %self.peer, "Bus writer stopped");
    }

    /// Turns one task into a telegram and sends it.
    async fn process(&mut self, task: Task) {
        let Some(op) = task.kind().bus_op() else {
            trace!(task_id = %task.id(), kind = %task.kind(), "No bus operation for task");
            return;
        };

        let Some(group) = parse_target(&task) else {
            warn!(
                peer = %self.peer,
                task_id = %task.id(),
                group = ?task.group_address(),
                "Dropping task with invalid group address"
            );
            return;
        };

        let apdu = match op {
            BusOp::Read => read_apdu(),
            BusOp::Write => match task.value().map(parse_hex_value) {
                Some(Ok(value)) => write_apdu(&value),
                Some(Err(e)) => {
                    error!(
                        peer = %self.peer,
                        task_id = %task.id(),
                        group = %group,
                        error = %e,
                        "Dropping write with unsupported value"
                    );
                    return;
                }
                None => {
                    error!(peer = %self.peer, task_id = %task.id(), "Dropping write without value");
                    return;
                }
            },
        };

        let connection = match self.connection().await {
            Ok(connection) => connection,
            Err(e) => {
                error!(
                    peer = %self.peer,
                    task_id = %task.id(),
                    bus = %self.transport.describe(),
                    error = %e,
                    "Bus unreachable, dropping task"
                );
                return;
            }
        };

        match connection.send_group(group, &apdu).await {
            Ok(()) => {
                trace!(
                    task_id = %task.id(),
                    group = %group,
                    op = ?op,
                    age_ms = task.age().num_milliseconds(),
                    "Telegram sent"
                );
            }
            Err(e) => {
                error!(
                    peer = %self.peer,
                    task_id = %task.id(),
                    group = %group,
                    error = %e,
                    "Failed to send telegram"
                );
                if e.is_connection_lost() {
                    self.connection = None;
                }
            }
        }
    }

    /// Returns the open connection, connecting first if needed.
    async fn connection(&mut self) -> Result<&mut Box<dyn BusConnection>, BusError> {
        if self.connection.is_none() {
            let mut connection = self.transport.connect().await?;
            connection.open_group_socket(true).await?;
            info!(peer = %self.peer, bus = %self.transport.describe(), "Bus writer connected");
            self.connection = Some(connection);
        }
        self.connection.as_mut().ok_or(BusError::NotOpen)
    }

    async fn disconnect(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            if let Err(e) = connection.close().await {
                debug!(peer = %self.peer, error = %e, "Error closing bus connection");
            }
        }
    }
}

fn parse_target(task: &Task) -> Option<GroupAddress> {
    task.group_address()?.parse().ok()
}
