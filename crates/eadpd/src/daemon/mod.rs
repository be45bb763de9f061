//! Per-session bus daemons.
//!
//! Each session runs two tasks against the bus:
//! - `BusWriter` drains the write queue and sends telegrams
//! - `BusListener` relays received group values to the client
//!
//! Both share one cancellation token. Shutdown cancels it, waits up to the
//! join timeout for each task, and aborts whatever is still running.

pub mod listener;
pub mod writer;

pub use listener::BusListener;
pub use writer::BusWriter;

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Join handles for one session's daemons.
pub struct DaemonHandles {
    writer: Option<JoinHandle<()>>,
    listener: JoinHandle<()>,
    cancel_token: CancellationToken,
}

impl DaemonHandles {
    /// Spawns the daemons. `writer` is `None` if the queue was already taken.
    pub fn spawn(
        writer: Option<BusWriter>,
        listener: BusListener,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            writer: writer.map(|writer| tokio::spawn(writer.run())),
            listener: tokio::spawn(listener.run()),
            cancel_token,
        }
    }

    /// Cancels both daemons and waits for them in turn.
    pub async fn shutdown(self, join_timeout: Duration) {
        self.cancel_token.cancel();

        if let Some(writer) = self.writer {
            join_or_abort("writer", writer, join_timeout).await;
        }
        join_or_abort("listener", self.listener, join_timeout).await;
    }
}

async fn join_or_abort(name: &str, handle: JoinHandle<()>, join_timeout: Duration) {
    let abort = handle.abort_handle();

    match timeout(join_timeout, handle).await {
        Ok(Ok(())) => debug!(daemon = name, "Daemon joined"),
        Ok(Err(e)) => warn!(daemon = name, error = %e, "Daemon task failed"),
        Err(_) => {
            warn!(
                daemon = name,
                timeout_ms = join_timeout.as_millis() as u64,
                "Daemon did not stop in time, aborting"
            );
            abort.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_slow_task_is_aborted() {
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        let abort = handle.abort_handle();

        join_or_abort("test", handle, Duration::from_millis(10)).await;
        for _ in 0..100 {
            if abort.is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(abort.is_finished());
    }

    #[tokio::test]
    async fn test_finished_task_joins() {
        let handle = tokio::spawn(async {});
        let abort = handle.abort_handle();

        join_or_abort("test", handle, Duration::from_millis(100)).await;
        assert!(abort.is_finished());
    }
}
