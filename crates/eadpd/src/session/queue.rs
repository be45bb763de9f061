//! Bounded write queue between a session and its bus writer.
//!
//! A push waits at most the enqueue timeout for room. When the queue stays
//! full the task is logged and dropped; the session carries on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tracing::{error, trace, warn};

use eadp_core::Task;

/// Receiving end, owned by the bus writer.
pub type TaskReceiver = mpsc::Receiver<Task>;

/// Sending end, owned by the session.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    sender: mpsc::Sender<Task>,
    enqueue_timeout: Duration,
    dropped: Arc<AtomicU64>,
}

/// Creates a queue holding at most `capacity` tasks.
pub fn task_queue(capacity: usize, enqueue_timeout: Duration) -> (TaskQueue, TaskReceiver) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    let queue = TaskQueue {
        sender,
        enqueue_timeout,
        dropped: Arc::new(AtomicU64::new(0)),
    };
    (queue, receiver)
}

impl TaskQueue {
    /// Enqueues a task. Returns false if it was dropped.
    pub async fn push(&self, task: Task) -> bool {
        match self.sender.send_timeout(task, self.enqueue_timeout).await {
            Ok(()) => true,
            Err(SendTimeoutError::Timeout(task)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                error!(
                    task_id = %task.id(),
                    command = %task.raw_command(),
                    group = ?task.group_address(),
                    timeout_ms = self.enqueue_timeout.as_millis() as u64,
                    age_ms = task.age().num_milliseconds(),
                    "Write queue full, dropping task"
                );
                false
            }
            Err(SendTimeoutError::Closed(task)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    task_id = %task.id(),
                    command = %task.raw_command(),
                    "Bus writer gone, dropping task"
                );
                false
            }
        }
    }

    /// Enqueues tasks in order. Returns how many were accepted.
    pub async fn push_all(&self, tasks: impl IntoIterator<Item = Task>) -> usize {
        let mut accepted = 0;
        for task in tasks {
            trace!(task_id = %task.id(), kind = %task.kind(), "Enqueue");
            if self.push(task).await {
                accepted += 1;
            }
        }
        accepted
    }

    /// Number of tasks dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(address: &str) -> Task {
        Task::from_raw(&format!("RE {address}"))
            .unwrap()
            .extract()
            .unwrap()
            .remove(0)
    }

    #[tokio::test]
    async fn test_push_preserves_order() {
        let (queue, mut receiver) = task_queue(8, Duration::from_millis(10));
        let tasks = Task::from_raw("RE 1/0/1,1/0/2,1/0/3")
            .unwrap()
            .extract()
            .unwrap();

        assert_eq!(queue.push_all(tasks).await, 3);

        let mut seen = Vec::new();
        while let Ok(task) = receiver.try_recv() {
            seen.push(task.group_address().unwrap().to_string());
        }
        assert_eq!(seen, vec!["1/0/1", "1/0/2", "1/0/3"]);
    }

    #[tokio::test]
    async fn test_full_queue_drops_after_timeout() {
        let (queue, mut receiver) = task_queue(1, Duration::from_millis(20));

        assert!(queue.push(read("1/0/1")).await);
        assert!(!queue.push(read("1/0/2")).await);
        assert_eq!(queue.dropped(), 1);

        // The queued task is untouched
        let task = receiver.recv().await.unwrap();
        assert_eq!(task.group_address(), Some("1/0/1"));
    }

    #[tokio::test]
    async fn test_closed_queue_drops() {
        let (queue, receiver) = task_queue(4, Duration::from_millis(20));
        drop(receiver);

        assert!(!queue.push(read("1/0/1")).await);
        assert_eq!(queue.dropped(), 1);
    }

    #[tokio::test]
    async fn test_capacity() {
        let (queue, _receiver) = task_queue(1000, Duration::from_secs(1));
        assert_eq!(queue.capacity(), 1000);
    }
}
