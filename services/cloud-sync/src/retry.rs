//! Exponential backoff and delayed re-enqueue of failed tasks.
//!
//! All pending retries live in one [`DelayQueue`] owned by a single background
//! task, so a burst of failures costs timer entries rather than tasks.

use crate::config::SyncConfig;
use crate::queue::SyncQueue;
use crate::task::SyncTask;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::time::DelayQueue;
use tracing::{debug, info, warn};

/// Bounded exponential backoff: `min(2^attempt, max_delay)` seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for RetryPolicy {
    fn from(config: &SyncConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            max_delay: config.max_retry_delay(),
        }
    }
}

/// What happened to a failed task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enqueued after `delay`; `attempt` is the new retry count
    Retry { attempt: u32, delay: Duration },
    /// Dropped after `retries` retries
    Exhausted { retries: u32 },
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let secs = 2u64.saturating_pow(attempt);
        Duration::from_secs(secs).min(self.max_delay)
    }

    /// Bump the task's retry count if budget remains
    pub fn decide(&self, task: &mut SyncTask) -> RetryDecision {
        if task.retry_count < self.max_retries {
            task.retry_count += 1;
            RetryDecision::Retry {
                attempt: task.retry_count,
                delay: self.backoff(task.retry_count),
            }
        } else {
            RetryDecision::Exhausted {
                retries: task.retry_count,
            }
        }
    }
}

/// Handle for scheduling retries onto the delay queue task
pub struct RetryScheduler {
    policy: RetryPolicy,
    pending_tx: mpsc::UnboundedSender<(SyncTask, Duration)>,
}

impl RetryScheduler {
    /// Spawn the delay queue task feeding `queue`
    pub fn spawn(
        policy: RetryPolicy,
        queue: Arc<SyncQueue>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> (Self, JoinHandle<()>) {
        let (pending_tx, pending_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_delay_queue(pending_rx, queue, shutdown_rx));
        (Self { policy, pending_tx }, handle)
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Schedule `task` for another attempt if it has budget left.
    ///
    /// Never waits for the delay; the task is handed to the delay queue.
    pub fn schedule(&self, mut task: SyncTask) -> RetryDecision {
        let decision = self.policy.decide(&mut task);

        if let RetryDecision::Retry { attempt, delay } = decision {
            info!(
                task_id = %task.id,
                destination_key = %task.destination_key,
                attempt,
                max_retries = self.policy.max_retries,
                delay_secs = delay.as_secs(),
                "Retrying upload"
            );
            if self.pending_tx.send((task, delay)).is_err() {
                warn!("Retry scheduler stopped, dropping task");
            }
        }

        decision
    }
}

async fn run_delay_queue(
    mut pending_rx: mpsc::UnboundedReceiver<(SyncTask, Duration)>,
    queue: Arc<SyncQueue>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut pending: DelayQueue<SyncTask> = DelayQueue::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            scheduled = pending_rx.recv() => match scheduled {
                Some((task, delay)) => {
                    pending.insert(task, delay);
                }
                None => break,
            },
            Some(expired) = pending.next(), if !pending.is_empty() => {
                let task = expired.into_inner();
                debug!(task_id = %task.id, retry_count = task.retry_count, "Re-enqueueing task");
                queue.enqueue(task);
            }
        }
    }

    if !pending.is_empty() {
        warn!(dropped = pending.len(), "Retry scheduler stopped with pending retries");
    }
}
