//! The cloud sync service: producers enqueue segments, one background
//! scheduler uploads them in priority order within the bandwidth budget.
//!
//! ```text
//! enqueue() ──▶ SyncQueue ──▶ scheduler loop ──▶ TransferExecutor ──▶ ObjectStore
//!                   ▲              │   ▲
//!                   │              │   └── BandwidthMonitor (throttle)
//!                   │              ▼
//!                   └──────── RetryScheduler (DelayQueue)
//! ```

use crate::bandwidth::{bytes_per_sec_to_mbps, BandwidthMonitor};
use crate::config::Config;
use crate::error::SyncError;
use crate::metadata::completion_marker_path;
use crate::queue::SyncQueue;
use crate::retry::{RetryDecision, RetryPolicy, RetryScheduler};
use crate::stats::{StatisticsSnapshot, SyncStatistics};
use crate::store::ObjectStore;
use crate::task::{Priority, SyncResult, SyncTask};
use crate::transfer::{TransferExecutor, TransferSettings};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// What the scheduler loop is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Stopped,
    Idle,
    Throttled,
    Executing,
}

/// Operator-facing view of the service
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub running: bool,
    pub scheduler_state: SchedulerState,
    pub total_queued: usize,
    pub by_priority: BTreeMap<Priority, usize>,
    pub bandwidth_usage_bytes_per_sec: f64,
    pub bandwidth_usage_mbps: f64,
    pub max_bandwidth_bytes_per_sec: f64,
    pub is_throttling: bool,
    pub statistics: StatisticsSnapshot,
}

/// Loop timing taken from [`crate::config::SyncConfig`]
#[derive(Debug, Clone)]
struct SchedulerTiming {
    idle_poll_interval: Duration,
    error_cooldown: Duration,
    shutdown_timeout: Duration,
}

/// State shared between the service handle, the scheduler loop and the
/// force-sync path
struct Shared {
    key_prefix: String,
    queue: Arc<SyncQueue>,
    monitor: BandwidthMonitor,
    executor: TransferExecutor,
    stats: SyncStatistics,
    state: Mutex<SchedulerState>,
}

impl Shared {
    fn set_state(&self, state: SchedulerState) {
        *self.state.lock() = state;
    }

    /// Bookkeeping shared by queued and forced uploads
    async fn complete_success(&self, task: &SyncTask, bytes_transferred: u64) {
        if bytes_transferred > 0 {
            self.monitor.record(bytes_transferred);
        }

        let marker = completion_marker_path(&task.source_path);
        if let Err(e) = tokio::fs::File::create(&marker).await {
            warn!(marker = %marker.display(), error = %e, "Failed to create sync marker");
        }
    }
}

struct Workers {
    scheduler: JoinHandle<()>,
    retries: JoinHandle<()>,
}

/// Owns the queue, bandwidth monitor, executor and statistics.
///
/// Built once at startup and shared behind an `Arc`; independent instances do
/// not share any state.
pub struct CloudSyncService {
    shared: Arc<Shared>,
    retry_policy: RetryPolicy,
    timing: SchedulerTiming,
    running: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    workers: Mutex<Option<Workers>>,
}

impl CloudSyncService {
    pub fn new(config: &Config, store: Arc<dyn ObjectStore>) -> Self {
        let shared = Shared {
            key_prefix: config.s3.key_prefix.clone(),
            queue: Arc::new(SyncQueue::new()),
            monitor: BandwidthMonitor::new(
                config.sync.max_bytes_per_second(),
                config.sync.bandwidth_window(),
            ),
            executor: TransferExecutor::new(store, TransferSettings::from(&config.s3)),
            stats: SyncStatistics::new(),
            state: Mutex::new(SchedulerState::Stopped),
        };
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            shared: Arc::new(shared),
            retry_policy: RetryPolicy::from(&config.sync),
            timing: SchedulerTiming {
                idle_poll_interval: config.sync.idle_poll_interval(),
                error_cooldown: config.sync.error_cooldown(),
                shutdown_timeout: config.sync.shutdown_timeout(),
            },
            running: AtomicBool::new(false),
            shutdown_tx,
            workers: Mutex::new(None),
        }
    }

    /// Spawn the scheduler loop and the retry task. Must be called from
    /// within a Tokio runtime.
    pub fn start(&self) {
        let mut workers = self.workers.lock();
        if workers.is_some() {
            warn!("Cloud sync service already running");
            return;
        }

        let (retries, retry_handle) = RetryScheduler::spawn(
            self.retry_policy,
            self.shared.queue.clone(),
            self.shutdown_tx.subscribe(),
        );

        let scheduler = SchedulerLoop {
            shared: self.shared.clone(),
            retries,
            timing: self.timing.clone(),
        };
        let shutdown_rx = self.shutdown_tx.subscribe();

        self.running.store(true, Ordering::SeqCst);
        self.shared.set_state(SchedulerState::Idle);

        *workers = Some(Workers {
            scheduler: tokio::spawn(scheduler.run(shutdown_rx)),
            retries: retry_handle,
        });

        info!("Cloud sync service started");
    }

    /// Stop dequeuing, let the in-flight transfer finish, and join the
    /// background tasks
    pub async fn shutdown(&self) {
        let Some(workers) = self.workers.lock().take() else {
            return;
        };

        info!("Stopping cloud sync service");
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());

        let Workers { mut scheduler, retries } = workers;
        let joined = tokio::time::timeout(self.timing.shutdown_timeout, async {
            if let Err(e) = (&mut scheduler).await {
                error!(error = %e, "Scheduler task failed");
            }
        })
        .await;

        if joined.is_err() {
            warn!(
                timeout_secs = self.timing.shutdown_timeout.as_secs(),
                "Scheduler did not stop in time, aborting"
            );
            scheduler.abort();
        }
        retries.abort();
        let _ = retries.await;

        self.shared.set_state(SchedulerState::Stopped);
        info!(
            queued = self.shared.queue.len(),
            "Cloud sync service stopped"
        );
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Queue a segment for upload and return its destination key.
    ///
    /// `has_motion` promotes the task to at least [`Priority::High`].
    pub fn enqueue(
        &self,
        local_path: impl Into<PathBuf>,
        camera_id: &str,
        site_id: &str,
        priority: Priority,
        has_motion: bool,
    ) -> Result<String, SyncError> {
        let task = SyncTask::new(
            local_path,
            camera_id,
            site_id,
            priority.with_motion_hint(has_motion),
            &self.shared.key_prefix,
        )?;
        let destination_key = task.destination_key.clone();

        debug!(
            task_id = %task.id,
            source = %task.source_path.display(),
            destination_key = %destination_key,
            priority = %task.priority,
            "Queued segment for sync"
        );

        self.shared.queue.enqueue(task);
        Ok(destination_key)
    }

    /// Upload one segment immediately, bypassing the queue and throttling.
    ///
    /// Exactly one attempt is made; failures are not retried.
    #[instrument(skip(self, local_path))]
    pub async fn force_sync(
        &self,
        local_path: impl Into<PathBuf>,
        camera_id: &str,
        site_id: &str,
    ) -> bool {
        let task = match SyncTask::new(
            local_path,
            camera_id,
            site_id,
            Priority::Critical,
            &self.shared.key_prefix,
        ) {
            Ok(task) => task,
            Err(e) => {
                error!(error = %e, "Force sync rejected");
                return false;
            }
        };

        let result = self.shared.executor.execute(task).await;
        self.shared.stats.record_attempt(&result);

        if result.success() {
            self.shared
                .complete_success(&result.task, result.bytes_transferred)
                .await;
            true
        } else {
            error!(
                source = %result.task.source_path.display(),
                error = ?result.error_message(),
                "Force sync failed"
            );
            false
        }
    }

    pub fn status(&self) -> SyncStatus {
        let bandwidth = self.shared.monitor.snapshot();
        let by_priority = self.shared.queue.snapshot_by_priority();

        SyncStatus {
            running: self.is_running(),
            scheduler_state: *self.shared.state.lock(),
            total_queued: by_priority.values().sum(),
            by_priority,
            bandwidth_usage_bytes_per_sec: bandwidth.usage_bytes_per_sec,
            bandwidth_usage_mbps: bytes_per_sec_to_mbps(bandwidth.usage_bytes_per_sec),
            max_bandwidth_bytes_per_sec: bandwidth.max_bytes_per_sec,
            is_throttling: bandwidth.is_throttling,
            statistics: self.shared.stats.snapshot(),
        }
    }

    /// Bandwidth monitor, exposed for diagnostics
    pub fn bandwidth_monitor(&self) -> &BandwidthMonitor {
        &self.shared.monitor
    }
}

enum Tick {
    Continue,
    Shutdown,
}

/// The single dequeuing worker
struct SchedulerLoop {
    shared: Arc<Shared>,
    retries: RetryScheduler,
    timing: SchedulerTiming,
}

impl SchedulerLoop {
    async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Scheduler loop started");

        loop {
            let tick = AssertUnwindSafe(self.tick(&mut shutdown_rx))
                .catch_unwind()
                .await;

            match tick {
                Ok(Tick::Continue) => {}
                Ok(Tick::Shutdown) => break,
                Err(panic) => {
                    error!(
                        panic = panic_message(panic.as_ref()),
                        cooldown_secs = self.timing.error_cooldown.as_secs(),
                        "Scheduler iteration panicked"
                    );
                    self.shared.set_state(SchedulerState::Idle);
                    if let Tick::Shutdown =
                        sleep_or_shutdown(self.timing.error_cooldown, &mut shutdown_rx).await
                    {
                        break;
                    }
                }
            }
        }

        info!("Scheduler loop stopped");
    }

    async fn tick(&self, shutdown_rx: &mut broadcast::Receiver<()>) -> Tick {
        // A shutdown sent while the previous transfer ran must stop the
        // loop before anything else is dequeued
        match shutdown_rx.try_recv() {
            Err(broadcast::error::TryRecvError::Empty) => {}
            Ok(()) | Err(_) => return Tick::Shutdown,
        }

        let delay = self.shared.monitor.throttle_delay();
        if !delay.is_zero() {
            self.shared.set_state(SchedulerState::Throttled);
            debug!(delay_ms = delay.as_millis() as u64, "Throttling uploads");
            return sleep_or_shutdown(delay, shutdown_rx).await;
        }

        let Some(task) = self.shared.queue.dequeue_highest() else {
            self.shared.set_state(SchedulerState::Idle);
            return tokio::select! {
                _ = shutdown_rx.recv() => Tick::Shutdown,
                _ = self.shared.queue.wait_for_task(self.timing.idle_poll_interval) => Tick::Continue,
            };
        };

        self.shared.set_state(SchedulerState::Executing);
        let result = self.shared.executor.execute(task).await;
        self.handle_result(result).await;
        self.shared.set_state(SchedulerState::Idle);

        Tick::Continue
    }

    async fn handle_result(&self, result: SyncResult) {
        self.shared.stats.record_attempt(&result);

        let SyncResult {
            task,
            error,
            bytes_transferred,
            ..
        } = result;

        match error {
            None => self.shared.complete_success(&task, bytes_transferred).await,
            Some(SyncError::SourceMissing(path)) => {
                self.shared.stats.record_source_missing();
                error!(
                    task_id = %task.id,
                    source = %path.display(),
                    "Source missing, dropping task"
                );
            }
            Some(e) if e.is_retryable() => {
                let task_id = task.id;
                let source = task.source_path.clone();
                match self.retries.schedule(task) {
                    RetryDecision::Retry { .. } => self.shared.stats.record_retry_scheduled(),
                    RetryDecision::Exhausted { retries } => {
                        self.shared.stats.record_retries_exhausted();
                        error!(
                            task_id = %task_id,
                            source = %source.display(),
                            last_error = %e,
                            error = %SyncError::RetryBudgetExhausted(retries),
                            "Max retries exceeded, dropping task"
                        );
                    }
                }
            }
            Some(e) => {
                error!(task_id = %task.id, error = %e, "Non-retryable failure, dropping task");
            }
        }
    }
}

async fn sleep_or_shutdown(delay: Duration, shutdown_rx: &mut broadcast::Receiver<()>) -> Tick {
    tokio::select! {
        _ = shutdown_rx.recv() => Tick::Shutdown,
        _ = tokio::time::sleep(delay) => Tick::Continue,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
