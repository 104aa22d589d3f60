//! Cloud Sync Service
//!
//! Uploads recorded NVR video segments to S3-compatible object storage.
//! Producers hand segments to a priority queue; a single background scheduler
//! uploads them highest priority first while keeping the sliding-window
//! average upload rate under a configured ceiling.
//!
//! ## Features
//!
//! - **Priority ordering**: critical before high before normal, FIFO within a
//!   priority, motion segments promoted to at least high
//! - **Bandwidth budgeting**: the scheduler pauses while the rolling average
//!   exceeds the configured Mbps
//! - **Idempotent transfers**: existing destination objects are skipped,
//!   large segments go through multipart uploads that are aborted on failure
//! - **Bounded retries**: transient failures are re-enqueued with exponential
//!   backoff from a single delay queue task
//!
//! ## Architecture
//!
//! ```text
//!  recorder / API              scheduler loop                 object store
//! ┌──────────────┐           ┌──────────────┐              ┌──────────────┐
//! │ enqueue()    │──────────▶│ SyncQueue    │              │ {prefix}/    │
//! │ force_sync() │           │ (priority)   │              │  {site}/     │
//! └──────────────┘           └──────────────┘              │  {camera}/   │
//!        │                          │                      │  {Y}/{M}/{D} │
//!        │                          ▼                      └──────────────┘
//!        │                   ┌──────────────┐                     ▲
//!        │                   │ Bandwidth    │                     │
//!        │                   │ Monitor      │                     │
//!        │                   └──────────────┘                     │
//!        │                          │                             │
//!        ▼                          ▼                             │
//! ┌──────────────┐           ┌──────────────┐                     │
//! │ Transfer     │◀──────────│ Retry        │                     │
//! │ Executor     │──────────▶│ Scheduler    │                     │
//! └──────────────┘  failure  └──────────────┘                     │
//!        │                                                        │
//!        └────────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod bandwidth;
pub mod config;
pub mod error;
pub mod metadata;
pub mod queue;
pub mod retry;
pub mod s3_store;
pub mod service;
pub mod stats;
pub mod store;
pub mod task;
pub mod transfer;

#[cfg(test)]
mod testing;

pub use api::AppState;
pub use bandwidth::{BandwidthMonitor, BandwidthSnapshot};
pub use config::Config;
pub use error::SyncError;
pub use queue::SyncQueue;
pub use retry::{RetryDecision, RetryPolicy, RetryScheduler};
pub use s3_store::S3ObjectStore;
pub use service::{CloudSyncService, SchedulerState, SyncStatus};
pub use stats::StatisticsSnapshot;
pub use store::ObjectStore;
pub use task::{Priority, SyncResult, SyncTask};
pub use transfer::{TransferExecutor, TransferSettings};
