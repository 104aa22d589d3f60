use crate::bandwidth::bytes_per_sec_to_mbps;
use crate::task::SyncResult;
use parking_lot::Mutex;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Default)]
struct Counters {
    total_attempts: u64,
    successful: u64,
    failed_attempts: u64,
    already_present: u64,
    retries_scheduled: u64,
    retries_exhausted: u64,
    sources_missing: u64,
    total_bytes: u64,
    total_transfer_time: Duration,
}

/// Cumulative statistics, serialized for the status endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatisticsSnapshot {
    pub total_attempts: u64,
    pub successful: u64,
    pub failed_attempts: u64,
    /// Successes where the destination already held the object
    pub already_present: u64,
    pub retries_scheduled: u64,
    /// Tasks dropped after using up their retry budget
    pub retries_exhausted: u64,
    /// Tasks dropped because the source disappeared
    pub sources_missing: u64,
    pub total_bytes: u64,
    pub total_transfer_secs: f64,
    /// Percentage of attempts that succeeded
    pub success_rate: f64,
    pub average_throughput_bytes_per_sec: f64,
    pub average_throughput_mbps: f64,
}

/// Counters for every attempt the service makes, mirrored into `metrics`
#[derive(Debug, Default)]
pub struct SyncStatistics {
    counters: Mutex<Counters>,
}

impl SyncStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&self, result: &SyncResult) {
        {
            let mut counters = self.counters.lock();
            counters.total_attempts += 1;
            counters.total_transfer_time += result.duration;
            if result.success() {
                counters.successful += 1;
                counters.total_bytes += result.bytes_transferred;
                if result.bytes_transferred == 0 {
                    counters.already_present += 1;
                }
            } else {
                counters.failed_attempts += 1;
            }
        }

        if result.success() {
            metrics::counter!("cloud_sync.transfers.succeeded").increment(1);
            metrics::counter!("cloud_sync.bytes").increment(result.bytes_transferred);
            metrics::histogram!("cloud_sync.transfer.duration_seconds")
                .record(result.duration.as_secs_f64());
        } else {
            metrics::counter!("cloud_sync.transfers.failed").increment(1);
        }
    }

    pub fn record_retry_scheduled(&self) {
        self.counters.lock().retries_scheduled += 1;
        metrics::counter!("cloud_sync.retries.scheduled").increment(1);
    }

    pub fn record_retries_exhausted(&self) {
        self.counters.lock().retries_exhausted += 1;
        metrics::counter!("cloud_sync.transfers.dropped", "reason" => "retries_exhausted")
            .increment(1);
    }

    pub fn record_source_missing(&self) {
        self.counters.lock().sources_missing += 1;
        metrics::counter!("cloud_sync.transfers.dropped", "reason" => "source_missing")
            .increment(1);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        let counters = self.counters.lock();
        let total_transfer_secs = counters.total_transfer_time.as_secs_f64();

        let success_rate = if counters.total_attempts > 0 {
            counters.successful as f64 / counters.total_attempts as f64 * 100.0
        } else {
            0.0
        };
        let average_throughput_bytes_per_sec = if total_transfer_secs > 0.0 {
            counters.total_bytes as f64 / total_transfer_secs
        } else {
            0.0
        };

        StatisticsSnapshot {
            total_attempts: counters.total_attempts,
            successful: counters.successful,
            failed_attempts: counters.failed_attempts,
            already_present: counters.already_present,
            retries_scheduled: counters.retries_scheduled,
            retries_exhausted: counters.retries_exhausted,
            sources_missing: counters.sources_missing,
            total_bytes: counters.total_bytes,
            total_transfer_secs,
            success_rate,
            average_throughput_bytes_per_sec,
            average_throughput_mbps: bytes_per_sec_to_mbps(average_throughput_bytes_per_sec),
        }
    }
}
