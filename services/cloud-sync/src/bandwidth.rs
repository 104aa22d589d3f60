//! Sliding-window upload bandwidth monitor.
//!
//! Usage is the trailing-window average (bytes in the window divided by the
//! span since the oldest retained sample, floored at one second). It smooths
//! bursts and under-counts the very first burst after startup; it is not a
//! token bucket.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Throttle delays never exceed this many seconds
const MAX_THROTTLE_DELAY_SECS: f64 = 10.0;

/// Seconds of delay per unit of usage/limit ratio
const THROTTLE_DELAY_FACTOR: f64 = 2.0;

/// Point-in-time view of the monitor, computed under a single lock
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BandwidthSnapshot {
    pub usage_bytes_per_sec: f64,
    pub max_bytes_per_sec: f64,
    pub is_throttling: bool,
}

/// Tracks recent upload volume and decides when the scheduler should back off
pub struct BandwidthMonitor {
    max_bytes_per_second: f64,
    window: Duration,
    history: Mutex<VecDeque<(Instant, u64)>>,
}

impl BandwidthMonitor {
    pub fn new(max_bytes_per_second: f64, window: Duration) -> Self {
        Self {
            max_bytes_per_second,
            window,
            history: Mutex::new(VecDeque::new()),
        }
    }

    pub fn max_bytes_per_second(&self) -> f64 {
        self.max_bytes_per_second
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record bytes sent just now
    pub fn record(&self, bytes: u64) {
        self.record_at(Instant::now(), bytes);
    }

    pub fn record_at(&self, now: Instant, bytes: u64) {
        let mut history = self.history.lock();
        history.push_back((now, bytes));
        prune(&mut history, now, self.window);
    }

    /// Average bytes per second over the trailing window
    pub fn current_usage(&self) -> f64 {
        self.current_usage_at(Instant::now())
    }

    pub fn current_usage_at(&self, now: Instant) -> f64 {
        let mut history = self.history.lock();
        prune(&mut history, now, self.window);
        usage(&history, now)
    }

    pub fn should_throttle(&self) -> bool {
        self.should_throttle_at(Instant::now())
    }

    pub fn should_throttle_at(&self, now: Instant) -> bool {
        self.current_usage_at(now) > self.max_bytes_per_second
    }

    /// How long to hold off the next transfer; zero when under budget
    pub fn throttle_delay(&self) -> Duration {
        self.throttle_delay_at(Instant::now())
    }

    pub fn throttle_delay_at(&self, now: Instant) -> Duration {
        let current = self.current_usage_at(now);
        if current <= self.max_bytes_per_second {
            return Duration::ZERO;
        }

        let ratio = current / self.max_bytes_per_second;
        Duration::from_secs_f64((ratio * THROTTLE_DELAY_FACTOR).min(MAX_THROTTLE_DELAY_SECS))
    }

    pub fn snapshot(&self) -> BandwidthSnapshot {
        let usage_bytes_per_sec = self.current_usage();
        BandwidthSnapshot {
            usage_bytes_per_sec,
            max_bytes_per_sec: self.max_bytes_per_second,
            is_throttling: usage_bytes_per_sec > self.max_bytes_per_second,
        }
    }

    /// Number of samples currently retained
    pub fn sample_count(&self) -> usize {
        self.history.lock().len()
    }
}

/// Drop samples at or before `now - window`
fn prune(history: &mut VecDeque<(Instant, u64)>, now: Instant, window: Duration) {
    let Some(cutoff) = now.checked_sub(window) else {
        return;
    };
    while history.front().is_some_and(|(at, _)| *at <= cutoff) {
        history.pop_front();
    }
}

fn usage(history: &VecDeque<(Instant, u64)>, now: Instant) -> f64 {
    let Some((oldest, _)) = history.front() else {
        return 0.0;
    };

    let total: u64 = history.iter().map(|(_, bytes)| bytes).sum();
    let span = now.saturating_duration_since(*oldest).as_secs_f64().max(1.0);
    total as f64 / span
}

/// Convert bytes per second to megabits per second
pub fn bytes_per_sec_to_mbps(bytes_per_sec: f64) -> f64 {
    bytes_per_sec * 8.0 / (1024.0 * 1024.0)
}
