use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Request accounting for the `/stats` endpoint. `record_request` is called
/// once per incoming request by the dispatcher's counting middleware;
/// `throughput_per_minute` derives requests-per-minute from the delta since
/// the last time it was read, rather than keeping a dedicated ticking
/// average, since `/stats` is polled infrequently enough that this is cheap.
pub struct Stats {
    start_time: DateTime<Utc>,
    requests: AtomicU64,
    last_sample: Mutex<(DateTime<Utc>, u64)>,
}

impl Stats {
    pub fn new() -> Stats {
        let now = Utc::now();

        Stats {
            start_time: now,
            requests: AtomicU64::new(0),
            last_sample: Mutex::new((now, 0)),
        }
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.start_time).num_seconds().max(0)
    }

    /// Requests observed per minute since the previous call to this method.
    pub fn throughput_per_minute(&self) -> u64 {
        let now = Utc::now();
        let total = self.requests.load(Ordering::Relaxed);

        let mut sample = self.last_sample.lock();
        let (last_time, last_total) = *sample;

        let elapsed_minutes = (now - last_time).num_milliseconds() as f64 / 60_000.0;
        let delta = total.saturating_sub(last_total);

        *sample = (now, total);

        if elapsed_minutes <= 0.0 {
            0
        } else {
            (delta as f64 / elapsed_minutes).round() as u64
        }
    }
}

impl Default for Stats {
    fn default() -> Stats {
        Stats::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_starts_near_zero() {
        let stats = Stats::new();
        assert!(stats.uptime_seconds() < 2);
    }

    #[test]
    fn throughput_reflects_recorded_requests() {
        let stats = Stats::new();
        // force the first sample window to be non-zero
        stats.last_sample.lock().0 = Utc::now() - chrono::Duration::seconds(60);

        for _ in 0..30 {
            stats.record_request();
        }

        let rpm = stats.throughput_per_minute();
        assert!(rpm > 0);
    }
}
