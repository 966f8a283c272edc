use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Monotonic event count.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Number of timed operations and their summed wall time.
#[derive(Debug, Default)]
pub struct Timing {
    count: AtomicU64,
    total_ns: AtomicU64,
}

impl Timing {
    pub fn record(&self, elapsed: Duration) {
        let ns = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_ns.fetch_add(ns, Ordering::Relaxed);
    }

    /// Times until the returned guard is dropped.
    pub fn start(&self) -> TimingGuard<'_> {
        TimingGuard {
            timing: self,
            started: Instant::now(),
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn mean(&self) -> Duration {
        match self.count() {
            0 => Duration::ZERO,
            n => Duration::from_nanos(self.total_ns.load(Ordering::Relaxed) / n),
        }
    }
}

pub struct TimingGuard<'a> {
    timing: &'a Timing,
    started: Instant,
}

impl Drop for TimingGuard<'_> {
    fn drop(&mut self) {
        self.timing.record(self.started.elapsed());
    }
}
