//! Run-level progress counters (spec §5): updated by workers, read by the
//! status endpoint. Atomic increments, snapshot reads — grounded in
//! `instrumentation.rs`'s `OperationStats`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

#[derive(Debug, Clone)]
pub struct RunProgress {
    inner: Arc<RunProgressInner>,
}

#[derive(Debug)]
struct RunProgressInner {
    total: AtomicU64,
    current: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    bytes_transferred: AtomicU64,
    started_at: Instant,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ProgressSnapshot {
    pub total: u64,
    pub current: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub bytes_transferred: u64,
    pub bytes_per_second: f64,
}

impl RunProgress {
    pub fn new(total: u64) -> Self {
        Self {
            inner: Arc::new(RunProgressInner {
                total: AtomicU64::new(total),
                current: AtomicU64::new(0),
                succeeded: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                skipped: AtomicU64::new(0),
                bytes_transferred: AtomicU64::new(0),
                started_at: Instant::now(),
            }),
        }
    }

    pub fn record_success(&self, bytes: u64) {
        self.inner.current.fetch_add(1, Ordering::Relaxed);
        self.inner.succeeded.fetch_add(1, Ordering::Relaxed);
        self.inner.bytes_transferred.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.inner.current.fetch_add(1, Ordering::Relaxed);
        self.inner.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skip(&self) {
        self.inner.current.fetch_add(1, Ordering::Relaxed);
        self.inner.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let elapsed = self.inner.started_at.elapsed().as_secs_f64();
        let bytes = self.inner.bytes_transferred.load(Ordering::Relaxed);
        ProgressSnapshot {
            total: self.inner.total.load(Ordering::Relaxed),
            current: self.inner.current.load(Ordering::Relaxed),
            succeeded: self.inner.succeeded.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
            skipped: self.inner.skipped.load(Ordering::Relaxed),
            bytes_transferred: bytes,
            bytes_per_second: if elapsed > 0.0 { bytes as f64 / elapsed } else { 0.0 },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_accumulate_across_outcomes() {
        let progress = RunProgress::new(3);
        progress.record_success(100);
        progress.record_failure();
        progress.record_skip();

        let snap = progress.snapshot();
        assert_eq!(snap.total, 3);
        assert_eq!(snap.current, 3);
        assert_eq!(snap.succeeded, 1);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.skipped, 1);
        assert_eq!(snap.bytes_transferred, 100);
    }

    #[test]
    fn clone_shares_the_same_counters() {
        let progress = RunProgress::new(1);
        let handle = progress.clone();
        handle.record_success(50);
        assert_eq!(progress.snapshot().bytes_transferred, 50);
    }
}
