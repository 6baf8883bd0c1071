//! Counters collected while a batch runs.
//!
//! [`BatchMetrics`] is shared by reference between the orchestrator and
//! every in-flight conversion; all updates are lock-free. A frozen
//! [`MetricsSnapshot`] is attached to each [`BatchResult`](crate::batch::BatchResult)
//! and can be printed or saved as JSON.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Live counters for one batch.
#[derive(Debug, Default)]
pub struct BatchMetrics {
    objects_listed: AtomicU64,
    objects_attempted: AtomicU64,
    objects_converted: AtomicU64,
    objects_failed: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl BatchMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_listed(&self, count: usize) {
        self.objects_listed.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_attempt(&self) {
        self.objects_attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outcome(&self, success: bool) {
        let counter = if success {
            &self.objects_converted
        } else {
            &self.objects_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read(&self, bytes: usize) {
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_write(&self, bytes: usize) {
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Count one task as in flight until the guard drops.
    #[must_use]
    pub fn enter_task(&self) -> InFlightGuard<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlightGuard { metrics: self }
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Freeze the counters. Cache figures come from the reader, if it caches.
    #[must_use]
    pub fn snapshot(&self, cache_hits: u64, cache_misses: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            objects_listed: self.objects_listed.load(Ordering::Relaxed),
            objects_attempted: self.objects_attempted.load(Ordering::Relaxed),
            objects_converted: self.objects_converted.load(Ordering::Relaxed),
            objects_failed: self.objects_failed.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            cache_hits,
            cache_misses,
            peak_in_flight: self.peak_in_flight(),
        }
    }
}

/// Decrements the in-flight gauge on drop, including during unwinding.
pub struct InFlightGuard<'a> {
    metrics: &'a BatchMetrics,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.metrics.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Point-in-time copy of [`BatchMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub objects_listed: u64,
    pub objects_attempted: u64,
    pub objects_converted: u64,
    pub objects_failed: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub peak_in_flight: usize,
}

impl MetricsSnapshot {
    #[must_use]
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Write the snapshot as pretty-printed JSON.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or written.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let formatted = serde_json::to_string_pretty(self)?;
        let mut file =
            File::create(path).with_context(|| format!("create {}", path.display()))?;
        file.write_all(formatted.as_bytes())
            .with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gauge_tracks_peak() {
        let metrics = BatchMetrics::new();
        {
            let _a = metrics.enter_task();
            let _b = metrics.enter_task();
            assert_eq!(metrics.in_flight(), 2);
        }
        let _c = metrics.enter_task();
        assert_eq!(metrics.in_flight(), 1);
        assert_eq!(metrics.peak_in_flight(), 2);
    }

    #[test]
    fn snapshot_copies_counters() {
        let metrics = BatchMetrics::new();
        metrics.record_listed(3);
        metrics.record_attempt();
        metrics.record_attempt();
        metrics.record_outcome(true);
        metrics.record_outcome(false);
        metrics.record_read(10);
        metrics.record_write(25);

        let snap = metrics.snapshot(4, 1);
        assert_eq!(snap.objects_listed, 3);
        assert_eq!(snap.objects_attempted, 2);
        assert_eq!(snap.objects_converted, 1);
        assert_eq!(snap.objects_failed, 1);
        assert_eq!(snap.bytes_read, 10);
        assert_eq!(snap.bytes_written, 25);
        assert_eq!(snap.cache_hits, 4);
        assert_eq!(snap.to_json()["cache_misses"], 1);
    }

    #[test]
    fn snapshot_saves_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let snap = MetricsSnapshot {
            objects_converted: 7,
            ..MetricsSnapshot::default()
        };
        snap.save_to_file(&path).unwrap();

        let loaded: MetricsSnapshot =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded, snap);
    }
}
