//! Metrics registry for the gateway
//!
//! - Counters only
//! - Monotonic increase
//! - Reset only on process start

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Metrics registry containing all gateway counters
///
/// All counters use Relaxed ordering; readers only need eventually
/// consistent totals.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    uploads: AtomicU64,
    upload_failures: AtomicU64,
    downloads: AtomicU64,
    deletes: AtomicU64,
    delete_failures: AtomicU64,
    not_found: AtomicU64,
    /// One slot per configured backend
    assignments: Vec<AtomicU64>,
}

impl MetricsRegistry {
    /// Create a registry with all counters at zero for `backend_count` backends
    pub fn new(backend_count: usize) -> Self {
        Self {
            assignments: (0..backend_count).map(|_| AtomicU64::new(0)).collect(),
            ..Self::default()
        }
    }

    pub fn increment_uploads(&self) {
        self.uploads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_upload_failures(&self) {
        self.upload_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_downloads(&self) {
        self.downloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_deletes(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_delete_failures(&self) {
        self.delete_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_not_found(&self) {
        self.not_found.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an assignment to backend `index`. Out of range indexes are ignored.
    pub fn record_assignment(&self, index: usize) {
        if let Some(slot) = self.assignments.get(index) {
            slot.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn assignments(&self, index: usize) -> u64 {
        self.assignments
            .get(index)
            .map(|slot| slot.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uploads: self.uploads.load(Ordering::Relaxed),
            upload_failures: self.upload_failures.load(Ordering::Relaxed),
            downloads: self.downloads.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            delete_failures: self.delete_failures.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            backend_assignments: self
                .assignments
                .iter()
                .map(|slot| slot.load(Ordering::Relaxed))
                .collect(),
        }
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub uploads: u64,
    pub upload_failures: u64,
    pub downloads: u64,
    pub deletes: u64,
    pub delete_failures: u64,
    pub not_found: u64,
    pub backend_assignments: Vec<u64>,
}
