//! Counters for row and configuration traffic
//!
//! - Counters only, monotonic
//! - Relaxed atomics; exactness across threads is not required

use std::sync::atomic::{AtomicU64, Ordering};

/// Operational counters shared by a client
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    row_writes: AtomicU64,
    row_reads: AtomicU64,
    lock_conflicts: AtomicU64,
    version_conflicts: AtomicU64,
    retriable_failures: AtomicU64,
    rows_repaired: AtomicU64,
    quorum_reads: AtomicU64,
    quorum_writes: AtomicU64,
    quorum_failures: AtomicU64,
    view_mutations: AtomicU64,
}

impl MetricsRegistry {
    /// Create a new registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_row_writes(&self) {
        self.row_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_row_reads(&self) {
        self.row_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_lock_conflicts(&self) {
        self.lock_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_version_conflicts(&self) {
        self.version_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_retriable_failures(&self) {
        self.retriable_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_rows_repaired(&self, rows: u64) {
        self.rows_repaired.fetch_add(rows, Ordering::Relaxed);
    }

    pub fn increment_quorum_reads(&self) {
        self.quorum_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_quorum_writes(&self) {
        self.quorum_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_quorum_failures(&self) {
        self.quorum_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_view_mutations(&self) {
        self.view_mutations.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            row_writes: self.row_writes.load(Ordering::Relaxed),
            row_reads: self.row_reads.load(Ordering::Relaxed),
            lock_conflicts: self.lock_conflicts.load(Ordering::Relaxed),
            version_conflicts: self.version_conflicts.load(Ordering::Relaxed),
            retriable_failures: self.retriable_failures.load(Ordering::Relaxed),
            rows_repaired: self.rows_repaired.load(Ordering::Relaxed),
            quorum_reads: self.quorum_reads.load(Ordering::Relaxed),
            quorum_writes: self.quorum_writes.load(Ordering::Relaxed),
            quorum_failures: self.quorum_failures.load(Ordering::Relaxed),
            view_mutations: self.view_mutations.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub row_writes: u64,
    pub row_reads: u64,
    pub lock_conflicts: u64,
    pub version_conflicts: u64,
    pub retriable_failures: u64,
    pub rows_repaired: u64,
    pub quorum_reads: u64,
    pub quorum_writes: u64,
    pub quorum_failures: u64,
    pub view_mutations: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registry_is_zero() {
        assert_eq!(MetricsRegistry::new().snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_counters() {
        let registry = MetricsRegistry::new();
        registry.increment_row_writes();
        registry.increment_row_writes();
        registry.increment_lock_conflicts();
        registry.add_rows_repaired(5);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.row_writes, 2);
        assert_eq!(snapshot.lock_conflicts, 1);
        assert_eq!(snapshot.rows_repaired, 5);
    }

    #[test]
    fn test_thread_safety() {
        use std::sync::Arc;
        use std::thread;

        let registry = Arc::new(MetricsRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = Arc::clone(&registry);
                thread::spawn(move || {
                    for _ in 0..100 {
                        reg.increment_row_reads();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.snapshot().row_reads, 800);
    }
}
