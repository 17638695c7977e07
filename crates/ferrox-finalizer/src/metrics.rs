use ferrox_utils::sync::{AtomicU64, Ordering};
use serde::Serialize;

/// Finalizer counters.
///
/// All counters use `Ordering::Relaxed` because they are independent and do
/// not synchronize memory between threads; we only need the updates
/// themselves to be atomic.
#[derive(Debug, Default)]
pub struct FinalizerMetrics {
    /// Completed finalization cycles
    pub cycles: AtomicU64,
    /// Total finalizer methods executed across all cycles
    pub finalizers_run: AtomicU64,
    /// Generation-0 collections triggered by low-memory wake-ups
    pub low_memory_collections: AtomicU64,
    /// Blocking full collections triggered by heap-dump requests
    pub heap_dumps: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct FinalizerMetricsSnapshot {
    pub cycles: u64,
    pub finalizers_run: u64,
    pub low_memory_collections: u64,
    pub heap_dumps: u64,
}

impl FinalizerMetrics {
    pub(crate) fn record_cycle(&self, finalizers_run: u32) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.finalizers_run
            .fetch_add(u64::from(finalizers_run), Ordering::Relaxed);
    }

    pub(crate) fn record_low_memory_collection(&self) {
        self.low_memory_collections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_heap_dump(&self) {
        self.heap_dumps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> FinalizerMetricsSnapshot {
        FinalizerMetricsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            finalizers_run: self.finalizers_run.load(Ordering::Relaxed),
            low_memory_collections: self.low_memory_collections.load(Ordering::Relaxed),
            heap_dumps: self.heap_dumps.load(Ordering::Relaxed),
        }
    }
}
