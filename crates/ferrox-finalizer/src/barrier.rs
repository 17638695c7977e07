//! The finalization barrier: wait until a cycle has completed whose
//! pre-drain full-GC count covers the caller's view of the heap.

use crate::runtime::FinalizerRuntime;
use ferrox_utils::sync::Ordering;
use tracing::{trace, warn};

/// Difference between two full-GC counts under wraparound. The counts are
/// size-typed and can in theory wrap; unsigned subtraction reinterpreted as
/// signed gives defined, portable behavior in that case. A positive result
/// means `desired` collections have not all been observed yet.
pub(crate) fn unsigned_gc_distance(desired: usize, seen: usize) -> isize {
    desired.wrapping_sub(seen) as isize
}

impl FinalizerRuntime {
    /// Block until at least one full finalization cycle has completed whose
    /// pre-drain full-GC count is at or beyond the count observed on entry.
    ///
    /// A completed cycle may predate objects that became finalizer-reachable
    /// in recent collections; only full collections reclaim deterministically,
    /// so the loop keys on the full-GC count and retries until a cycle has
    /// provably seen enough of them.
    ///
    /// Calling from the finalizer thread itself is a no-op.
    pub fn wait_for_cycle(&self) {
        if self.is_current_thread_finalizer() {
            warn!(target: "finalizer", "wait_for_cycle called from the finalizer thread, ignoring");
            return;
        }

        let desired = self.heap.collection_count(self.heap.max_generation());
        loop {
            self.signals.done.reset();
            self.enable_finalization();

            // Under GC stress the queue may never drain as collections keep
            // refilling it; hold stress off for the duration of the wait.
            let _inhibit = StressInhibitGuard::new(self);

            let _ = self.signals.done.wait(None);

            let seen = self.observed_full_gc_count.load(Ordering::Acquire);
            if unsigned_gc_distance(desired, seen) > 0 {
                trace!(
                    target: "finalizer",
                    desired, seen,
                    "cycle predates our view of the heap, waiting for another"
                );
                continue;
            }
            return;
        }
    }
}

struct StressInhibitGuard<'rt> {
    runtime: &'rt FinalizerRuntime,
}

impl<'rt> StressInhibitGuard<'rt> {
    fn new(runtime: &'rt FinalizerRuntime) -> Self {
        runtime
            .stress_inhibitors
            .fetch_add(1, Ordering::AcqRel);
        Self { runtime }
    }
}

impl Drop for StressInhibitGuard<'_> {
    fn drop(&mut self) {
        self.runtime.stress_inhibitors.fetch_sub(1, Ordering::AcqRel);
    }
}
