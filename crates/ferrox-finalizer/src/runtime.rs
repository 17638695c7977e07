//! The finalizer runtime: grouped process-wide state and the public entry
//! points bound to it.

use crate::{
    FinalizerError, GenAnalysisControl, HeapDumpControl, LowMemoryNotification,
    interfaces::{FinalizerHost, GcHeap, ManagedRunner},
    metrics::FinalizerMetrics,
    worker,
};
use ferrox_utils::{
    event::Event,
    sync::{Arc, AtomicBool, AtomicUsize, OnceLock, Ordering},
};
use std::{thread, time::Duration};
use tracing::debug;

/// Tunables for the finalizer core. The defaults match the long-standing
/// production values; tests shrink the wait slice to keep wall-clock time
/// down.
#[derive(Debug, Clone)]
pub struct FinalizerConfig {
    /// GC-stress level; the debug-only quiescence probe engages above 1.
    pub gc_stress_level: u32,
    /// How long the worker waits on the finalization signal alone before
    /// including the low-memory handle in its wait.
    pub finalization_wait_slice: Duration,
    /// Minimum spacing between heap-dump collections; also the timeout of
    /// the worker's combined wait so a pending dump request is noticed.
    pub heap_dump_interval: Duration,
    /// Path template for the gen-analysis completion file; `%p` expands to
    /// the current process id.
    pub gen_analysis_completion_template: Option<String>,
}

impl Default for FinalizerConfig {
    fn default() -> Self {
        Self {
            gc_stress_level: 0,
            finalization_wait_slice: Duration::from_millis(2000),
            heap_dump_interval: Duration::from_millis(10_000),
            gen_analysis_completion_template: None,
        }
    }
}

impl FinalizerConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(level) = std::env::var("FERROX_GC_STRESS")
            && let Ok(level) = level.parse()
        {
            config.gc_stress_level = level;
        }
        config
    }
}

pub(crate) struct FinalizerSignals {
    /// Auto-reset; any thread sets it to request a cycle.
    pub(crate) finalization: Event,
    /// Manual-reset; set by the worker at the end of every cycle, reset by
    /// barrier waiters before they wait.
    pub(crate) done: Event,
    /// Auto-reset; set once by the worker after its final cycle.
    pub(crate) shutdown_complete: Event,
}

/// Process-wide finalizer state. Constructed once at runtime startup via
/// [`FinalizerRuntime::spawn`]; there is exactly one worker thread per
/// instance, and it lives for the life of the process.
pub struct FinalizerRuntime {
    pub(crate) heap: Arc<dyn GcHeap>,
    pub(crate) runner: Arc<dyn ManagedRunner>,
    pub(crate) host: Arc<dyn FinalizerHost>,
    pub(crate) config: FinalizerConfig,
    pub(crate) signals: FinalizerSignals,
    pub(crate) low_memory: Option<LowMemoryNotification>,
    pub(crate) quit_requested: AtomicBool,
    pub(crate) observed_full_gc_count: AtomicUsize,
    pub(crate) worker_thread: OnceLock<thread::ThreadId>,
    pub(crate) stress_inhibitors: AtomicUsize,
    heap_dump: HeapDumpControl,
    gen_analysis: GenAnalysisControl,
    metrics: FinalizerMetrics,
}

impl FinalizerRuntime {
    /// Create the signal set, spawn the dedicated worker thread, and wait
    /// for it to come up. On return the worker has registered itself and is
    /// parked on its first wait.
    pub fn spawn(
        heap: Arc<dyn GcHeap>,
        runner: Arc<dyn ManagedRunner>,
        host: Arc<dyn FinalizerHost>,
        low_memory: Option<LowMemoryNotification>,
        config: FinalizerConfig,
    ) -> Result<Arc<Self>, FinalizerError> {
        let runtime = Arc::new(Self {
            heap,
            runner,
            host,
            signals: FinalizerSignals {
                finalization: Event::auto_reset(),
                done: Event::manual_reset(),
                shutdown_complete: Event::auto_reset(),
            },
            low_memory,
            quit_requested: AtomicBool::new(false),
            observed_full_gc_count: AtomicUsize::new(0),
            worker_thread: OnceLock::new(),
            stress_inhibitors: AtomicUsize::new(0),
            heap_dump: HeapDumpControl::new(config.heap_dump_interval),
            gen_analysis: GenAnalysisControl::new(config.gen_analysis_completion_template.clone()),
            metrics: FinalizerMetrics::default(),
            config,
        });

        let for_worker = Arc::clone(&runtime);
        thread::Builder::new()
            .name("ferrox-finalizer".into())
            .spawn(move || worker::run(for_worker))?;

        // Startup handshake: the worker publishes its identity and signals
        // the done event before entering its loop.
        let _ = runtime.signals.done.wait(None);
        runtime.signals.done.reset();

        Ok(runtime)
    }

    /// Ask the worker to run a cycle. Called by the collector whenever the
    /// finalization queue becomes non-empty, and by the barrier.
    pub fn enable_finalization(&self) {
        self.signals.finalization.set();
    }

    pub fn is_current_thread_finalizer(&self) -> bool {
        self.worker_thread.get().copied() == Some(thread::current().id())
    }

    /// The full-GC count published by the most recently completed cycle.
    pub fn observed_full_gc_count(&self) -> usize {
        self.observed_full_gc_count.load(Ordering::Acquire)
    }

    /// Request a heap-dump collection on the worker thread.
    pub fn request_heap_dump(&self) {
        self.heap_dump.request();
        self.enable_finalization();
    }

    pub fn gen_analysis(&self) -> &GenAnalysisControl {
        &self.gen_analysis
    }

    pub(crate) fn heap_dump_control(&self) -> &HeapDumpControl {
        &self.heap_dump
    }

    pub fn metrics(&self) -> &FinalizerMetrics {
        &self.metrics
    }

    /// Whether GC-stress machinery should currently hold off. True while
    /// any thread is inside [`FinalizerRuntime::wait_for_cycle`].
    pub fn gc_stress_inhibited(&self) -> bool {
        self.stress_inhibitors.load(Ordering::Acquire) > 0
    }

    /// Begin shutdown: stop the worker after at most one more drain and
    /// block until it has signalled completion. The worker thread itself is
    /// parked, not destroyed. Later calls return immediately.
    pub fn shutdown_and_wait_for_exit(&self) {
        if self.quit_requested.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(target: "finalizer", "shutdown requested, waking the finalizer thread");
        self.signals.finalization.set();
        let _ = self.signals.shutdown_complete.wait(None);
    }

    pub(crate) fn quit_requested(&self) -> bool {
        self.quit_requested.load(Ordering::Acquire)
    }

    pub(crate) fn publish_cycle_complete(&self, observed_full_gc_count: usize) {
        self.observed_full_gc_count
            .store(observed_full_gc_count, Ordering::Release);
        self.signals.done.set();
    }
}

impl std::fmt::Debug for FinalizerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinalizerRuntime")
            .field("quit_requested", &self.quit_requested)
            .field("observed_full_gc_count", &self.observed_full_gc_count)
            .finish_non_exhaustive()
    }
}
