//! Traits the finalizer core calls across: the collector, the managed
//! finalizer runner, and the embedding host. All three are implemented
//! outside this crate; tests supply mocks.

/// The two collector-visibility modes a runtime thread can be in.
/// `Preemptive` allows the collector to suspend the thread at any point;
/// `Cooperative` means the thread must reach an explicit safe point first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcMode {
    Preemptive,
    Cooperative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollectionMode {
    #[default]
    Default,
    /// The caller requires the collection to have fully completed on return.
    Blocking,
}

/// Opaque reference to a heap object, as handed out by the collector's
/// finalization queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectHandle(pub u64);

/// One entry of the collector's pending-work list: a forward-linked chain of
/// callbacks the finalizer thread runs, in list order, at the start of each
/// cycle.
pub struct FinalizerWorkItem {
    pub next: Option<Box<FinalizerWorkItem>>,
    pub callback: Box<dyn FnOnce() + Send>,
}

impl FinalizerWorkItem {
    pub fn new(callback: impl FnOnce() + Send + 'static) -> Box<Self> {
        Box::new(Self {
            next: None,
            callback: Box::new(callback),
        })
    }
}

/// The collector, as seen from the finalizer thread.
pub trait GcHeap: Send + Sync + 'static {
    /// Index of the oldest generation. Collection counts for this
    /// generation are the "full GC" counts the barrier reasons about.
    fn max_generation(&self) -> u32;

    /// Monotonically increasing count of collections of `generation`.
    fn collection_count(&self, generation: u32) -> usize;

    /// Perform a synchronous collection of `generation`.
    fn garbage_collect(&self, generation: u32, forced: bool, mode: CollectionMode);

    /// Pop the next object from the finalization queue, if any.
    fn next_finalizable(&self) -> Option<ObjectHandle>;

    /// Take the head of the pending-work list. Ownership of the whole chain
    /// transfers to the caller.
    fn take_pending_work(&self) -> Option<Box<FinalizerWorkItem>>;

    /// Record the finalizer thread's current collector-visibility mode.
    fn set_finalizer_thread_mode(&self, mode: GcMode);
}

/// The managed side of finalization: runs every queued finalizer method to
/// completion and reports how many ran.
pub trait ManagedRunner: Send + Sync + 'static {
    fn run_finalizers(&self) -> u32;
}

/// Host hooks serviced on the finalizer thread. Everything defaults to a
/// no-op so embedders only implement what they care about.
pub trait FinalizerHost: Send + Sync + 'static {
    /// Memory reclamation hook invoked once per cycle (e.g. the JIT host
    /// releasing scratch memory).
    fn reclaim_memory(&self) {}

    /// One-shot per-process initialization deferred to the first cycle,
    /// once the runtime is known to be up.
    fn platform_attach(&self) {}

    /// Counterpart of [`FinalizerHost::platform_attach`], invoked when the
    /// worker shuts down.
    fn platform_detach(&self) {}

    /// Process-exit hook fired once, after the final cycle.
    fn on_process_exit(&self) {}

    /// Whether runtime startup has completed. Until it has, the worker does
    /// not service low-memory notifications.
    fn runtime_started(&self) -> bool {
        true
    }
}
