//! The dedicated finalizer worker thread.

use crate::{
    interfaces::{CollectionMode, GcMode},
    os,
    runtime::FinalizerRuntime,
};
use ferrox_utils::{
    event::{Event, WaitOutcome},
    sync::Arc,
};
use std::thread;
use tracing::{debug, info};

/// Why the combined wait returned. Low-memory is listed first in the wait
/// array and is handled first when both sources fire at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Woken {
    LowMemory,
    Finalization,
    Timeout,
}

pub(crate) fn run(rt: Arc<FinalizerRuntime>) {
    let _ = rt.worker_thread.set(thread::current().id());
    debug!(target: "finalizer", "finalizer thread starting");
    // Startup handshake with the spawning thread.
    rt.signals.done.set();

    let mut priority_boosted = false;
    let mut platform_attached = false;

    while !rt.quit_requested() {
        rt.heap.set_finalizer_thread_mode(GcMode::Preemptive);
        wait_for_finalization_event(&rt);

        drain_pending_work(&rt);
        maybe_dump_heap(&rt);
        rt.gen_analysis().complete_if_done();

        if !priority_boosted && os::boost_current_thread_priority() {
            priority_boosted = true;
        }
        // Attachment is deferred to here so the runtime is known to be up;
        // one attempt, successful or not.
        if !platform_attached {
            platform_attached = true;
            rt.host.platform_attach();
        }
        rt.host.reclaim_memory();

        rt.heap.set_finalizer_thread_mode(GcMode::Cooperative);

        #[cfg(debug_assertions)]
        stress_quiesce(&rt);

        // Snapshot before draining: any object collectible at this instant
        // has either been queued already or will be seen by a later cycle,
        // so publishing this count is enough for barrier waiters.
        let observed_full_gc_count = rt.heap.collection_count(rt.heap.max_generation());

        debug!(target: "finalizer", "running queued finalizers");
        let finalizers_run = rt.runner.run_finalizers();
        debug!(target: "finalizer", count = finalizers_run, "finalizer batch complete");
        rt.metrics().record_cycle(finalizers_run);

        rt.publish_cycle_complete(observed_full_gc_count);
    }

    if platform_attached {
        rt.host.platform_detach();
    }
    rt.host.on_process_exit();
    rt.heap.set_finalizer_thread_mode(GcMode::Preemptive);
    debug!(target: "finalizer", "finalizer thread done");
    rt.signals.shutdown_complete.set();

    // Park rather than return: nothing keyed to this thread's lifetime may
    // observe an OS-level thread exit.
    loop {
        thread::park();
    }
}

/// Two-phase wait. The low-memory handle must not starve out finalization
/// (servicing pressure may be what unblocks it), so the finalization signal
/// always gets a 2-second slice to itself first, and again after every
/// pressure-triggered collection.
fn wait_for_finalization_event(rt: &FinalizerRuntime) {
    let slice = rt.config.finalization_wait_slice;
    if rt.signals.finalization.wait(Some(slice)) == WaitOutcome::Signaled {
        return;
    }

    loop {
        let low_memory = rt
            .low_memory
            .as_ref()
            .filter(|_| rt.host.runtime_started());
        let timeout = Some(rt.heap_dump_control().interval());

        let woken = match low_memory {
            Some(notification) => {
                let sources = [notification.event(), &rt.signals.finalization];
                match Event::wait_any(&sources, timeout) {
                    Some(0) => Woken::LowMemory,
                    Some(_) => Woken::Finalization,
                    None => Woken::Timeout,
                }
            }
            None => match rt.signals.finalization.wait(timeout) {
                WaitOutcome::Signaled => Woken::Finalization,
                WaitOutcome::TimedOut => Woken::Timeout,
            },
        };

        match woken {
            Woken::Finalization => return,
            Woken::LowMemory => {
                debug!(target: "finalizer", "low-memory notification, collecting generation 0");
                rt.heap.set_finalizer_thread_mode(GcMode::Cooperative);
                rt.heap.garbage_collect(0, true, CollectionMode::Default);
                rt.heap.set_finalizer_thread_mode(GcMode::Preemptive);
                rt.metrics().record_low_memory_collection();
                if rt.signals.finalization.wait(Some(slice)) == WaitOutcome::Signaled {
                    return;
                }
            }
            Woken::Timeout => {
                if rt.heap_dump_control().is_requested() {
                    return;
                }
            }
        }
    }
}

/// Run the collector's queued work callbacks, in list order.
fn drain_pending_work(rt: &FinalizerRuntime) {
    let mut head = rt.heap.take_pending_work();
    while let Some(item) = head {
        let crate::FinalizerWorkItem { next, callback } = *item;
        head = next;
        callback();
    }
}

fn maybe_dump_heap(rt: &FinalizerRuntime) {
    if !rt.heap_dump_control().take_due_request() {
        return;
    }
    info!(target: "finalizer", "heap-dump request due, collecting all generations");
    rt.heap.set_finalizer_thread_mode(GcMode::Cooperative);
    rt.heap
        .garbage_collect(rt.heap.max_generation(), false, CollectionMode::Blocking);
    rt.heap.set_finalizer_thread_mode(GcMode::Preemptive);
    rt.metrics().record_heap_dump();
}

/// Under heavy GC stress, hold off finalization until the system looks
/// quiescent: yield until a generation-0 count holds still across one yield.
#[cfg(debug_assertions)]
fn stress_quiesce(rt: &FinalizerRuntime) {
    if rt.config.gc_stress_level <= 1 {
        return;
    }
    loop {
        let before = rt.heap.collection_count(0);
        rt.heap.set_finalizer_thread_mode(GcMode::Preemptive);
        thread::yield_now();
        rt.heap.set_finalizer_thread_mode(GcMode::Cooperative);
        if rt.heap.collection_count(0).wrapping_sub(before) == 0 {
            break;
        }
    }
}
