//! End-to-end tests of the finalizer runtime against mock collaborators.

use ferrox_finalizer::{
    CollectionMode, FinalizerConfig, FinalizerHost, FinalizerRuntime, FinalizerWorkItem, GcHeap,
    GcMode, GenAnalysisState, LowMemoryNotification, ManagedRunner, ObjectHandle, replace_pid,
};
use ferrox_utils::event::Event;
use ferrox_utils::sync::{Arc, AtomicBool, AtomicU32, Mutex, Ordering};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

fn fast_config() -> FinalizerConfig {
    // Worker output is visible with RUST_LOG=finalizer=debug.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    FinalizerConfig {
        finalization_wait_slice: Duration::from_millis(10),
        heap_dump_interval: Duration::from_millis(100),
        ..FinalizerConfig::default()
    }
}

/// Spin until `condition` holds or the timeout elapses.
fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[derive(Default)]
struct MockHeap {
    /// Per-generation collection counts; index = generation.
    counts: Mutex<[usize; 3]>,
    /// Scripted return values for max-generation count queries, consumed in
    /// call order; once exhausted, queries fall back to `counts`.
    full_count_script: Mutex<VecDeque<usize>>,
    pending: Mutex<Option<Box<FinalizerWorkItem>>>,
    queue: Mutex<Vec<ObjectHandle>>,
    collections: Mutex<Vec<(u32, bool, CollectionMode)>>,
    event_log: Arc<Mutex<Vec<String>>>,
}

impl MockHeap {
    fn set_full_count(&self, count: usize) {
        self.counts.lock()[2] = count;
    }

    fn script_full_counts(&self, counts: impl IntoIterator<Item = usize>) {
        self.full_count_script.lock().extend(counts);
    }

    fn enqueue_work(&self, callback: impl FnOnce() + Send + 'static) {
        let mut item = FinalizerWorkItem::new(callback);
        let mut pending = self.pending.lock();
        item.next = pending.take();
        *pending = Some(item);
    }

    /// Append `callbacks` so they run in the given order.
    fn enqueue_work_chain(&self, callbacks: Vec<Box<dyn FnOnce() + Send>>) {
        let mut head: Option<Box<FinalizerWorkItem>> = None;
        for callback in callbacks.into_iter().rev() {
            let mut item = Box::new(FinalizerWorkItem {
                next: None,
                callback,
            });
            item.next = head.take();
            head = Some(item);
        }
        *self.pending.lock() = head;
    }

    fn collections(&self) -> Vec<(u32, bool, CollectionMode)> {
        self.collections.lock().clone()
    }
}

impl GcHeap for MockHeap {
    fn max_generation(&self) -> u32 {
        2
    }

    fn collection_count(&self, generation: u32) -> usize {
        if generation == 2
            && let Some(scripted) = self.full_count_script.lock().pop_front()
        {
            return scripted;
        }
        self.counts.lock()[generation as usize]
    }

    fn garbage_collect(&self, generation: u32, forced: bool, mode: CollectionMode) {
        self.collections.lock().push((generation, forced, mode));
        let mut counts = self.counts.lock();
        for gen_idx in 0..=generation as usize {
            counts[gen_idx] += 1;
        }
    }

    fn next_finalizable(&self) -> Option<ObjectHandle> {
        self.queue.lock().pop()
    }

    fn take_pending_work(&self) -> Option<Box<FinalizerWorkItem>> {
        self.pending.lock().take()
    }

    fn set_finalizer_thread_mode(&self, mode: GcMode) {
        self.event_log.lock().push(format!("mode:{mode:?}"));
    }
}

struct MockRunner {
    calls: AtomicU32,
    results: Mutex<VecDeque<u32>>,
    event_log: Arc<Mutex<Vec<String>>>,
    /// When present: signal `started` and block on `gate` inside each run.
    gate: Option<(Event, Event)>,
}

impl MockRunner {
    fn returning(results: impl IntoIterator<Item = u32>, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            calls: AtomicU32::new(0),
            results: Mutex::new(results.into_iter().collect()),
            event_log: log,
            gate: None,
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::Acquire)
    }
}

impl ManagedRunner for MockRunner {
    fn run_finalizers(&self) -> u32 {
        self.calls.fetch_add(1, Ordering::AcqRel);
        self.event_log.lock().push("run".into());
        if let Some((started, gate)) = &self.gate {
            started.set();
            let _ = gate.wait(Some(Duration::from_secs(5)));
        }
        self.results.lock().pop_front().unwrap_or(0)
    }
}

#[derive(Default)]
struct MockHost {
    attaches: AtomicU32,
    detaches: AtomicU32,
    exits: AtomicU32,
}

impl FinalizerHost for MockHost {
    fn platform_attach(&self) {
        self.attaches.fetch_add(1, Ordering::AcqRel);
    }
    fn platform_detach(&self) {
        self.detaches.fetch_add(1, Ordering::AcqRel);
    }
    fn on_process_exit(&self) {
        self.exits.fetch_add(1, Ordering::AcqRel);
    }
}

struct Fixture {
    heap: Arc<MockHeap>,
    runner: Arc<MockRunner>,
    host: Arc<MockHost>,
    log: Arc<Mutex<Vec<String>>>,
}

impl Fixture {
    fn new(results: impl IntoIterator<Item = u32>) -> Self {
        let log = Arc::new(Mutex::new(Vec::new()));
        let heap = Arc::new(MockHeap {
            event_log: log.clone(),
            ..MockHeap::default()
        });
        let runner = Arc::new(MockRunner::returning(results, log.clone()));
        Self {
            heap,
            runner,
            host: Arc::new(MockHost::default()),
            log,
        }
    }

    fn spawn(&self, low_memory: Option<LowMemoryNotification>) -> Arc<FinalizerRuntime> {
        self.spawn_with(low_memory, fast_config())
    }

    fn spawn_with(
        &self,
        low_memory: Option<LowMemoryNotification>,
        config: FinalizerConfig,
    ) -> Arc<FinalizerRuntime> {
        FinalizerRuntime::spawn(
            self.heap.clone(),
            self.runner.clone(),
            self.host.clone(),
            low_memory,
            config,
        )
        .expect("finalizer thread spawns")
    }
}

#[test]
fn simple_drain_runs_finalizers_and_releases_waiter() {
    let fixture = Fixture::new([3]);
    fixture.heap.set_full_count(5);
    let rt = fixture.spawn(None);

    assert!(!rt.is_current_thread_finalizer());
    rt.wait_for_cycle();

    assert_eq!(fixture.runner.calls(), 1);
    let snapshot = rt.metrics().snapshot();
    assert_eq!(snapshot.cycles, 1);
    assert_eq!(snapshot.finalizers_run, 3);
    assert_eq!(rt.observed_full_gc_count(), 5);

    // The worker holds preemptive mode across its wait and only enters
    // cooperative mode for the managed drain.
    let log = fixture.log.lock().clone();
    let preemptive = log.iter().position(|e| e == "mode:Preemptive").unwrap();
    let cooperative = log.iter().position(|e| e == "mode:Cooperative").unwrap();
    let run = log.iter().position(|e| e == "run").unwrap();
    assert!(preemptive < cooperative);
    assert!(cooperative < run);

    rt.shutdown_and_wait_for_exit();
}

#[test]
fn pre_drain_snapshot_covers_racing_full_collection() {
    let fixture = Fixture::new([0]);
    fixture.heap.set_full_count(7);
    let rt = fixture.spawn(None);

    // A full collection lands after the waiter samples its desired count but
    // before the worker snapshots: modelled as a pending work item, which the
    // worker runs ahead of the snapshot.
    let heap = fixture.heap.clone();
    fixture.heap.enqueue_work(move || heap.set_full_count(8));

    rt.wait_for_cycle();

    // The published count includes the racing collection, so the waiter did
    // not need a second cycle.
    assert_eq!(rt.observed_full_gc_count(), 8);
    assert_eq!(fixture.runner.calls(), 1);

    rt.shutdown_and_wait_for_exit();
}

#[test]
fn insufficient_observation_retries_until_covered() {
    let fixture = Fixture::new([0, 0]);
    // Waiter samples 7; the first cycle publishes a stale 6 (snapshotted
    // before the waiter's signal was seen); the second publishes 7.
    fixture.heap.script_full_counts([7, 6, 7]);
    let rt = fixture.spawn(None);

    rt.wait_for_cycle();

    assert_eq!(fixture.runner.calls(), 2);
    assert_eq!(rt.observed_full_gc_count(), 7);

    rt.shutdown_and_wait_for_exit();
}

#[test]
fn pending_work_runs_in_list_order() {
    let fixture = Fixture::new([0]);
    let order = Arc::new(Mutex::new(Vec::new()));
    let callbacks: Vec<Box<dyn FnOnce() + Send>> = (1..=3)
        .map(|n| {
            let order = order.clone();
            Box::new(move || order.lock().push(n)) as Box<dyn FnOnce() + Send>
        })
        .collect();
    fixture.heap.enqueue_work_chain(callbacks);

    let rt = fixture.spawn(None);
    rt.wait_for_cycle();

    assert_eq!(*order.lock(), vec![1, 2, 3]);
    rt.shutdown_and_wait_for_exit();
}

#[test]
fn low_memory_wake_collects_generation_zero() {
    let fixture = Fixture::new([]);
    let low_memory = LowMemoryNotification::new();
    let rt = fixture.spawn(Some(low_memory.clone()));

    low_memory.notify();
    let heap = fixture.heap.clone();
    assert!(wait_until(Duration::from_secs(5), || {
        heap.collections()
            .iter()
            .any(|&(generation, forced, mode)| {
                generation == 0 && forced && mode == CollectionMode::Default
            })
    }));
    low_memory.reset();

    assert!(rt.metrics().snapshot().low_memory_collections >= 1);
    rt.shutdown_and_wait_for_exit();
}

#[test]
fn heap_dump_requests_are_serviced_and_spaced() {
    let fixture = Fixture::new([]);
    let rt = fixture.spawn(None);

    rt.request_heap_dump();
    let heap = fixture.heap.clone();
    assert!(wait_until(Duration::from_secs(5), || {
        heap.collections()
            .iter()
            .any(|&(generation, forced, mode)| {
                generation == 2 && !forced && mode == CollectionMode::Blocking
            })
    }));
    assert_eq!(rt.metrics().snapshot().heap_dumps, 1);

    // A second request inside the interval is deferred, then picked up by
    // the worker's timed wait once due.
    rt.request_heap_dump();
    let metrics = rt.metrics();
    assert!(wait_until(Duration::from_secs(5), || {
        metrics.snapshot().heap_dumps == 2
    }));

    rt.shutdown_and_wait_for_exit();
}

#[test]
fn wait_for_cycle_from_the_worker_is_a_noop() {
    let fixture = Fixture::new([0]);
    let rt = fixture.spawn(None);

    let reentered = Arc::new(AtomicBool::new(false));
    let flag = reentered.clone();
    let on_worker = rt.clone();
    fixture.heap.enqueue_work(move || {
        assert!(on_worker.is_current_thread_finalizer());
        // Must return immediately instead of deadlocking the worker.
        on_worker.wait_for_cycle();
        flag.store(true, Ordering::Release);
    });

    rt.wait_for_cycle();
    assert!(reentered.load(Ordering::Acquire));

    rt.shutdown_and_wait_for_exit();
}

#[test]
fn stress_is_inhibited_while_a_waiter_is_blocked() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let heap = Arc::new(MockHeap {
        event_log: log.clone(),
        ..MockHeap::default()
    });
    let started = Event::manual_reset();
    let gate = Event::manual_reset();
    let runner = Arc::new(MockRunner {
        calls: AtomicU32::new(0),
        results: Mutex::new(VecDeque::new()),
        event_log: log,
        gate: Some((started.clone(), gate.clone())),
    });
    let rt = FinalizerRuntime::spawn(
        heap,
        runner,
        Arc::new(MockHost::default()),
        None,
        fast_config(),
    )
    .unwrap();

    assert!(!rt.gc_stress_inhibited());
    let waiter_rt = rt.clone();
    let waiter = std::thread::spawn(move || waiter_rt.wait_for_cycle());

    let _ = started.wait(Some(Duration::from_secs(5)));
    assert!(rt.gc_stress_inhibited());

    gate.set();
    waiter.join().unwrap();
    assert!(!rt.gc_stress_inhibited());

    rt.shutdown_and_wait_for_exit();
}

#[test]
fn gen_analysis_completion_writes_marker_file() {
    let dir = tempfile::tempdir().unwrap();
    let template = dir
        .path()
        .join("analysis_%p.complete")
        .to_string_lossy()
        .into_owned();

    let fixture = Fixture::new([0]);
    let config = FinalizerConfig {
        gen_analysis_completion_template: Some(template.clone()),
        ..fast_config()
    };
    let rt = fixture.spawn_with(None, config);

    rt.gen_analysis().set_state(GenAnalysisState::Done);
    rt.wait_for_cycle();

    assert_eq!(rt.gen_analysis().state(), GenAnalysisState::Disabled);
    assert!(std::path::Path::new(&replace_pid(&template)).exists());

    rt.shutdown_and_wait_for_exit();
}

#[test]
fn shutdown_runs_host_hooks_once_and_is_idempotent() {
    let fixture = Fixture::new([0]);
    let rt = fixture.spawn(None);

    // One cycle so the platform attach has happened.
    rt.wait_for_cycle();
    assert_eq!(fixture.host.attaches.load(Ordering::Acquire), 1);

    rt.shutdown_and_wait_for_exit();
    rt.shutdown_and_wait_for_exit();

    assert_eq!(fixture.host.detaches.load(Ordering::Acquire), 1);
    assert_eq!(fixture.host.exits.load(Ordering::Acquire), 1);
    // Shutdown triggers at most one further drain.
    assert!(rt.metrics().snapshot().cycles <= 2);
}
