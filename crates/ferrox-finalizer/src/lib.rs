//! # ferrox-finalizer
//!
//! The finalizer coordination core of the ferrox runtime: a dedicated worker
//! thread that drains the collector's finalization queue, interleaves
//! low-memory-triggered collections, and exposes a synchronous
//! "wait for a full finalization cycle" barrier to the rest of the runtime.
//!
//! ## Subsystems
//!
//! - **Worker loop** (`worker`): the dedicated finalizer thread.
//! - **Barrier** (`barrier`): `wait_for_cycle` and its full-GC-count loop.
//! - **Interfaces** (`interfaces`): traits the collector, the managed
//!   runner, and the host implement for the worker to call into.
//! - **Low-memory notifier** (`low_memory`): optional pressure signal that
//!   the worker services with generation-0 collections.
//! - **Heap-dump / gen-analysis controls** (`heap_dump`, `gen_analysis`):
//!   diagnostic hooks serviced on the worker thread.

mod barrier;
mod error;
mod gen_analysis;
mod heap_dump;
mod interfaces;
mod low_memory;
pub mod metrics;
mod os;
mod runtime;
mod worker;

pub use error::FinalizerError;
pub use gen_analysis::{GenAnalysisControl, GenAnalysisState, replace_pid};
pub use heap_dump::HeapDumpControl;
pub use interfaces::{
    CollectionMode, FinalizerHost, FinalizerWorkItem, GcHeap, GcMode, ManagedRunner, ObjectHandle,
};
pub use low_memory::LowMemoryNotification;
pub use runtime::{FinalizerConfig, FinalizerRuntime};
