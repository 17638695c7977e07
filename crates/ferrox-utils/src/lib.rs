//! # ferrox-utils
//!
//! Shared utilities for the ferrox runtime: a unified synchronization layer
//! and the waitable event primitives the coordination cores are built on.
//!
//! ## Feature Flags
//!
//! - `multithreading`: Backs the [`sync`] module with `parking_lot` and
//!   enables the [`event`] module. Without it, `sync` falls back to a
//!   `RefCell`-based shim suitable for single-threaded hosts.

#[cfg(feature = "multithreading")]
pub mod event;
pub mod sync;
