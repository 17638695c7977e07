//! Basic synchronization primitives.
//!
//! This module provides a unified interface for synchronization primitives
//! that works across both single-threaded and multi-threaded configurations.
//! Low-level modules can depend on this without caring which configuration
//! the host selected.
#[cfg(not(feature = "multithreading"))]
pub mod compat {
    use std::cell::{RefCell, RefMut};
    use std::ops::{Deref, DerefMut};
    use std::time::Duration;

    #[derive(Debug, Default)]
    pub struct Mutex<T>(RefCell<T>);
    impl<T> Mutex<T> {
        pub fn new(t: T) -> Self {
            Self(RefCell::new(t))
        }
        pub fn lock(&self) -> MutexGuard<'_, T> {
            MutexGuard(self.0.borrow_mut())
        }
        pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
            self.0.try_borrow_mut().ok().map(MutexGuard)
        }
    }

    pub struct MutexGuard<'a, T>(RefMut<'a, T>);
    impl<T> Deref for MutexGuard<'_, T> {
        type Target = T;
        fn deref(&self) -> &T {
            &self.0
        }
    }
    impl<T> DerefMut for MutexGuard<'_, T> {
        fn deref_mut(&mut self) -> &mut T {
            &mut self.0
        }
    }

    // SAFETY: In single-threaded mode, we can safely share across "threads"
    // because there is only one.
    unsafe impl<T> Sync for Mutex<T> {}
    unsafe impl<T> Send for Mutex<T> {}

    /// With a single thread there is never another thread to be woken, so a
    /// wait that would block can only ever time out.
    #[derive(Debug, Default)]
    pub struct Condvar(());
    impl Condvar {
        pub const fn new() -> Self {
            Self(())
        }
        pub fn notify_one(&self) {}
        pub fn notify_all(&self) {}
        pub fn wait<T>(&self, _guard: &mut MutexGuard<'_, T>) {}
        pub fn wait_for<T>(
            &self,
            _guard: &mut MutexGuard<'_, T>,
            _timeout: Duration,
        ) -> WaitTimeoutResult {
            WaitTimeoutResult(true)
        }
    }

    pub struct WaitTimeoutResult(pub(super) bool);
    impl WaitTimeoutResult {
        pub fn timed_out(&self) -> bool {
            self.0
        }
    }
}

pub use std::sync::{
    Arc, OnceLock, Weak,
    atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, AtomicUsize, Ordering},
};

#[cfg(feature = "multithreading")]
pub use parking_lot::{Condvar, Mutex, MutexGuard, WaitTimeoutResult};

#[cfg(not(feature = "multithreading"))]
pub use compat::*;
