//! Waitable one-shot events.
//!
//! [`Event`] models the classic auto-reset / manual-reset signal: any thread
//! may `set` it, waiters block with an optional timeout, and an auto-reset
//! event hands each `set` to exactly one waiter. [`Event::wait_any`] waits on
//! a small ordered array of events and reports the lowest signalled index, so
//! callers can express priority between sources by array position instead of
//! by comparing raw wait-return values.

use crate::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant};

/// How a signalled event behaves once a waiter observes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    /// The first waiter to observe the signal consumes it.
    Auto,
    /// The event stays signalled until explicitly [`Event::reset`].
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum WaitOutcome {
    Signaled,
    TimedOut,
}

/// Shared wake-up slot used by [`Event::wait_any`]. Each multi-waiter owns
/// one node and registers it with every event in its array; `set` on any of
/// them flips the flag and wakes the node.
struct WaitNode {
    woken: Mutex<bool>,
    cond: Condvar,
}

impl WaitNode {
    fn new() -> Self {
        Self {
            woken: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    fn wake(&self) {
        let mut woken = self.woken.lock();
        *woken = true;
        self.cond.notify_all();
    }
}

struct EventState {
    signaled: bool,
    waiters: Vec<Weak<WaitNode>>,
}

struct EventInner {
    state: Mutex<EventState>,
    cond: Condvar,
    mode: ResetMode,
}

#[derive(Clone)]
pub struct Event {
    inner: Arc<EventInner>,
}

impl Event {
    pub fn new(mode: ResetMode) -> Self {
        Self {
            inner: Arc::new(EventInner {
                state: Mutex::new(EventState {
                    signaled: false,
                    waiters: Vec::new(),
                }),
                cond: Condvar::new(),
                mode,
            }),
        }
    }

    pub fn auto_reset() -> Self {
        Self::new(ResetMode::Auto)
    }

    pub fn manual_reset() -> Self {
        Self::new(ResetMode::Manual)
    }

    /// Signal the event, waking every direct waiter and every registered
    /// multi-waiter. For an auto-reset event only one of them will win the
    /// subsequent consume race.
    pub fn set(&self) {
        let mut state = self.inner.state.lock();
        state.signaled = true;
        self.inner.cond.notify_all();
        state.waiters.retain(|weak| match weak.upgrade() {
            Some(node) => {
                node.wake();
                true
            }
            None => false,
        });
    }

    pub fn reset(&self) {
        self.inner.state.lock().signaled = false;
    }

    pub fn is_set(&self) -> bool {
        self.inner.state.lock().signaled
    }

    /// Observe the signal if present, consuming it for auto-reset mode.
    fn try_consume(&self) -> bool {
        let mut state = self.inner.state.lock();
        if !state.signaled {
            return false;
        }
        if self.inner.mode == ResetMode::Auto {
            state.signaled = false;
        }
        true
    }

    /// Block until the event is signalled or the timeout elapses.
    /// `None` waits forever.
    pub fn wait(&self, timeout: Option<Duration>) -> WaitOutcome {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.inner.state.lock();
        loop {
            if state.signaled {
                if self.inner.mode == ResetMode::Auto {
                    state.signaled = false;
                }
                return WaitOutcome::Signaled;
            }
            match deadline {
                None => self.inner.cond.wait(&mut state),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return WaitOutcome::TimedOut;
                    }
                    let _ = self.inner.cond.wait_for(&mut state, deadline - now);
                }
            }
        }
    }

    fn register(&self, node: &Arc<WaitNode>) {
        self.inner.state.lock().waiters.push(Arc::downgrade(node));
    }

    fn unregister(&self, node: &Arc<WaitNode>) {
        self.inner
            .state
            .lock()
            .waiters
            .retain(|weak| weak.upgrade().is_some_and(|n| !Arc::ptr_eq(&n, node)));
    }

    /// Wait until any of `events` is signalled, returning the index of the
    /// *lowest* signalled entry; earlier entries take priority when several
    /// are signalled at once. Returns `None` on timeout. Auto-reset entries
    /// are consumed by the successful return only.
    pub fn wait_any(events: &[&Event], timeout: Option<Duration>) -> Option<usize> {
        // Fast path: something is already signalled.
        for (index, event) in events.iter().enumerate() {
            if event.try_consume() {
                return Some(index);
            }
        }

        let node = Arc::new(WaitNode::new());
        for event in events {
            event.register(&node);
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        let result = 'outer: loop {
            for (index, event) in events.iter().enumerate() {
                if event.try_consume() {
                    break 'outer Some(index);
                }
            }
            let mut woken = node.woken.lock();
            // A set() may have landed between the scan and taking the node
            // lock; the flag covers that window.
            if !*woken {
                match deadline {
                    None => node.cond.wait(&mut woken),
                    Some(deadline) => {
                        let now = Instant::now();
                        if now >= deadline {
                            break 'outer None;
                        }
                        let _ = node.cond.wait_for(&mut woken, deadline - now);
                    }
                }
            }
            *woken = false;
        };

        for event in events {
            event.unregister(&node);
        }
        result
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("mode", &self.inner.mode)
            .field("signaled", &self.is_set())
            .finish()
    }
}
