//! Heap-dump trigger serviced on the finalizer thread.

use ferrox_utils::sync::{AtomicBool, Mutex, Ordering};
use std::time::{Duration, Instant};

/// A request flag plus a minimum interval between dumps. Requests made
/// before the interval has elapsed stay pending; the worker re-checks on
/// every cycle, so a deferred request is honoured as soon as it becomes due.
pub struct HeapDumpControl {
    requested: AtomicBool,
    last_dump: Mutex<Option<Instant>>,
    interval: Duration,
}

impl HeapDumpControl {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            requested: AtomicBool::new(false),
            last_dump: Mutex::new(None),
            interval,
        }
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    pub(crate) fn interval(&self) -> Duration {
        self.interval
    }

    /// Consume the request if one is pending and the interval since the last
    /// dump has elapsed. Returns whether the caller should dump now.
    pub(crate) fn take_due_request(&self) -> bool {
        if !self.is_requested() {
            return false;
        }
        let mut last = self.last_dump.lock();
        if let Some(at) = *last
            && at.elapsed() < self.interval
        {
            return false;
        }
        *last = Some(Instant::now());
        self.requested.store(false, Ordering::Release);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_is_consumed_once_due() {
        let control = HeapDumpControl::new(Duration::from_millis(50));
        assert!(!control.take_due_request());
        control.request();
        assert!(control.take_due_request());
        assert!(!control.is_requested());
    }

    #[test]
    fn request_within_interval_stays_pending() {
        let control = HeapDumpControl::new(Duration::from_secs(60));
        control.request();
        assert!(control.take_due_request());
        control.request();
        // Too soon after the previous dump: deferred, not dropped.
        assert!(!control.take_due_request());
        assert!(control.is_requested());
    }
}
