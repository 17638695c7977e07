//! Low-memory notification handle.

use ferrox_utils::event::Event;

/// Level-triggered memory-pressure signal. The host's memory monitor calls
/// [`notify`](Self::notify) when the system runs low and
/// [`reset`](Self::reset) once pressure clears; while signalled, the
/// finalizer worker responds with generation-0 collections between its
/// normal waits.
///
/// The facility is optional: hosts on platforms without a usable pressure
/// source simply construct the runtime without one.
#[derive(Clone, Debug)]
pub struct LowMemoryNotification {
    event: Event,
}

impl LowMemoryNotification {
    pub fn new() -> Self {
        Self {
            event: Event::manual_reset(),
        }
    }

    /// Signal memory pressure. Stays signalled until [`reset`](Self::reset).
    pub fn notify(&self) {
        self.event.set();
    }

    pub fn reset(&self) {
        self.event.reset();
    }

    pub fn is_signaled(&self) -> bool {
        self.event.is_set()
    }

    pub(crate) fn event(&self) -> &Event {
        &self.event
    }
}

impl Default for LowMemoryNotification {
    fn default() -> Self {
        Self::new()
    }
}
