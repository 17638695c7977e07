use ferrox_utils::sync::{AtomicU64, Ordering};
use serde::Serialize;

/// Poller counters.
///
/// All counters use `Ordering::Relaxed`; they are independent and never
/// synchronize memory between threads.
#[derive(Debug, Default)]
pub struct DiagnosticsMetrics {
    /// Poll syscalls issued
    pub poll_attempts: AtomicU64,
    /// Streams handed to the consumer
    pub streams_yielded: AtomicU64,
    /// Port resets after hangups or poll errors
    pub port_resets: AtomicU64,
    /// Errors recovered via back-off
    pub transient_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct DiagnosticsMetricsSnapshot {
    pub poll_attempts: u64,
    pub streams_yielded: u64,
    pub port_resets: u64,
    pub transient_errors: u64,
}

impl DiagnosticsMetrics {
    pub(crate) fn record_poll_attempt(&self) {
        self.poll_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stream_yielded(&self) {
        self.streams_yielded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_port_reset(&self) {
        self.port_resets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transient_error(&self) {
        self.transient_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsMetricsSnapshot {
        DiagnosticsMetricsSnapshot {
            poll_attempts: self.poll_attempts.load(Ordering::Relaxed),
            streams_yielded: self.streams_yielded.load(Ordering::Relaxed),
            port_resets: self.port_resets.load(Ordering::Relaxed),
            transient_errors: self.transient_errors.load(Ordering::Relaxed),
        }
    }
}
