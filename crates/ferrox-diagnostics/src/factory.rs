//! The stream factory: owns the port set and runs the poll loop.

use crate::{
    config::DiagnosticsConfig,
    error::{ErrorCallback, report},
    metrics::DiagnosticsMetrics,
    port::{Port, PortDescription, PortKind},
    ports_spec::{PortSpec, parse_ports_config},
    transport::{PollEntry, PollEvents, Transport},
};
use ferrox_utils::sync::{AtomicBool, Mutex, Ordering};
use std::time::Duration;
use tracing::{debug, info};

pub const POLL_TIMEOUT_MIN_MS: u32 = 10;
pub const POLL_TIMEOUT_MAX_MS: u32 = 500;
pub const POLL_TIMEOUT_FALLOFF_FACTOR: f32 = 1.25;

/// Advance the poll timeout after a round in which some port could not
/// produce a poll entry. From infinite the timeout drops to the minimum;
/// from there it scales by the fall-off factor up to the cap. A round where
/// every port produced an entry goes back to infinite - the poll itself will
/// wake us.
fn next_timeout(current_ms: Option<u32>) -> u32 {
    match current_ms {
        None => POLL_TIMEOUT_MIN_MS,
        Some(current) if current >= POLL_TIMEOUT_MAX_MS => POLL_TIMEOUT_MAX_MS,
        Some(current) => {
            POLL_TIMEOUT_MAX_MS.min((current as f32 * POLL_TIMEOUT_FALLOFF_FACTOR) as u32)
        }
    }
}

fn as_duration(timeout_ms: Option<u32>) -> Option<Duration> {
    timeout_ms.map(|ms| Duration::from_millis(u64::from(ms)))
}

/// Builds and owns the diagnostic port set and multiplexes it into a
/// sequence of ready streams. One value exists per runtime; the diagnostic
/// server is its only steady-state caller, while shutdown may race in from
/// any thread.
pub struct StreamFactory<T: Transport> {
    transport: T,
    config: DiagnosticsConfig,
    ports: Mutex<Vec<Port<T>>>,
    /// Index of the port whose stream was most recently yielded; the target
    /// of resume acknowledgements.
    current_port: Mutex<Option<usize>>,
    shutting_down: AtomicBool,
    metrics: DiagnosticsMetrics,
}

impl<T: Transport> StreamFactory<T> {
    pub fn new(transport: T, config: DiagnosticsConfig) -> Self {
        Self {
            transport,
            config,
            ports: Mutex::new(Vec::new()),
            current_port: Mutex::new(None),
            shutting_down: AtomicBool::new(false),
            metrics: DiagnosticsMetrics::default(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn metrics(&self) -> &DiagnosticsMetrics {
        &self.metrics
    }

    /// Build the port set from configuration. Invalid entries are skipped
    /// so the runtime still starts; the return value reports whether every
    /// configured port was built.
    pub fn configure(&self, callback: Option<&ErrorCallback>) -> bool {
        let mut result = true;

        if let Some(ports_config) = self.config.ports.clone() {
            for spec in parse_ports_config(&ports_config) {
                let built = self.build_and_add_port(spec, callback);
                info!(
                    target: "diagnostics",
                    "diagnostic port creation {}",
                    if built { "succeeded" } else { "failed" }
                );
                result &= built;
            }
        }

        #[cfg(feature = "default-listen-port")]
        {
            use crate::port::SuspendMode;
            let default_spec = PortSpec {
                kind: PortKind::Listen,
                suspend: if self.config.default_port_suspend {
                    SuspendMode::Suspend
                } else {
                    SuspendMode::NoSuspend
                },
                address: self.transport.default_listen_address(),
            };
            result &= self.build_and_add_port(default_spec, callback);
        }

        result
    }

    fn build_and_add_port(&self, spec: PortSpec, callback: Option<&ErrorCallback>) -> bool {
        match spec.kind {
            PortKind::Listen => match self.transport.listen(&spec.address) {
                Ok(listener) => {
                    self.ports
                        .lock()
                        .push(Port::listen(spec.address, listener, spec.suspend));
                    true
                }
                Err(error) => {
                    report(callback, &error);
                    false
                }
            },
            // Connect ports dial lazily, from the poll loop.
            PortKind::Connect => {
                self.ports
                    .lock()
                    .push(Port::connect(spec.address, spec.suspend));
                true
            }
        }
    }

    /// Block until one port yields a stream. Returns `None` on an error
    /// round (the caller decides whether to come back) and, in
    /// single-threaded builds, after a single poll attempt.
    pub fn next_available_stream(&self, callback: Option<&ErrorCallback>) -> Option<T::Stream> {
        let mut poll_timeout_ms: Option<u32> = None;
        let mut poll_attempts = 0u32;

        loop {
            let mut entries: Vec<PollEntry<T::Token>> = Vec::new();
            let mut all_ports_ready = true;
            {
                let mut ports = self.ports.lock();
                for (index, port) in ports.iter_mut().enumerate() {
                    match port.poll_entry(&self.transport, index, callback) {
                        Some(entry) => entries.push(entry),
                        None => all_ports_ready = false,
                    }
                }
            }

            poll_timeout_ms = if all_ports_ready {
                None
            } else {
                Some(next_timeout(poll_timeout_ms))
            };

            let mut poll_failed = false;
            let signalled = if entries.is_empty() {
                let timeout = poll_timeout_ms.unwrap_or(POLL_TIMEOUT_MAX_MS);
                debug!(target: "diagnostics", timeout, "nothing to poll, sleeping");
                self.transport
                    .sleep(Duration::from_millis(u64::from(timeout)));
                0
            } else {
                poll_attempts += 1;
                self.metrics.record_poll_attempt();
                debug!(
                    target: "diagnostics",
                    poll_attempts,
                    timeout = ?poll_timeout_ms,
                    entries = entries.len(),
                    "polling"
                );
                match self
                    .transport
                    .poll(&mut entries, as_duration(poll_timeout_ms))
                {
                    Ok(signalled) => signalled,
                    Err(error) => {
                        report(callback, &error);
                        poll_failed = true;
                        0
                    }
                }
            };

            let mut stream = None;
            let mut saw_error = poll_failed;
            if signalled != 0 {
                let mut ports = self.ports.lock();
                for entry in &entries {
                    match entry.revents {
                        PollEvents::Hangup => {
                            debug!(target: "diagnostics", port = entry.port, "connection hung up, resetting");
                            ports[entry.port].reset(&self.transport, callback);
                            self.metrics.record_port_reset();
                            poll_timeout_ms = Some(POLL_TIMEOUT_MIN_MS);
                        }
                        PollEvents::Signalled => {
                            // Only the first signalled port is served; the
                            // rest stay ready for the next call.
                            if stream.is_none() {
                                stream = ports[entry.port].take_stream(&self.transport, callback);
                                if stream.is_none() {
                                    saw_error = true;
                                }
                                *self.current_port.lock() = Some(entry.port);
                            }
                        }
                        PollEvents::Error | PollEvents::Unknown => {
                            debug!(target: "diagnostics", port = entry.port, "connection errored, resetting");
                            ports[entry.port].reset(&self.transport, callback);
                            self.metrics.record_port_reset();
                            saw_error = true;
                        }
                        PollEvents::None => {}
                    }
                }
            }

            if let Some(stream) = stream {
                self.metrics.record_stream_yielded();
                return Some(stream);
            }

            if saw_error {
                // Some errors make poll return instantly; delay before
                // handing the error back so a retrying caller cannot spin.
                let timeout = poll_timeout_ms.unwrap_or(POLL_TIMEOUT_MAX_MS);
                self.metrics.record_transient_error();
                self.transport
                    .sleep(Duration::from_millis(u64::from(timeout)));
                *self.current_port.lock() = None;
                return None;
            }

            // Single-threaded hosts get one attempt per call; looping here
            // would block their event loop.
            #[cfg(not(feature = "multithreading"))]
            return None;
        }
    }

    /// Record the resume acknowledgement of whichever port's stream was
    /// yielded last. No-op when nothing has been yielded.
    pub fn resume_current_port(&self) {
        let current = *self.current_port.lock();
        if let Some(index) = current
            && let Some(port) = self.ports.lock().get(index)
        {
            port.mark_runtime_resumed();
        }
    }

    /// Whether any port still requires a resume acknowledgement before the
    /// runtime may finish starting up.
    pub fn any_suspended_ports(&self) -> bool {
        self.ports.lock().iter().any(|port| port.is_suspended())
    }

    pub fn has_active_ports(&self) -> bool {
        !self.shutting_down.load(Ordering::Acquire) && !self.ports.lock().is_empty()
    }

    /// Close every port outside of shutdown (cached streams included).
    pub fn close_ports(&self, callback: Option<&ErrorCallback>) {
        let mut ports = self.ports.lock();
        for port in ports.iter_mut() {
            port.close(&self.transport, false, callback);
        }
    }

    /// Orderly teardown. Idempotent: the first call closes every port with
    /// the shutdown flag set, later calls return immediately. The port set
    /// itself is retained; a poller still blocked in the kernel is not
    /// forcibly woken.
    pub fn shutdown(&self, callback: Option<&ErrorCallback>) -> bool {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return true;
        }
        info!(target: "diagnostics", "shutting down diagnostic ports");
        {
            let mut ports = self.ports.lock();
            for port in ports.iter_mut() {
                port.close(&self.transport, true, callback);
            }
        }
        *self.current_port.lock() = None;
        true
    }

    /// Externally observable state of every port, in set order.
    pub fn port_descriptions(&self) -> Vec<PortDescription> {
        self.ports.lock().iter().map(Port::describe).collect()
    }
}
