//! Diagnostic port variants.
//!
//! A port is either *listen* (bind an endpoint, hand out accepted streams)
//! or *connect* (dial out, advertise, and hand out the cached stream). The
//! two variants share the suspend-mode bookkeeping and are dispatched on
//! their tag.

use crate::{
    error::{ErrorCallback, report},
    transport::{PollEntry, PollEvents, Transport},
};
use ferrox_utils::sync::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

/// Bound on each reconnect attempt a connect port makes while gathering
/// poll entries.
const CONNECT_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    Listen,
    Connect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendMode {
    /// Runtime startup pauses until a tool attached through this port sends
    /// its resume acknowledgement.
    Suspend,
    NoSuspend,
}

/// Snapshot of one port's externally observable state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDescription {
    pub kind: PortKind,
    pub suspend_mode: SuspendMode,
    pub address: String,
    pub has_cached_stream: bool,
    pub has_resumed_runtime: bool,
}

pub(crate) struct Port<T: Transport> {
    suspend_mode: SuspendMode,
    has_resumed_runtime: AtomicBool,
    state: PortState<T>,
}

enum PortState<T: Transport> {
    Listen {
        address: String,
        listener: Option<T::Listener>,
    },
    Connect {
        address: String,
        stream: Option<T::Stream>,
    },
}

impl<T: Transport> Port<T> {
    pub(crate) fn listen(address: String, listener: T::Listener, suspend_mode: SuspendMode) -> Self {
        Self {
            suspend_mode,
            has_resumed_runtime: AtomicBool::new(false),
            state: PortState::Listen {
                address,
                listener: Some(listener),
            },
        }
    }

    pub(crate) fn connect(address: String, suspend_mode: SuspendMode) -> Self {
        Self {
            suspend_mode,
            has_resumed_runtime: AtomicBool::new(false),
            state: PortState::Connect {
                address,
                stream: None,
            },
        }
    }

    pub(crate) fn kind(&self) -> PortKind {
        match self.state {
            PortState::Listen { .. } => PortKind::Listen,
            PortState::Connect { .. } => PortKind::Connect,
        }
    }

    pub(crate) fn address(&self) -> &str {
        match &self.state {
            PortState::Listen { address, .. } | PortState::Connect { address, .. } => address,
        }
    }

    pub(crate) fn mark_runtime_resumed(&self) {
        self.has_resumed_runtime.store(true, Ordering::Release);
    }

    /// Whether this port still gates runtime startup.
    pub(crate) fn is_suspended(&self) -> bool {
        self.suspend_mode == SuspendMode::Suspend
            && !self.has_resumed_runtime.load(Ordering::Acquire)
    }

    pub(crate) fn describe(&self) -> PortDescription {
        PortDescription {
            kind: self.kind(),
            suspend_mode: self.suspend_mode,
            address: self.address().to_string(),
            has_cached_stream: matches!(&self.state, PortState::Connect { stream: Some(_), .. }),
            has_resumed_runtime: self.has_resumed_runtime.load(Ordering::Acquire),
        }
    }

    /// Produce this port's entry for the next poll round. A connect port
    /// with no cached stream dials first; a listen port with no endpoint
    /// (after a failed reset) re-binds. Failure means the port sits this
    /// round out and the factory backs off.
    pub(crate) fn poll_entry(
        &mut self,
        transport: &T,
        index: usize,
        callback: Option<&ErrorCallback>,
    ) -> Option<PollEntry<T::Token>> {
        match &mut self.state {
            PortState::Listen { address, listener } => {
                let listener = match listener {
                    Some(listener) => listener,
                    None => match transport.listen(address) {
                        Ok(bound) => listener.insert(bound),
                        Err(error) => {
                            report(callback, &error);
                            return None;
                        }
                    },
                };
                Some(PollEntry {
                    token: transport.listener_token(listener),
                    is_listener: true,
                    revents: PollEvents::None,
                    port: index,
                })
            }
            PortState::Connect { address, stream } => {
                let stream = match stream {
                    Some(stream) => stream,
                    None => {
                        debug!(target: "diagnostics", address = address.as_str(), "stream cache empty, reconnecting");
                        let mut connection = match transport.connect(address, CONNECT_TIMEOUT) {
                            Ok(connection) => connection,
                            Err(error) => {
                                report(callback, &error);
                                return None;
                            }
                        };
                        if let Err(error) = transport.send_advertise(&mut connection) {
                            report(callback, &error);
                            transport.close_stream(&mut connection);
                            return None;
                        }
                        stream.insert(connection)
                    }
                };
                Some(PollEntry {
                    token: transport.stream_token(stream),
                    is_listener: false,
                    revents: PollEvents::None,
                    port: index,
                })
            }
        }
    }

    /// Yield the ready stream: accept on a listen port, transfer the cached
    /// stream out of a connect port.
    pub(crate) fn take_stream(
        &mut self,
        transport: &T,
        callback: Option<&ErrorCallback>,
    ) -> Option<T::Stream> {
        match &mut self.state {
            PortState::Listen { listener, .. } => {
                let listener = listener.as_mut()?;
                match transport.accept(listener) {
                    Ok(stream) => Some(stream),
                    Err(error) => {
                        report(callback, &error);
                        None
                    }
                }
            }
            PortState::Connect { stream, .. } => stream.take(),
        }
    }

    /// Recover from a hangup or error: drop the cached stream, or re-bind
    /// the listen endpoint.
    pub(crate) fn reset(&mut self, transport: &T, callback: Option<&ErrorCallback>) {
        match &mut self.state {
            PortState::Listen { address, listener } => {
                if let Some(mut old) = listener.take() {
                    transport.close_listener(&mut old, false);
                }
                match transport.listen(address) {
                    Ok(bound) => *listener = Some(bound),
                    Err(error) => report(callback, &error),
                }
            }
            PortState::Connect { stream, .. } => {
                if let Some(mut old) = stream.take() {
                    transport.close_stream(&mut old);
                }
            }
        }
    }

    /// Tear the port down. During shutdown the cached stream is left alone:
    /// a consumer may still hold a freshly yielded stream backed by the same
    /// object, and the transport teardown is sufficient.
    pub(crate) fn close(
        &mut self,
        transport: &T,
        in_shutdown: bool,
        _callback: Option<&ErrorCallback>,
    ) {
        match &mut self.state {
            PortState::Listen { listener, .. } => {
                if let Some(mut old) = listener.take() {
                    transport.close_listener(&mut old, in_shutdown);
                }
            }
            PortState::Connect { stream, .. } => {
                if !in_shutdown
                    && let Some(mut old) = stream.take()
                {
                    transport.close_stream(&mut old);
                }
            }
        }
    }
}
