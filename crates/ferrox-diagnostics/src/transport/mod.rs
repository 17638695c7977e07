//! The low-level IPC endpoint interface the port multiplexer drives.
//!
//! A transport supplies endpoint creation, a bounded connect, the poll
//! primitive, and the one-shot advertise frame written on freshly dialled
//! streams. The multiplexer never touches descriptors directly: it gathers
//! [`PollEntry`] records (one per port), hands them to
//! [`Transport::poll`], and dispatches on the returned events.

use crate::error::TransportError;
use std::time::Duration;

#[cfg(unix)]
pub mod unix;

/// Readiness reported for one poll entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollEvents {
    /// Nothing happened on this entry.
    #[default]
    None,
    /// The entry is ready: a listener can accept, a stream has data.
    Signalled,
    /// The peer closed its end.
    Hangup,
    /// The endpoint is in an error state.
    Error,
    /// The transport reported something it could not classify.
    Unknown,
}

/// One entry of the array handed to the poll primitive. Exactly one
/// underlying object backs it: the listener of a listen port or the cached
/// stream of a connect port, identified by `token`. `port` is the index of
/// the owning port in the factory's port set.
#[derive(Debug, Clone, Copy)]
pub struct PollEntry<Token> {
    pub token: Token,
    pub is_listener: bool,
    pub revents: PollEvents,
    pub port: usize,
}

pub trait Transport: Send + Sync + 'static {
    type Listener: Send;
    type Stream: Send;
    /// Cheap, copyable identity of a pollable object (a raw descriptor on
    /// Unix). Tokens are only dereferenced inside [`Transport::poll`].
    type Token: Copy + Send;

    fn listen(&self, address: &str) -> Result<Self::Listener, TransportError>;

    fn accept(&self, listener: &mut Self::Listener) -> Result<Self::Stream, TransportError>;

    /// Dial `address`, giving up after `timeout`.
    fn connect(&self, address: &str, timeout: Duration) -> Result<Self::Stream, TransportError>;

    /// Write the one-shot advertise frame on a freshly connected stream.
    fn send_advertise(&self, stream: &mut Self::Stream) -> Result<(), TransportError>;

    fn listener_token(&self, listener: &Self::Listener) -> Self::Token;

    fn stream_token(&self, stream: &Self::Stream) -> Self::Token;

    /// Wait until any entry is ready or the timeout elapses (`None` waits
    /// forever). Fills in `revents` and returns how many entries have an
    /// event.
    fn poll(
        &self,
        entries: &mut [PollEntry<Self::Token>],
        timeout: Option<Duration>,
    ) -> Result<u32, TransportError>;

    fn close_listener(&self, listener: &mut Self::Listener, in_shutdown: bool);

    fn close_stream(&self, stream: &mut Self::Stream);

    /// Block the calling thread; the factory's back-off primitive.
    fn sleep(&self, timeout: Duration) {
        std::thread::sleep(timeout);
    }

    /// The platform-default address the default listen port binds to.
    fn default_listen_address(&self) -> String;
}
