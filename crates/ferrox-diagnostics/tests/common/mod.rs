//! Scriptable in-memory transport for driving the stream factory.

use ferrox_diagnostics::{PollEntry, PollEvents, Transport, TransportError};
use ferrox_utils::sync::{Arc, AtomicBool, AtomicU32, Mutex, Ordering};
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::time::Duration;

pub struct FakeListener {
    pub token: u32,
    #[allow(dead_code)]
    pub address: String,
}

#[derive(Debug, PartialEq, Eq)]
pub struct FakeStream {
    pub token: u32,
}

#[derive(Default)]
struct Inner {
    next_token: AtomicU32,
    /// Addresses whose bind always fails.
    listen_failures: Mutex<HashSet<String>>,
    /// Scripted connect outcomes, consumed in order; `true` succeeds.
    /// When exhausted, `connects_succeed` decides.
    connect_script: Mutex<VecDeque<bool>>,
    connects_succeed: AtomicBool,
    /// Fail the next N advertise sends.
    advertise_failures: AtomicU32,
    /// Fail the next N accepts.
    accept_failures: AtomicU32,
    /// One map per poll round: port index -> event. An exhausted script
    /// makes poll fail, which ends the factory's loop via its error path.
    poll_script: Mutex<VecDeque<HashMap<usize, PollEvents>>>,
    /// Recorded poll timeouts, in call order.
    polls: Mutex<Vec<Option<Duration>>>,
    /// Recorded back-off sleeps.
    sleeps: Mutex<Vec<Duration>>,
    /// (listener token, in_shutdown) per close.
    closed_listeners: Mutex<Vec<(u32, bool)>>,
    closed_streams: Mutex<Vec<u32>>,
    connect_attempts: AtomicU32,
    /// Stream tokens that carried an advertise frame.
    advertised: Mutex<Vec<u32>>,
}

#[derive(Clone, Default)]
pub struct FakeTransport {
    inner: Arc<Inner>,
}

impl FakeTransport {
    pub fn new() -> Self {
        let transport = Self::default();
        transport.inner.connects_succeed.store(true, Ordering::Release);
        transport
    }

    fn fresh_token(&self) -> u32 {
        self.inner.next_token.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn fail_listen(&self, address: &str) {
        self.inner.listen_failures.lock().insert(address.to_string());
    }

    pub fn script_connects(&self, outcomes: impl IntoIterator<Item = bool>) {
        self.inner.connect_script.lock().extend(outcomes);
    }

    pub fn set_connects_succeed(&self, succeed: bool) {
        self.inner.connects_succeed.store(succeed, Ordering::Release);
    }

    pub fn fail_next_advertises(&self, count: u32) {
        self.inner.advertise_failures.store(count, Ordering::Release);
    }

    pub fn fail_next_accepts(&self, count: u32) {
        self.inner.accept_failures.store(count, Ordering::Release);
    }

    /// Queue one poll round; entries not named in `events` report no event.
    pub fn script_poll_round(&self, events: impl IntoIterator<Item = (usize, PollEvents)>) {
        self.inner.poll_script.lock().push_back(events.into_iter().collect());
    }

    /// Queue `count` rounds in which nothing happens.
    pub fn script_idle_rounds(&self, count: usize) {
        let mut script = self.inner.poll_script.lock();
        for _ in 0..count {
            script.push_back(HashMap::new());
        }
    }

    pub fn recorded_polls(&self) -> Vec<Option<Duration>> {
        self.inner.polls.lock().clone()
    }

    pub fn recorded_sleeps(&self) -> Vec<Duration> {
        self.inner.sleeps.lock().clone()
    }

    pub fn closed_listeners(&self) -> Vec<(u32, bool)> {
        self.inner.closed_listeners.lock().clone()
    }

    pub fn closed_streams(&self) -> Vec<u32> {
        self.inner.closed_streams.lock().clone()
    }

    pub fn connect_attempts(&self) -> u32 {
        self.inner.connect_attempts.load(Ordering::Acquire)
    }

    pub fn advertised_streams(&self) -> Vec<u32> {
        self.inner.advertised.lock().clone()
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Transport for FakeTransport {
    type Listener = FakeListener;
    type Stream = FakeStream;
    type Token = u32;

    fn listen(&self, address: &str) -> Result<Self::Listener, TransportError> {
        if self.inner.listen_failures.lock().contains(address) {
            return Err(TransportError::Listen {
                address: address.to_string(),
                source: io::Error::from(io::ErrorKind::AddrInUse),
            });
        }
        Ok(FakeListener {
            token: self.fresh_token(),
            address: address.to_string(),
        })
    }

    fn accept(&self, _listener: &mut Self::Listener) -> Result<Self::Stream, TransportError> {
        if Self::take_failure(&self.inner.accept_failures) {
            return Err(TransportError::Accept(io::Error::from(
                io::ErrorKind::ConnectionAborted,
            )));
        }
        Ok(FakeStream {
            token: self.fresh_token(),
        })
    }

    fn connect(&self, address: &str, _timeout: Duration) -> Result<Self::Stream, TransportError> {
        self.inner.connect_attempts.fetch_add(1, Ordering::AcqRel);
        let succeed = self
            .inner
            .connect_script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.inner.connects_succeed.load(Ordering::Acquire));
        if succeed {
            Ok(FakeStream {
                token: self.fresh_token(),
            })
        } else {
            Err(TransportError::Connect {
                address: address.to_string(),
                source: io::Error::from(io::ErrorKind::ConnectionRefused),
            })
        }
    }

    fn send_advertise(&self, stream: &mut Self::Stream) -> Result<(), TransportError> {
        if Self::take_failure(&self.inner.advertise_failures) {
            return Err(TransportError::Advertise(io::Error::from(
                io::ErrorKind::BrokenPipe,
            )));
        }
        self.inner.advertised.lock().push(stream.token);
        Ok(())
    }

    fn listener_token(&self, listener: &Self::Listener) -> Self::Token {
        listener.token
    }

    fn stream_token(&self, stream: &Self::Stream) -> Self::Token {
        stream.token
    }

    fn poll(
        &self,
        entries: &mut [PollEntry<Self::Token>],
        timeout: Option<Duration>,
    ) -> Result<u32, TransportError> {
        self.inner.polls.lock().push(timeout);
        let Some(round) = self.inner.poll_script.lock().pop_front() else {
            // Script ran dry: fail the poll so a looping factory bails out
            // instead of hanging the test.
            return Err(TransportError::Poll(io::Error::from(
                io::ErrorKind::Interrupted,
            )));
        };
        let mut signalled = 0;
        for entry in entries.iter_mut() {
            entry.revents = round
                .get(&entry.port)
                .copied()
                .unwrap_or(PollEvents::None);
            if entry.revents != PollEvents::None {
                signalled += 1;
            }
        }
        Ok(signalled)
    }

    fn close_listener(&self, listener: &mut Self::Listener, in_shutdown: bool) {
        self.inner
            .closed_listeners
            .lock()
            .push((listener.token, in_shutdown));
    }

    fn close_stream(&self, stream: &mut Self::Stream) {
        self.inner.closed_streams.lock().push(stream.token);
    }

    fn sleep(&self, timeout: Duration) {
        self.inner.sleeps.lock().push(timeout);
    }

    fn default_listen_address(&self) -> String {
        "fake-default".to_string()
    }
}
