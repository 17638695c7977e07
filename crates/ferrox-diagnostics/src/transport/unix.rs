//! Unix-domain-socket transport.

use crate::{
    error::TransportError,
    transport::{PollEntry, PollEvents, Transport},
};
use std::{
    fs, io,
    io::Write,
    mem,
    os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
    os::unix::net::{UnixListener, UnixStream},
    path::PathBuf,
    sync::OnceLock,
    time::Duration,
};

/// First bytes written on every outbound stream: magic, a per-process
/// cookie so tools can de-duplicate runtimes, the pid, and two reserved
/// bytes.
const ADVERTISE_MAGIC: &[u8; 8] = b"ADVR_V1\0";
const ADVERTISE_FRAME_LEN: usize = 34;

fn runtime_cookie() -> [u8; 16] {
    use std::hash::{BuildHasher, Hasher, RandomState};
    static COOKIE: OnceLock<[u8; 16]> = OnceLock::new();
    *COOKIE.get_or_init(|| {
        // RandomState carries fresh per-construction entropy; two draws give
        // the 128 bits we need without pulling in an RNG dependency.
        let mut cookie = [0u8; 16];
        let a = RandomState::new().build_hasher().finish();
        let b = RandomState::new().build_hasher().finish();
        cookie[..8].copy_from_slice(&a.to_le_bytes());
        cookie[8..].copy_from_slice(&b.to_le_bytes());
        cookie
    })
}

fn advertise_frame() -> [u8; ADVERTISE_FRAME_LEN] {
    let mut frame = [0u8; ADVERTISE_FRAME_LEN];
    frame[..8].copy_from_slice(ADVERTISE_MAGIC);
    frame[8..24].copy_from_slice(&runtime_cookie());
    frame[24..32].copy_from_slice(&u64::from(std::process::id()).to_le_bytes());
    frame
}

pub struct UnixListenerEndpoint {
    listener: UnixListener,
    path: PathBuf,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UnixTransport;

impl UnixTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for UnixTransport {
    type Listener = UnixListenerEndpoint;
    type Stream = UnixStream;
    type Token = RawFd;

    fn listen(&self, address: &str) -> Result<Self::Listener, TransportError> {
        let path = PathBuf::from(address);
        // A stale socket file from a previous run would fail the bind.
        let _ = fs::remove_file(&path);
        let listener = UnixListener::bind(&path).map_err(|source| TransportError::Listen {
            address: address.to_string(),
            source,
        })?;
        Ok(UnixListenerEndpoint { listener, path })
    }

    fn accept(&self, listener: &mut Self::Listener) -> Result<Self::Stream, TransportError> {
        listener
            .listener
            .accept()
            .map(|(stream, _)| stream)
            .map_err(TransportError::Accept)
    }

    fn connect(&self, address: &str, timeout: Duration) -> Result<Self::Stream, TransportError> {
        connect_bounded(address, timeout)
    }

    fn send_advertise(&self, stream: &mut Self::Stream) -> Result<(), TransportError> {
        stream
            .write_all(&advertise_frame())
            .and_then(|()| stream.flush())
            .map_err(TransportError::Advertise)
    }

    fn listener_token(&self, listener: &Self::Listener) -> Self::Token {
        listener.listener.as_raw_fd()
    }

    fn stream_token(&self, stream: &Self::Stream) -> Self::Token {
        stream.as_raw_fd()
    }

    fn poll(
        &self,
        entries: &mut [PollEntry<Self::Token>],
        timeout: Option<Duration>,
    ) -> Result<u32, TransportError> {
        let mut fds: Vec<libc::pollfd> = entries
            .iter()
            .map(|entry| libc::pollfd {
                fd: entry.token,
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();
        let timeout_ms: libc::c_int = match timeout {
            None => -1,
            Some(timeout) => timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
        };

        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if rc < 0 {
            return Err(TransportError::Poll(io::Error::last_os_error()));
        }

        let mut signalled = 0;
        for (entry, fd) in entries.iter_mut().zip(&fds) {
            entry.revents = if fd.revents == 0 {
                PollEvents::None
            } else if fd.revents & libc::POLLHUP != 0 {
                // A hung-up listener is an endpoint failure, not a peer
                // disconnect.
                if entry.is_listener {
                    PollEvents::Error
                } else {
                    PollEvents::Hangup
                }
            } else if fd.revents & (libc::POLLERR | libc::POLLNVAL) != 0 {
                PollEvents::Error
            } else if fd.revents & libc::POLLIN != 0 {
                PollEvents::Signalled
            } else {
                PollEvents::Unknown
            };
            if entry.revents != PollEvents::None {
                signalled += 1;
            }
        }
        Ok(signalled)
    }

    fn close_listener(&self, listener: &mut Self::Listener, in_shutdown: bool) {
        // The descriptor closes when the endpoint drops; during process
        // shutdown we additionally skip filesystem work.
        if !in_shutdown {
            let _ = fs::remove_file(&listener.path);
        }
    }

    fn close_stream(&self, stream: &mut Self::Stream) {
        let _ = stream.shutdown(std::net::Shutdown::Both);
    }

    fn default_listen_address(&self) -> String {
        std::env::temp_dir()
            .join(format!("ferrox-diagnostic-{}.sock", std::process::id()))
            .to_string_lossy()
            .into_owned()
    }
}

/// Connect with a deadline. `UnixStream::connect` has no timeout form, so
/// this drives a non-blocking connect and polls for writability.
fn connect_bounded(address: &str, timeout: Duration) -> Result<UnixStream, TransportError> {
    let connect_error = |source: io::Error| TransportError::Connect {
        address: address.to_string(),
        source,
    };

    let raw = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0) };
    if raw < 0 {
        return Err(connect_error(io::Error::last_os_error()));
    }
    // OwnedFd closes the descriptor on every early-out below.
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };

    set_nonblocking(&fd, true).map_err(connect_error)?;

    let mut sockaddr: libc::sockaddr_un = unsafe { mem::zeroed() };
    sockaddr.sun_family = libc::AF_UNIX as libc::sa_family_t;
    let path_bytes = address.as_bytes();
    if path_bytes.len() >= sockaddr.sun_path.len() {
        return Err(TransportError::BadAddress(address.to_string()));
    }
    for (dst, src) in sockaddr.sun_path.iter_mut().zip(path_bytes) {
        *dst = *src as libc::c_char;
    }

    let rc = unsafe {
        libc::connect(
            fd.as_raw_fd(),
            &sockaddr as *const libc::sockaddr_un as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_un>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        let error = io::Error::last_os_error();
        match error.raw_os_error() {
            Some(libc::EINPROGRESS) | Some(libc::EAGAIN) => {
                let mut pollfd = libc::pollfd {
                    fd: fd.as_raw_fd(),
                    events: libc::POLLOUT,
                    revents: 0,
                };
                let rc = unsafe {
                    libc::poll(&mut pollfd, 1, timeout.as_millis().min(i32::MAX as u128) as i32)
                };
                if rc == 0 {
                    return Err(TransportError::ConnectTimedOut {
                        address: address.to_string(),
                    });
                }
                if rc < 0 {
                    return Err(connect_error(io::Error::last_os_error()));
                }
                if let Some(error) = take_socket_error(&fd).map_err(connect_error)? {
                    return Err(connect_error(error));
                }
            }
            _ => return Err(connect_error(error)),
        }
    }

    set_nonblocking(&fd, false).map_err(connect_error)?;
    Ok(UnixStream::from(fd))
}

fn set_nonblocking(fd: &OwnedFd, nonblocking: bool) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let flags = if nonblocking {
        flags | libc::O_NONBLOCK
    } else {
        flags & !libc::O_NONBLOCK
    };
    if unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFL, flags) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Read and clear the pending error on a socket after an async connect.
fn take_socket_error(fd: &OwnedFd) -> io::Result<Option<io::Error>> {
    let mut error: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut error as *mut libc::c_int as *mut libc::c_void,
            &mut len,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    if error == 0 {
        Ok(None)
    } else {
        Ok(Some(io::Error::from_raw_os_error(error)))
    }
}
