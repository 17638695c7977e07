use std::io;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to listen on {address}: {source}")]
    Listen { address: String, source: io::Error },

    #[error("failed to connect to {address}: {source}")]
    Connect { address: String, source: io::Error },

    #[error("connect to {address} timed out")]
    ConnectTimedOut { address: String },

    #[error("failed to accept a connection: {0}")]
    Accept(io::Error),

    #[error("failed to send the advertise frame: {0}")]
    Advertise(io::Error),

    #[error("poll failed: {0}")]
    Poll(io::Error),

    #[error("address {0} is not representable by this transport")]
    BadAddress(String),

    #[error("endpoint is closed")]
    Closed,
}

/// Callback invoked, in addition to logging, for every transport error the
/// factory recovers from locally.
pub type ErrorCallback = dyn Fn(&TransportError) + Send + Sync;

pub(crate) fn report(callback: Option<&ErrorCallback>, error: &TransportError) {
    warn!(target: "diagnostics", %error, "transport error");
    if let Some(callback) = callback {
        callback(error);
    }
}
