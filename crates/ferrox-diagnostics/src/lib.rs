//! # ferrox-diagnostics
//!
//! The diagnostic port multiplexer of the ferrox runtime: a factory that
//! builds a set of named IPC endpoints from configuration (some listening,
//! some dialling out), polls them with adaptive back-off, and hands ready
//! bidirectional streams to the diagnostic server. Ports configured in
//! suspend mode gate runtime startup until an attached tool acknowledges.
//!
//! ## Subsystems
//!
//! - **Transport** (`transport`): the low-level endpoint interface; a
//!   Unix-domain-socket implementation ships on Unix targets.
//! - **Configuration** (`config`, `ports_spec`): environment retrieval and
//!   the ports-string parser.
//! - **Ports** (`port`): the listen/connect endpoint variants.
//! - **Factory** (`factory`): the poll loop and lifecycle operations.
//!
//! ## Feature Flags
//!
//! - `multithreading`: the poll loop blocks and retries until a stream is
//!   available. Without it, each call makes a single poll attempt so a
//!   cooperative event loop is never blocked.
//! - `default-listen-port`: append a listen port on the platform-default
//!   address to whatever configuration names.

mod config;
mod error;
mod factory;
pub mod metrics;
mod port;
mod ports_spec;
pub mod transport;

pub use config::DiagnosticsConfig;
pub use error::{ErrorCallback, TransportError};
pub use factory::{
    POLL_TIMEOUT_FALLOFF_FACTOR, POLL_TIMEOUT_MAX_MS, POLL_TIMEOUT_MIN_MS, StreamFactory,
};
pub use port::{PortDescription, PortKind, SuspendMode};
pub use ports_spec::{PortSpec, parse_ports_config};
pub use transport::{PollEntry, PollEvents, Transport};

#[cfg(unix)]
pub use transport::unix::UnixTransport;
