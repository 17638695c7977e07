//! Parser for the ports configuration string.
//!
//! Grammar: `port (';' port)*` where `port` is `(tag ',')* address`. Tags
//! are case-insensitive (`listen`, `connect`, `suspend`, `nosuspend`);
//! unknown tags are logged and ignored, and the defaults are
//! connect + suspend.

use crate::port::{PortKind, SuspendMode};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec {
    pub kind: PortKind,
    pub suspend: SuspendMode,
    pub address: String,
}

/// Split the configuration into port specs. Later-declared entries are
/// parsed first and the returned order is the build order of the port set.
/// Malformed entries (an empty address, or an empty part where a tag
/// belongs) are dropped with a log.
pub fn parse_ports_config(config: &str) -> Vec<PortSpec> {
    let mut specs = Vec::new();
    for port_config in config.split(';').rev() {
        if port_config.is_empty() {
            continue;
        }
        info!(
            target: "diagnostics",
            port_config,
            "attempting to build diagnostic port from configuration"
        );

        let parts: Vec<&str> = port_config.split(',').collect();
        let Some((address, tags)) = parts.split_last() else {
            continue;
        };
        if address.is_empty() || tags.iter().any(|tag| tag.is_empty()) {
            info!(target: "diagnostics", port_config, "ignoring port configuration with empty address");
            continue;
        }

        let mut kind = PortKind::Connect;
        let mut suspend = SuspendMode::Suspend;
        // Applied back to front, so on conflicting tags the earliest wins.
        for tag in tags.iter().rev() {
            if tag.eq_ignore_ascii_case("listen") {
                kind = PortKind::Listen;
            } else if tag.eq_ignore_ascii_case("connect") {
                kind = PortKind::Connect;
            } else if tag.eq_ignore_ascii_case("suspend") {
                suspend = SuspendMode::Suspend;
            } else if tag.eq_ignore_ascii_case("nosuspend") {
                suspend = SuspendMode::NoSuspend;
            } else {
                info!(target: "diagnostics", tag, "unknown port configuration tag");
            }
        }

        specs.push(PortSpec {
            kind,
            suspend,
            address: (*address).to_string(),
        });
    }
    specs
}
