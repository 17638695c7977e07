//! Configuration retrieval for the diagnostics core.

/// Environment variable naming the port configurations, `;`-separated.
pub const PORTS_ENV_VAR: &str = "FERROX_DIAGNOSTIC_PORTS";

/// Environment variable controlling the suspend mode of the default listen
/// port; any value above zero means suspend.
pub const DEFAULT_PORT_SUSPEND_ENV_VAR: &str = "FERROX_DEFAULT_PORT_SUSPEND";

#[derive(Debug, Clone, Default)]
pub struct DiagnosticsConfig {
    /// Raw ports configuration string, if any was provided.
    pub ports: Option<String>,
    /// Whether the default listen port should suspend runtime startup until
    /// a tool attaches and resumes.
    pub default_port_suspend: bool,
}

impl DiagnosticsConfig {
    pub fn from_env() -> Self {
        let ports = std::env::var(PORTS_ENV_VAR).ok().filter(|s| !s.is_empty());
        let default_port_suspend = std::env::var(DEFAULT_PORT_SUSPEND_ENV_VAR)
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .is_some_and(|value| value > 0);
        Self {
            ports,
            default_port_suspend,
        }
    }
}
