use std::time::Duration;

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// How long a call waits for its reply when the caller gives no timeout.
    pub default_timeout: Duration,
    /// Skip nodes that reported themselves busy while another candidate
    /// is available.
    pub skip_busy_nodes: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            skip_busy_nodes: true,
        }
    }
}
