use cloudmesh_common::transport::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_MESSAGE_SIZE};
use cloudmesh_layers::DispatcherConfig;
use std::time::Duration;

/// Node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Stable node id. A random one is generated when absent.
    pub node_id: Option<String>,
    /// Human readable name announced to peers.
    pub name: String,
    /// Address the message server listens on.
    pub bind_addr: String,
    /// Peers to connect to at startup.
    pub peers: Vec<String>,
    pub connect_timeout: Duration,
    /// How long a freshly connected peer has to answer the handshake.
    pub handshake_timeout: Duration,
    pub max_message_size: usize,
    pub dispatcher: DispatcherConfig,
    pub keep_alive: KeepAliveConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            name: "cloudmesh".to_string(),
            bind_addr: "127.0.0.1:7400".to_string(),
            peers: Vec::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handshake_timeout: Duration::from_secs(5),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            dispatcher: DispatcherConfig::default(),
            keep_alive: KeepAliveConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn new(name: impl Into<String>, bind_addr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bind_addr: bind_addr.into(),
            ..Self::default()
        }
    }

    pub fn with_peer(mut self, addr: impl Into<String>) -> Self {
        self.peers.push(addr.into());
        self
    }
}

/// Keep-alive configuration.
#[derive(Debug, Clone)]
pub struct KeepAliveConfig {
    /// Zero disables the keep-alive task.
    pub interval: Duration,
    pub timeout: Duration,
    /// Consecutive missed acks before a peer is dropped.
    pub failure_threshold: u32,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_millis(2000),
            failure_threshold: 3,
        }
    }
}

impl KeepAliveConfig {
    pub fn disabled() -> Self {
        Self {
            interval: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.interval.is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_config_default() {
        let config = NodeConfig::default();
        assert!(config.node_id.is_none());
        assert_eq!(config.bind_addr, "127.0.0.1:7400");
        assert!(config.peers.is_empty());
        assert!(config.keep_alive.is_enabled());
    }

    #[test]
    fn test_node_config_builder() {
        let config = NodeConfig::new("alpha", "0.0.0.0:9000")
            .with_peer("10.0.0.2:7400")
            .with_peer("10.0.0.3:7400");
        assert_eq!(config.name, "alpha");
        assert_eq!(config.peers.len(), 2);
    }

    #[test]
    fn test_keep_alive_disabled() {
        let config = KeepAliveConfig::disabled();
        assert!(!config.is_enabled());
        assert_eq!(config.failure_threshold, 3);
    }
}
