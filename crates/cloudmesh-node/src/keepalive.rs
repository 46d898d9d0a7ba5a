use cloudmesh_common::protocol::{Message, MessageBody, NodeId, Result};
use dashmap::DashMap;
use std::sync::Weak;
use tracing::{debug, warn};

use crate::cloud::Cloud;
use crate::config::KeepAliveConfig;

/// Heartbeat for identified peers.
///
/// Every `interval` each peer gets a `KeepAlive`; a peer that misses
/// `failure_threshold` acks in a row is dropped.
pub struct KeepAlive {
    cloud: Weak<Cloud>,
    config: KeepAliveConfig,
    failures: DashMap<NodeId, u32>,
}

impl KeepAlive {
    pub fn new(cloud: Weak<Cloud>, config: KeepAliveConfig) -> Self {
        Self {
            cloud,
            config,
            failures: DashMap::new(),
        }
    }

    /// Starts the keep-alive task. It ends when the node is dropped.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(self) {
        let mut interval = tokio::time::interval(self.config.interval);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            interval.tick().await;
            let Some(cloud) = self.cloud.upgrade() else {
                debug!("Node gone, stopping keep-alive");
                return;
            };
            self.check_all_peers(&cloud).await;
        }
    }

    async fn check_all_peers(&self, cloud: &Cloud) {
        let nodes = cloud.peers.node_ids();
        self.failures.retain(|node, _| nodes.contains(node));

        let checks: Vec<_> = nodes
            .into_iter()
            .map(|node| async move {
                let result = self.ping(cloud, &node).await;
                (node, result)
            })
            .collect();

        let results = futures::future::join_all(checks).await;

        for (node, result) in results {
            match result {
                Ok(()) => {
                    self.failures.remove(&node);
                }
                Err(e) => {
                    let failures = {
                        let mut count = self.failures.entry(node.clone()).or_insert(0);
                        *count += 1;
                        *count
                    };
                    debug!(node = %node, failures, "Keep-alive missed: {}", e);

                    if failures >= self.config.failure_threshold {
                        warn!(node = %node, failures, "Peer stopped answering keep-alives, dropping it");
                        self.failures.remove(&node);
                        cloud.drop_peer(&node);
                    }
                }
            }
        }
    }

    async fn ping(&self, cloud: &Cloud, node: &str) -> Result<()> {
        let keep_alive = Message::new(MessageBody::KeepAlive);
        cloud
            .dispatcher
            .request(node, keep_alive, Some(self.config.timeout))
            .await
            .map(|_| ())
    }
}
