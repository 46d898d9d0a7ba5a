use cloudmesh_common::protocol::{NodeId, PublishLayer};
use dashmap::DashMap;
use std::sync::Arc;

use crate::layer::DistributedLayer;

/// Layers known to this node, by service path.
#[derive(Debug, Default)]
pub struct LayerRegistry {
    layers: DashMap<String, Arc<DistributedLayer>>,
}

impl LayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `node` offers the layer at `path`, creating the layer on
    /// first publication. A node already listed is not added again.
    ///
    /// Returns true if the candidate list changed.
    pub fn publish(&self, path: &str, node: &str) -> bool {
        let layer = self
            .layers
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(DistributedLayer::new(path, layer_name(path))))
            .clone();

        if layer.contains(node) {
            return false;
        }
        layer.add_node(node);
        tracing::debug!(path, node, "Layer published");
        true
    }

    pub fn publish_message(&self, publish: &PublishLayer) -> bool {
        self.publish(&publish.path, &publish.node_id)
    }

    /// Remove `node` from the layer at `path`; the layer goes away with its
    /// last node.
    pub fn withdraw(&self, path: &str, node: &str) -> bool {
        let Some(layer) = self.get(path) else {
            return false;
        };
        let removed = layer.remove_node(node);
        if removed {
            self.layers.remove_if(path, |_, layer| layer.is_empty());
        }
        removed
    }

    /// Drop `node` from every layer. Returns the paths it was removed from.
    pub fn forget_node(&self, node: &str) -> Vec<String> {
        let mut touched = Vec::new();
        for path in self.names() {
            let mut removed = false;
            while self.withdraw(&path, node) {
                removed = true;
            }
            if removed {
                touched.push(path);
            }
        }
        touched
    }

    pub fn get(&self, path: &str) -> Option<Arc<DistributedLayer>> {
        self.layers.get(path).map(|layer| layer.clone())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.layers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Paths of the layers `node` offers.
    pub fn offered_by(&self, node: &str) -> Vec<String> {
        let mut paths: Vec<String> = self
            .layers
            .iter()
            .filter(|e| e.value().contains(node))
            .map(|e| e.key().clone())
            .collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

/// Logical name of a layer: the last dotted segment of its path.
fn layer_name(path: &str) -> &str {
    path.rsplit('.').next().unwrap_or(path)
}

/// Build the `PublishLayer` payload announcing `path` on `node`.
pub fn publication(path: &str, node: &NodeId, service_id: &str) -> PublishLayer {
    PublishLayer {
        path: path.to_string(),
        node_id: node.clone(),
        service_id: service_id.to_string(),
    }
}
