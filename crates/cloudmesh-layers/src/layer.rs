use cloudmesh_common::protocol::NodeId;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// A published service and the nodes currently offering it.
///
/// The candidate list is guarded by one mutex; `add_node`, `remove_node`
/// and `node_to_invoke` are the only ways to touch it. Duplicates are kept:
/// a node listed twice is picked twice per rotation.
#[derive(Debug)]
pub struct DistributedLayer {
    interface: String,
    name: String,
    nodes: Mutex<VecDeque<NodeId>>,
}

impl DistributedLayer {
    pub fn new(interface: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            name: name.into(),
            nodes: Mutex::new(VecDeque::new()),
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append `node` to the tail of the candidate list.
    pub fn add_node(&self, node: impl Into<NodeId>) {
        self.candidates().push_back(node.into());
    }

    /// Remove the first occurrence of `node`. Returns false if absent.
    pub fn remove_node(&self, node: &str) -> bool {
        let mut nodes = self.candidates();
        match nodes.iter().position(|n| n == node) {
            Some(index) => {
                nodes.remove(index);
                true
            }
            None => false,
        }
    }

    /// Get the next node using round-robin
    pub fn node_to_invoke(&self) -> Option<NodeId> {
        let mut nodes = self.candidates();
        // Rotate: move first to back, return it
        let node = nodes.pop_front()?;
        nodes.push_back(node.clone());
        Some(node)
    }

    pub fn contains(&self, node: &str) -> bool {
        self.candidates().iter().any(|n| n == node)
    }

    pub fn node_count(&self) -> usize {
        self.candidates().len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates().is_empty()
    }

    /// Snapshot of the candidate list in rotation order.
    pub fn nodes(&self) -> Vec<NodeId> {
        self.candidates().iter().cloned().collect()
    }

    fn candidates(&self) -> MutexGuard<'_, VecDeque<NodeId>> {
        // The list stays consistent even if a holder panicked.
        self.nodes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
