use cloudmesh_common::protocol::{NodeId, Value};
use serde::{Deserialize, Serialize};

use crate::clock;

/// The nodes that own a value this node only knows about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteValue {
    pub nodes: Vec<NodeId>,
}

impl RemoteValue {
    pub fn contains(&self, node: &str) -> bool {
        self.nodes.iter().any(|n| n == node)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// A value owned by this node.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalLeaf {
    name: String,
    value: Value,
    last_update: u64,
}

impl LocalLeaf {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
            last_update: clock::stamp(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn set_value(&mut self, value: Value) {
        self.value = value;
        self.last_update = clock::stamp();
    }

    pub fn last_update(&self) -> u64 {
        self.last_update
    }
}

/// A value owned elsewhere. Holds the owners, never the value.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteLeaf {
    name: String,
    owners: RemoteValue,
    last_update: u64,
}

impl RemoteLeaf {
    pub fn new(name: impl Into<String>, owner: impl Into<NodeId>) -> Self {
        Self {
            name: name.into(),
            owners: RemoteValue {
                nodes: vec![owner.into()],
            },
            last_update: clock::stamp(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owners(&self) -> &RemoteValue {
        &self.owners
    }

    /// Records `node` as an owner. Returns false if it already was one.
    pub fn add_owner(&mut self, node: impl Into<NodeId>) -> bool {
        let node = node.into();
        if self.owners.contains(&node) {
            return false;
        }
        self.owners.nodes.push(node);
        self.last_update = clock::stamp();
        true
    }

    /// Forgets `node` as an owner. Returns false if it was not one.
    pub fn remove_owner(&mut self, node: &str) -> bool {
        let before = self.owners.nodes.len();
        self.owners.nodes.retain(|n| n != node);
        if self.owners.nodes.len() == before {
            return false;
        }
        self.last_update = clock::stamp();
        true
    }

    /// True once no owner is left.
    pub fn is_orphan(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn last_update(&self) -> u64 {
        self.last_update
    }
}
