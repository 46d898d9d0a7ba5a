use cloudmesh_common::protocol::Value;

use crate::leaf::{LocalLeaf, RemoteLeaf, RemoteValue};
use crate::tree::DistributedTree;

/// An entry of the distributed namespace.
#[derive(Debug, Clone, PartialEq)]
pub enum DistributedObject {
    Tree(DistributedTree),
    Local(LocalLeaf),
    Remote(RemoteLeaf),
}

/// What a resolved path holds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Instance<'a> {
    /// The real value, held by this node.
    Value(&'a Value),
    /// The nodes holding the real value.
    Remote(&'a RemoteValue),
    /// The path ends at a branch.
    Branches(&'a DistributedTree),
}

impl DistributedObject {
    pub fn name(&self) -> &str {
        match self {
            DistributedObject::Tree(tree) => tree.name(),
            DistributedObject::Local(leaf) => leaf.name(),
            DistributedObject::Remote(leaf) => leaf.name(),
        }
    }

    pub fn instance(&self) -> Instance<'_> {
        match self {
            DistributedObject::Tree(tree) => Instance::Branches(tree),
            DistributedObject::Local(leaf) => Instance::Value(leaf.value()),
            DistributedObject::Remote(leaf) => Instance::Remote(leaf.owners()),
        }
    }

    pub fn last_update(&self) -> u64 {
        match self {
            DistributedObject::Tree(tree) => tree.last_update(),
            DistributedObject::Local(leaf) => leaf.last_update(),
            DistributedObject::Remote(leaf) => leaf.last_update(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        !matches!(self, DistributedObject::Tree(_))
    }

    pub fn as_tree(&self) -> Option<&DistributedTree> {
        match self {
            DistributedObject::Tree(tree) => Some(tree),
            _ => None,
        }
    }

    pub fn as_tree_mut(&mut self) -> Option<&mut DistributedTree> {
        match self {
            DistributedObject::Tree(tree) => Some(tree),
            _ => None,
        }
    }
}

impl From<DistributedTree> for DistributedObject {
    fn from(tree: DistributedTree) -> Self {
        DistributedObject::Tree(tree)
    }
}

impl From<LocalLeaf> for DistributedObject {
    fn from(leaf: LocalLeaf) -> Self {
        DistributedObject::Local(leaf)
    }
}

impl From<RemoteLeaf> for DistributedObject {
    fn from(leaf: RemoteLeaf) -> Self {
        DistributedObject::Remote(leaf)
    }
}
