use std::collections::HashMap;

use crate::clock;
use crate::error::{Result, SpaceError};
use crate::object::{DistributedObject, Instance};

/// A named branch of the namespace mapping branch names to objects.
///
/// Lookups walk one branch per path segment. Every intermediate segment
/// has to name another tree; the object reached by the last segment is the
/// result.
#[derive(Debug, Clone, PartialEq)]
pub struct DistributedTree {
    name: String,
    branches: HashMap<String, DistributedObject>,
    last_update: u64,
}

impl DistributedTree {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            branches: HashMap::new(),
            last_update: clock::stamp(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Time of the last change to this tree's own branch map.
    pub fn last_update(&self) -> u64 {
        self.last_update
    }

    /// Inserts `object` under its own name, replacing whatever was there.
    pub fn add(&mut self, object: impl Into<DistributedObject>) -> Result<Option<DistributedObject>> {
        let object = object.into();
        if object.name().is_empty() {
            return Err(SpaceError::InvalidName);
        }
        self.last_update = clock::stamp();
        Ok(self.branches.insert(object.name().to_string(), object))
    }

    pub fn branch(&self, name: &str) -> Option<&DistributedObject> {
        self.branches.get(name)
    }

    pub fn branch_mut(&mut self, name: &str) -> Option<&mut DistributedObject> {
        self.branches.get_mut(name)
    }

    pub fn remove_branch(&mut self, name: &str) -> Option<DistributedObject> {
        let removed = self.branches.remove(name);
        if removed.is_some() {
            self.last_update = clock::stamp();
        }
        removed
    }

    pub fn branches(&self) -> impl Iterator<Item = &DistributedObject> {
        self.branches.values()
    }

    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    /// Object at `path`, if every intermediate segment is a tree.
    pub fn get<S: AsRef<str>>(&self, path: &[S]) -> Option<&DistributedObject> {
        let (last, parents) = path.split_last()?;
        let mut tree = self;
        for segment in parents {
            tree = tree.branch(segment.as_ref())?.as_tree()?;
        }
        tree.branch(last.as_ref())
    }

    pub fn get_mut<S: AsRef<str>>(&mut self, path: &[S]) -> Option<&mut DistributedObject> {
        let (last, parents) = path.split_last()?;
        let mut tree = self;
        for segment in parents {
            tree = tree.branch_mut(segment.as_ref())?.as_tree_mut()?;
        }
        tree.branch_mut(last.as_ref())
    }

    /// Instance of the object at `path`.
    pub fn get_instance<S: AsRef<str>>(&self, path: &[S]) -> Option<Instance<'_>> {
        self.get(path).map(DistributedObject::instance)
    }

    /// Adds `object` below `parent`, creating missing intermediate trees.
    ///
    /// Fails when a segment of `parent` already names a leaf.
    pub fn add_at<S: AsRef<str>>(
        &mut self,
        parent: &[S],
        object: impl Into<DistributedObject>,
    ) -> Result<Option<DistributedObject>> {
        let mut tree = self;
        for segment in parent {
            let segment = segment.as_ref();
            if tree.branch(segment).is_none() {
                tree.add(DistributedTree::new(segment))?;
            }
            tree = tree
                .branch_mut(segment)
                .and_then(DistributedObject::as_tree_mut)
                .ok_or_else(|| SpaceError::NotATree(segment.to_string()))?;
        }
        tree.add(object)
    }

    /// Removes and returns the object at `path`.
    pub fn remove<S: AsRef<str>>(&mut self, path: &[S]) -> Option<DistributedObject> {
        let (last, parents) = path.split_last()?;
        let mut tree = self;
        for segment in parents {
            tree = tree.branch_mut(segment.as_ref())?.as_tree_mut()?;
        }
        tree.remove_branch(last.as_ref())
    }

    /// Paths of every leaf below this tree, in no particular order.
    pub fn leaf_paths(&self) -> Vec<Vec<String>> {
        let mut paths = Vec::new();
        let mut prefix = Vec::new();
        self.collect_leaf_paths(&mut prefix, &mut paths);
        paths
    }

    fn collect_leaf_paths(&self, prefix: &mut Vec<String>, out: &mut Vec<Vec<String>>) {
        for (name, object) in &self.branches {
            prefix.push(name.clone());
            match object {
                DistributedObject::Tree(tree) => tree.collect_leaf_paths(prefix, out),
                _ => out.push(prefix.clone()),
            }
            prefix.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leaf::{LocalLeaf, RemoteLeaf};
    use serde_json::json;

    fn sample() -> DistributedTree {
        let mut b = DistributedTree::new("a");
        b.add(LocalLeaf::new("b", json!("x"))).unwrap();
        let mut root = DistributedTree::new("root");
        root.add(b).unwrap();
        root
    }

    #[test]
    fn test_path_resolution() {
        let root = sample();

        assert_eq!(root.get_instance(&["a", "b"]), Some(Instance::Value(&json!("x"))));
        assert_eq!(root.get_instance(&["a", "missing"]), None);
        assert_eq!(root.get_instance(&["missing"]), None);
    }

    #[test]
    fn test_path_through_leaf_stops() {
        let root = sample();
        assert_eq!(root.get_instance(&["a", "b", "c"]), None);
    }

    #[test]
    fn test_empty_path_resolves_nothing() {
        let root = sample();
        let empty: [&str; 0] = [];
        assert!(root.get(&empty).is_none());
    }

    #[test]
    fn test_path_ending_at_tree_returns_branches() {
        let root = sample();
        match root.get_instance(&["a"]) {
            Some(Instance::Branches(tree)) => assert_eq!(tree.name(), "a"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_remote_leaf_instance_is_owner_list() {
        let mut root = DistributedTree::new("root");
        root.add(RemoteLeaf::new("r", "node-1")).unwrap();

        match root.get_instance(&["r"]) {
            Some(Instance::Remote(owners)) => assert_eq!(owners.nodes, vec!["node-1".to_string()]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_add_replaces_in_place() {
        let mut root = DistributedTree::new("root");
        root.add(RemoteLeaf::new("k", "n1")).unwrap();

        let replaced = root.add(LocalLeaf::new("k", json!(1))).unwrap();
        assert!(matches!(replaced, Some(DistributedObject::Remote(_))));
        assert_eq!(root.get_instance(&["k"]), Some(Instance::Value(&json!(1))));
        assert_eq!(root.len(), 1);
    }

    #[test]
    fn test_add_rejects_empty_name() {
        let mut root = DistributedTree::new("root");
        assert_eq!(
            root.add(LocalLeaf::new("", json!(1))),
            Err(SpaceError::InvalidName)
        );
    }

    #[test]
    fn test_add_at_creates_intermediate_trees() {
        let mut root = DistributedTree::new("root");
        root.add_at(&["x", "y"], LocalLeaf::new("z", json!(true))).unwrap();

        assert_eq!(
            root.get_instance(&["x", "y", "z"]),
            Some(Instance::Value(&json!(true)))
        );
        assert_eq!(root.leaf_paths(), vec![vec!["x".to_string(), "y".into(), "z".into()]]);
    }

    #[test]
    fn test_add_at_through_leaf_fails() {
        let mut root = sample();
        let result = root.add_at(&["a", "b"], LocalLeaf::new("c", json!(1)));
        assert_eq!(result, Err(SpaceError::NotATree("b".to_string())));
    }

    #[test]
    fn test_remove() {
        let mut root = sample();
        assert!(root.remove(&["a", "b"]).is_some());
        assert!(root.get(&["a", "b"]).is_none());
        assert!(root.remove(&["a", "b"]).is_none());
    }

    #[test]
    fn test_add_refreshes_tree_timestamp() {
        let mut root = DistributedTree::new("root");
        let before = root.last_update();
        root.add(LocalLeaf::new("k", json!(1))).unwrap();
        assert!(root.last_update() > before);
    }
}
