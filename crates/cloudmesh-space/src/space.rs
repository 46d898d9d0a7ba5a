//! The namespace as seen by one node.
//!
//! [`ObjectSpace`] applies the namespace messages to a [`DistributedTree`]:
//!
//! | Message | Effect |
//! |---|---|
//! | `PublishPath` from `n` | remote leaf naming `n` as an owner (unless we hold the value) |
//! | `PublishObject` | values stored locally, replacing a remote leaf |
//! | `HidePath` from `n` | `n` dropped from the owners, leaf removed when none is left |
//! | `RemoveObject` | entry deleted whatever its kind |
//!
//! A node publishing a value announces the path to every peer and pushes the
//! value only to the destinations it picked, so peers that did not receive
//! the value still know whom to ask.

use cloudmesh_common::protocol::{now_millis, NodeId, PathRef, PathValue, PublishObject, PublishPath, Value};

use crate::error::{Result, SpaceError};
use crate::leaf::{LocalLeaf, RemoteLeaf, RemoteValue};
use crate::object::DistributedObject;
use crate::tree::DistributedTree;

/// Outcome of resolving a path.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Local(Value),
    Remote(RemoteValue),
    /// The path names a branch, not a leaf.
    Branch,
    NotFound,
}

/// Messages to send after publishing a value.
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    /// Announces the path to every peer.
    pub path: PublishPath,
    /// Carries the value. Sent only to the chosen `destinations`; with none
    /// chosen, peers fetch the value with `Get` instead.
    pub object: PublishObject,
}

pub struct ObjectSpace {
    local_node: NodeId,
    root: DistributedTree,
}

impl ObjectSpace {
    pub fn new(local_node: impl Into<NodeId>) -> Self {
        Self {
            local_node: local_node.into(),
            root: DistributedTree::new(""),
        }
    }

    pub fn local_node(&self) -> &str {
        &self.local_node
    }

    pub fn root(&self) -> &DistributedTree {
        &self.root
    }

    /// Store `value` as owned by this node and build the messages that
    /// propagate it.
    pub fn publish_local(
        &mut self,
        path: Vec<String>,
        value: Value,
        destinations: Vec<NodeId>,
    ) -> Result<Publication> {
        self.store_local(&path, value.clone())?;
        Ok(Publication {
            path: PublishPath { path: path.clone() },
            object: PublishObject {
                objects: vec![PathValue { path, value }],
                published_at: now_millis(),
                destinations,
            },
        })
    }

    /// Stop owning `path`. Returns the `HidePath` payload to broadcast, or
    /// `None` when this node held no value there.
    pub fn retract_local(&mut self, path: &[String]) -> Option<PathRef> {
        match self.root.get(path) {
            Some(DistributedObject::Local(_)) => {
                self.root.remove(path);
                Some(PathRef {
                    path: path.to_vec(),
                })
            }
            _ => None,
        }
    }

    /// Apply a `PublishObject`. Values addressed to other nodes are ignored.
    /// Returns the number of values stored.
    pub fn apply_publish(&mut self, publish: &PublishObject) -> usize {
        if !publish.destinations.is_empty() && !publish.destinations.contains(&self.local_node) {
            return 0;
        }

        let mut stored = 0;
        for entry in &publish.objects {
            match self.store_local(&entry.path, entry.value.clone()) {
                Ok(()) => stored += 1,
                Err(e) => tracing::warn!(path = ?entry.path, "Ignoring published value: {}", e),
            }
        }
        stored
    }

    /// Record `owner` as holding the value at `path`.
    ///
    /// Returns false when nothing changed: the value is held locally or
    /// `owner` was already known.
    pub fn apply_publish_path(&mut self, owner: &str, path: &[String]) -> Result<bool> {
        let (name, parent) = path.split_last().ok_or(SpaceError::EmptyPath)?;

        match self.root.get_mut(path) {
            Some(DistributedObject::Local(_)) => Ok(false),
            Some(DistributedObject::Remote(leaf)) => Ok(leaf.add_owner(owner)),
            Some(DistributedObject::Tree(_)) => Err(SpaceError::NotATree(name.clone())),
            None => {
                self.root.add_at(parent, RemoteLeaf::new(name.clone(), owner))?;
                Ok(true)
            }
        }
    }

    /// `owner` no longer holds `path`. Returns true if a remote leaf changed.
    pub fn hide(&mut self, owner: &str, path: &[String]) -> bool {
        let orphan = match self.root.get_mut(path) {
            Some(DistributedObject::Remote(leaf)) => {
                if !leaf.remove_owner(owner) {
                    return false;
                }
                leaf.is_orphan()
            }
            _ => return false,
        };

        if orphan {
            self.root.remove(path);
        }
        true
    }

    /// Delete the entry at `path`, whatever it holds.
    pub fn remove(&mut self, path: &[String]) -> bool {
        self.root.remove(path).is_some()
    }

    pub fn resolve(&self, path: &[String]) -> Resolution {
        match self.root.get(path) {
            Some(DistributedObject::Local(leaf)) => Resolution::Local(leaf.value().clone()),
            Some(DistributedObject::Remote(leaf)) => Resolution::Remote(leaf.owners().clone()),
            Some(DistributedObject::Tree(_)) => Resolution::Branch,
            None => Resolution::NotFound,
        }
    }

    /// Paths of the values this node owns.
    pub fn local_paths(&self) -> Vec<Vec<String>> {
        self.root
            .leaf_paths()
            .into_iter()
            .filter(|p| matches!(self.root.get(p), Some(DistributedObject::Local(_))))
            .collect()
    }

    /// Drop `node` from every remote leaf. Returns the number of leaves
    /// that changed.
    pub fn forget_node(&mut self, node: &str) -> usize {
        let paths = self.root.leaf_paths();
        paths.iter().filter(|path| self.hide(node, path)).count()
    }

    fn store_local(&mut self, path: &[String], value: Value) -> Result<()> {
        let (name, parent) = path.split_last().ok_or(SpaceError::EmptyPath)?;

        if let Some(DistributedObject::Local(leaf)) = self.root.get_mut(path) {
            leaf.set_value(value);
            return Ok(());
        }
        if let Some(DistributedObject::Tree(_)) = self.root.get(path) {
            return Err(SpaceError::NotATree(name.clone()));
        }
        self.root.add_at(parent, LocalLeaf::new(name.clone(), value))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(segments: &[&str]) -> Vec<String> {
        segments.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_publish_local_resolves_locally() {
        let mut space = ObjectSpace::new("me");
        let publication = space
            .publish_local(path(&["config", "threads"]), json!(8), vec![])
            .unwrap();

        assert_eq!(space.resolve(&path(&["config", "threads"])), Resolution::Local(json!(8)));
        assert_eq!(publication.path.path, path(&["config", "threads"]));
        assert_eq!(publication.object.objects[0].value, json!(8));
    }

    #[test]
    fn test_publish_path_creates_remote_leaf() {
        let mut space = ObjectSpace::new("me");
        assert!(space.apply_publish_path("a", &path(&["x", "y"])).unwrap());
        assert!(space.apply_publish_path("b", &path(&["x", "y"])).unwrap());
        assert!(!space.apply_publish_path("b", &path(&["x", "y"])).unwrap());

        assert_eq!(
            space.resolve(&path(&["x", "y"])),
            Resolution::Remote(RemoteValue {
                nodes: vec!["a".into(), "b".into()]
            })
        );
        assert_eq!(space.resolve(&path(&["x"])), Resolution::Branch);
    }

    #[test]
    fn test_publish_path_does_not_shadow_local_value() {
        let mut space = ObjectSpace::new("me");
        space.publish_local(path(&["k"]), json!(1), vec![]).unwrap();

        assert!(!space.apply_publish_path("a", &path(&["k"])).unwrap());
        assert_eq!(space.resolve(&path(&["k"])), Resolution::Local(json!(1)));
    }

    #[test]
    fn test_publish_object_promotes_remote_leaf() {
        let mut space = ObjectSpace::new("me");
        space.apply_publish_path("a", &path(&["k"])).unwrap();

        let publish = PublishObject {
            objects: vec![PathValue {
                path: path(&["k"]),
                value: json!("copied"),
            }],
            published_at: 0,
            destinations: vec!["me".into()],
        };
        assert_eq!(space.apply_publish(&publish), 1);
        assert_eq!(space.resolve(&path(&["k"])), Resolution::Local(json!("copied")));
    }

    #[test]
    fn test_publish_object_for_other_node_is_ignored() {
        let mut space = ObjectSpace::new("me");
        let publish = PublishObject {
            objects: vec![PathValue {
                path: path(&["k"]),
                value: json!(1),
            }],
            published_at: 0,
            destinations: vec!["someone-else".into()],
        };
        assert_eq!(space.apply_publish(&publish), 0);
        assert_eq!(space.resolve(&path(&["k"])), Resolution::NotFound);
    }

    #[test]
    fn test_hide_demotes_and_drops_orphans() {
        let mut space = ObjectSpace::new("me");
        space.apply_publish_path("a", &path(&["k"])).unwrap();
        space.apply_publish_path("b", &path(&["k"])).unwrap();

        assert!(space.hide("a", &path(&["k"])));
        assert_eq!(
            space.resolve(&path(&["k"])),
            Resolution::Remote(RemoteValue { nodes: vec!["b".into()] })
        );

        assert!(space.hide("b", &path(&["k"])));
        assert_eq!(space.resolve(&path(&["k"])), Resolution::NotFound);
        assert!(!space.hide("b", &path(&["k"])));
    }

    #[test]
    fn test_hide_never_touches_local_values() {
        let mut space = ObjectSpace::new("me");
        space.publish_local(path(&["k"]), json!(1), vec![]).unwrap();
        assert!(!space.hide("me", &path(&["k"])));
        assert_eq!(space.resolve(&path(&["k"])), Resolution::Local(json!(1)));
    }

    #[test]
    fn test_retract_local() {
        let mut space = ObjectSpace::new("me");
        space.publish_local(path(&["k"]), json!(1), vec![]).unwrap();

        assert_eq!(space.retract_local(&path(&["k"])), Some(PathRef::new(["k"])));
        assert_eq!(space.retract_local(&path(&["k"])), None);
    }

    #[test]
    fn test_remove_deletes_any_kind() {
        let mut space = ObjectSpace::new("me");
        space.publish_local(path(&["l"]), json!(1), vec![]).unwrap();
        space.apply_publish_path("a", &path(&["r"])).unwrap();

        assert!(space.remove(&path(&["l"])));
        assert!(space.remove(&path(&["r"])));
        assert!(!space.remove(&path(&["r"])));
    }

    #[test]
    fn test_forget_node() {
        let mut space = ObjectSpace::new("me");
        space.apply_publish_path("gone", &path(&["a", "1"])).unwrap();
        space.apply_publish_path("gone", &path(&["a", "2"])).unwrap();
        space.apply_publish_path("stays", &path(&["a", "2"])).unwrap();
        space.publish_local(path(&["mine"]), json!(0), vec![]).unwrap();

        assert_eq!(space.forget_node("gone"), 2);
        assert_eq!(space.resolve(&path(&["a", "1"])), Resolution::NotFound);
        assert!(matches!(space.resolve(&path(&["a", "2"])), Resolution::Remote(_)));
        assert_eq!(space.local_paths(), vec![path(&["mine"])]);
    }

    #[test]
    fn test_empty_path_is_rejected() {
        let mut space = ObjectSpace::new("me");
        assert_eq!(
            space.publish_local(vec![], json!(1), vec![]),
            Err(SpaceError::EmptyPath)
        );
        assert_eq!(space.apply_publish_path("a", &[]), Err(SpaceError::EmptyPath));
    }
}
