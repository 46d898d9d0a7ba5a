//! CloudMesh Distributed Object Space
//!
//! A path-addressed namespace whose leaves are either owned by this node
//! ([`LocalLeaf`]) or known to live on other nodes ([`RemoteLeaf`]), plus the
//! passive state holders used by the distributed lock and map protocols.
//!
//! Nothing in this crate locks internally. The node runtime owns these
//! structures and serializes access to them.

pub mod clock;
pub mod error;
pub mod leaf;
pub mod lock;
pub mod map;
pub mod object;
pub mod space;
pub mod tree;

pub use error::SpaceError;
pub use leaf::{LocalLeaf, RemoteLeaf, RemoteValue};
pub use lock::{DistributedLock, LockStatus};
pub use map::DistributedMap;
pub use object::{DistributedObject, Instance};
pub use space::{ObjectSpace, Publication, Resolution};
pub use tree::DistributedTree;
