//! Typed payloads carried by [`MessageBody`](super::MessageBody) variants.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::message::{Message, NodeId};

/// Namespace values are schemaless documents.
pub type Value = serde_json::Value;

/// Reads a value that is present on the wire as `Some`, even when it is
/// `null`. Plain `Option<Value>` would fold a published `null` into `None`.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

/// Identity a node announces when it connects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct NodeDescriptor {
    // Flattened next to the envelope's own `id`, so it needs its own key.
    #[serde(rename = "node_id")]
    pub id: NodeId,
    pub name: String,
    /// Address the node's server listens on, if it accepts connections.
    #[serde(default)]
    pub address: Option<String>,
}

impl NodeDescriptor {
    pub fn new(id: impl Into<NodeId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: None,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishPath {
    pub path: Vec<String>,
}

/// A single namespace entry inside a [`PublishObject`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathValue {
    pub path: Vec<String>,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishObject {
    pub objects: Vec<PathValue>,
    /// Time the publisher produced these values (ms since epoch).
    pub published_at: i64,
    /// Nodes the values are meant for. Empty means every peer.
    #[serde(default)]
    pub destinations: Vec<NodeId>,
}

/// Payload of the variants that only name a path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathRef {
    pub path: Vec<String>,
}

impl PathRef {
    pub fn new<S: Into<String>>(path: impl IntoIterator<Item = S>) -> Self {
        Self {
            path: path.into_iter().map(Into::into).collect(),
        }
    }
}

/// Reply to `Get`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GetResponse {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    pub not_found: bool,
}

impl GetResponse {
    pub fn found(value: Value) -> Self {
        Self {
            value: Some(value),
            not_found: false,
        }
    }

    pub fn not_found() -> Self {
        Self {
            value: None,
            not_found: true,
        }
    }
}

/// Payload of `Lock` and `Unlock`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LockRequest {
    pub path: Vec<String>,
    pub timeout_nanos: u64,
}

/// Payload of `Signal` and `SignalAll`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalRequest {
    pub lock_name: String,
    pub condition_name: String,
}

/// Advertises a layer (remotely invokable service) offered by a node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishLayer {
    pub path: String,
    pub node_id: NodeId,
    pub service_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LayerInvoke {
    pub path: String,
    pub method: String,
    /// Declared parameter types, used by the receiver to pick an overload.
    pub parameter_types: Vec<String>,
    /// Session of the caller, restored around the call on the receiving side.
    #[serde(default)]
    pub caller_session: Option<String>,
    pub arguments: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MethodInvoke {
    pub method: String,
    pub parameter_types: Vec<String>,
    pub arguments: Vec<Value>,
}

/// Failure information returned by a remote call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteFailure {
    /// Failure class on the remote side, e.g. `NoSuchMethod`.
    pub kind: String,
    pub message: String,
}

impl RemoteFailure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Reply to `LayerInvoke` and `MethodInvoke`. Exactly one of `value` and
/// `failure` is meaningful; a present `failure` wins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MethodResponse {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default)]
    pub failure: Option<RemoteFailure>,
}

impl MethodResponse {
    pub fn success(value: Value) -> Self {
        Self {
            value: Some(value),
            failure: None,
        }
    }

    pub fn failure(failure: RemoteFailure) -> Self {
        Self {
            value: None,
            failure: Some(failure),
        }
    }

    pub fn into_result(self) -> Result<Value, RemoteFailure> {
        match self.failure {
            Some(failure) => Err(failure),
            None => Ok(self.value.unwrap_or(Value::Null)),
        }
    }
}

/// Capability handshake exchanged when two endpoints first connect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceDefinition {
    pub service_id: String,
    pub service_name: String,
    pub broadcasting: bool,
    pub event_listener: bool,
    /// Embedded messages, delivered with their own ids and timestamps.
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// Batches messages for several nodes into one transmission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CloudWagon {
    pub destinations: Vec<NodeId>,
    pub messages: BTreeMap<NodeId, Vec<Message>>,
    /// Node that loaded the wagon. Relays keep it so the final hop
    /// attributes the messages to their author, not to the last relay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<NodeId>,
}

impl CloudWagon {
    pub fn new() -> Self {
        Self {
            destinations: Vec::new(),
            messages: BTreeMap::new(),
            source: None,
        }
    }

    /// An empty wagon loaded on behalf of `source`.
    pub fn from_source(source: impl Into<NodeId>) -> Self {
        Self {
            source: Some(source.into()),
            ..Self::new()
        }
    }

    /// Queues `message` for `node`, registering the node as a destination.
    pub fn load(&mut self, node: impl Into<NodeId>, message: Message) {
        let node = node.into();
        if !self.destinations.contains(&node) {
            self.destinations.push(node.clone());
        }
        self.messages.entry(node).or_default().push(message);
    }
}

impl Default for CloudWagon {
    fn default() -> Self {
        Self::new()
    }
}

/// Opaque encrypted payload. This layer never looks inside.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Encrypted {
    pub payload: Vec<u8>,
}
