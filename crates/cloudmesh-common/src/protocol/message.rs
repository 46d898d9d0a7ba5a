//! CloudMesh message envelope.
//!
//! Every document exchanged between nodes is a [`Message`]: a fixed header
//! (correlation id, creation time, optional caller session) plus one
//! [`MessageBody`] variant. The variant is identified on the wire by the
//! reserved `_class` field, which carries the fully qualified type name of
//! the variant (for example `cloudmesh.protocol.PublishObject`). Decoding
//! dispatches on that tag, so a reader never needs to know up front which
//! variant it is about to receive.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

use super::payloads::*;

/// Correlation identifier of a message.
pub type MessageId = Uuid;

/// Identifier of a cluster node.
pub type NodeId = String;

/// Name of the reserved document field holding the variant type name.
pub const TYPE_FIELD: &str = "_class";

/// A single CloudMesh message.
///
/// `id` is assigned once when the message is built and is the only key used
/// to match a request with its reply. Replies reuse the id of the message
/// they answer (see [`Message::reply`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: MessageId,
    /// Milliseconds since the Unix epoch at construction.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(flatten)]
    pub body: MessageBody,
}

impl Message {
    /// Builds a message with a fresh id.
    pub fn new(body: MessageBody) -> Self {
        Message {
            id: Uuid::new_v4(),
            timestamp: now_millis(),
            session_id: None,
            body,
        }
    }

    /// Builds a reply that carries the id of the message it answers.
    pub fn reply(to: MessageId, body: MessageBody) -> Self {
        Message {
            id: to,
            timestamp: now_millis(),
            session_id: None,
            body,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Fully qualified type name written into the `_class` field.
    pub fn type_name(&self) -> &'static str {
        self.body.type_name()
    }

    /// Generic acknowledgement of `to`.
    pub fn ack(to: MessageId) -> Self {
        Message::reply(to, MessageBody::Ack)
    }
}

/// The closed catalog of CloudMesh message variants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "_class")]
pub enum MessageBody {
    #[serde(rename = "cloudmesh.protocol.Ack")]
    Ack,
    #[serde(rename = "cloudmesh.protocol.NodeIdentification")]
    NodeIdentification(NodeDescriptor),
    #[serde(rename = "cloudmesh.protocol.KeepAlive")]
    KeepAlive,
    #[serde(rename = "cloudmesh.protocol.Shutdown")]
    Shutdown,
    #[serde(rename = "cloudmesh.protocol.BusyNode")]
    BusyNode(NodeDescriptor),
    #[serde(rename = "cloudmesh.protocol.PublishPath")]
    PublishPath(PublishPath),
    #[serde(rename = "cloudmesh.protocol.PublishObject")]
    PublishObject(PublishObject),
    #[serde(rename = "cloudmesh.protocol.HidePath")]
    HidePath(PathRef),
    #[serde(rename = "cloudmesh.protocol.RemoveObject")]
    RemoveObject(PathRef),
    #[serde(rename = "cloudmesh.protocol.Get")]
    Get(PathRef),
    #[serde(rename = "cloudmesh.protocol.Response")]
    Response(GetResponse),
    #[serde(rename = "cloudmesh.protocol.Lock")]
    Lock(LockRequest),
    #[serde(rename = "cloudmesh.protocol.Unlock")]
    Unlock(LockRequest),
    #[serde(rename = "cloudmesh.protocol.Signal")]
    Signal(SignalRequest),
    #[serde(rename = "cloudmesh.protocol.SignalAll")]
    SignalAll(SignalRequest),
    #[serde(rename = "cloudmesh.protocol.PublishLayer")]
    PublishLayer(PublishLayer),
    #[serde(rename = "cloudmesh.protocol.LayerInvoke")]
    LayerInvoke(LayerInvoke),
    #[serde(rename = "cloudmesh.protocol.MethodInvoke")]
    MethodInvoke(MethodInvoke),
    #[serde(rename = "cloudmesh.protocol.MethodResponse")]
    MethodResponse(MethodResponse),
    #[serde(rename = "cloudmesh.protocol.Invoke")]
    Invoke(PathRef),
    #[serde(rename = "cloudmesh.protocol.ServiceDefinition")]
    ServiceDefinition(ServiceDefinition),
    #[serde(rename = "cloudmesh.protocol.ServiceDefinitionResponse")]
    ServiceDefinitionResponse(ServiceDefinition),
    #[serde(rename = "cloudmesh.protocol.CloudWagon")]
    CloudWagon(CloudWagon),
    #[serde(rename = "cloudmesh.protocol.Encrypted")]
    Encrypted(Encrypted),
}

impl MessageBody {
    pub fn type_name(&self) -> &'static str {
        match self {
            MessageBody::Ack => "cloudmesh.protocol.Ack",
            MessageBody::NodeIdentification(_) => "cloudmesh.protocol.NodeIdentification",
            MessageBody::KeepAlive => "cloudmesh.protocol.KeepAlive",
            MessageBody::Shutdown => "cloudmesh.protocol.Shutdown",
            MessageBody::BusyNode(_) => "cloudmesh.protocol.BusyNode",
            MessageBody::PublishPath(_) => "cloudmesh.protocol.PublishPath",
            MessageBody::PublishObject(_) => "cloudmesh.protocol.PublishObject",
            MessageBody::HidePath(_) => "cloudmesh.protocol.HidePath",
            MessageBody::RemoveObject(_) => "cloudmesh.protocol.RemoveObject",
            MessageBody::Get(_) => "cloudmesh.protocol.Get",
            MessageBody::Response(_) => "cloudmesh.protocol.Response",
            MessageBody::Lock(_) => "cloudmesh.protocol.Lock",
            MessageBody::Unlock(_) => "cloudmesh.protocol.Unlock",
            MessageBody::Signal(_) => "cloudmesh.protocol.Signal",
            MessageBody::SignalAll(_) => "cloudmesh.protocol.SignalAll",
            MessageBody::PublishLayer(_) => "cloudmesh.protocol.PublishLayer",
            MessageBody::LayerInvoke(_) => "cloudmesh.protocol.LayerInvoke",
            MessageBody::MethodInvoke(_) => "cloudmesh.protocol.MethodInvoke",
            MessageBody::MethodResponse(_) => "cloudmesh.protocol.MethodResponse",
            MessageBody::Invoke(_) => "cloudmesh.protocol.Invoke",
            MessageBody::ServiceDefinition(_) => "cloudmesh.protocol.ServiceDefinition",
            MessageBody::ServiceDefinitionResponse(_) => {
                "cloudmesh.protocol.ServiceDefinitionResponse"
            }
            MessageBody::CloudWagon(_) => "cloudmesh.protocol.CloudWagon",
            MessageBody::Encrypted(_) => "cloudmesh.protocol.Encrypted",
        }
    }

    /// Whether this variant answers an earlier request (and therefore
    /// completes a pending correlation entry rather than starting work).
    pub fn is_reply(&self) -> bool {
        matches!(
            self,
            MessageBody::Ack
                | MessageBody::Response(_)
                | MessageBody::MethodResponse(_)
                | MessageBody::ServiceDefinitionResponse(_)
        )
    }
}

impl From<MessageBody> for Message {
    fn from(body: MessageBody) -> Self {
        Message::new(body)
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
