use thiserror::Error;

use super::message::MessageId;
use super::payloads::RemoteFailure;

#[derive(Error, Debug)]
pub enum CloudError {
    /// Malformed or oversized frame. Fatal for the connection that produced it.
    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Document codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("BSON encode error: {0}")]
    BsonEncode(#[from] bson::ser::Error),

    #[error("BSON decode error: {0}")]
    BsonDecode(#[from] bson::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request {id} timed out after {timeout_ms}ms")]
    Timeout { id: MessageId, timeout_ms: u64 },

    #[error("Remote exception: {0}")]
    RemoteException(RemoteFailure),

    #[error("Layer not found: {0}")]
    LayerNotFound(String),

    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Peer disconnected")]
    Disconnected,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl CloudError {
    /// True when the failure was reported by the remote side rather than
    /// detected locally.
    pub fn is_remote(&self) -> bool {
        matches!(self, CloudError::RemoteException(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CloudError::Timeout { .. })
    }
}

impl From<std::net::AddrParseError> for CloudError {
    fn from(err: std::net::AddrParseError) -> Self {
        CloudError::InvalidRequest(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
