//! CloudMesh Common Types and Transport
//!
//! This crate provides the message catalog and the TCP transport shared by
//! every CloudMesh component.
//!
//! # Overview
//!
//! CloudMesh lets independent processes ("nodes") form a loosely coupled
//! cluster sharing a path-addressed object namespace, distributed locks and
//! remotely invokable services ("layers"). Everything they exchange is a
//! [`Message`]:
//!
//! - **Protocol Layer**: the message envelope, the closed catalog of
//!   variants and the error taxonomy
//! - **Transport Layer**: length-prefixed framing, the server and node roles
//!
//! # Example
//!
//! ```
//! use cloudmesh_common::{Message, MessageBody, PathRef, GetResponse};
//! use serde_json::json;
//!
//! let get = Message::new(MessageBody::Get(PathRef::new(["config", "threads"])));
//! let reply = Message::reply(get.id, MessageBody::Response(GetResponse::found(json!(8))));
//! assert_eq!(get.id, reply.id);
//! ```

pub mod protocol;
pub mod transport;

pub use protocol::*;
