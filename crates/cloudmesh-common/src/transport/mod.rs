//! CloudMesh Transport Layer
//!
//! This module turns TCP byte streams into [`Message`](crate::protocol::Message)s
//! and back.
//!
//! # Wire Format
//!
//! ```text
//! [4-byte total length, i32 little-endian, prefix included] [document body]
//! ```
//!
//! Documents are BSON, whose own leading length is the prefix. The body
//! carries the reserved `_class` field naming the message variant, so any
//! reader can decode any message. [`JsonCodec`] frames JSON bodies the same
//! way.
//!
//! # Components
//!
//! - **[`Codec`]** / **[`BsonCodec`]** / **[`JsonCodec`]**: encode/decode single documents
//! - **[`MessageBuffer`]**: reassembles documents from fragmented reads
//! - **[`SessionBuffers`]**: one pending buffer per server session
//! - **[`MessageServer`]**: accepts sessions and dispatches decoded messages
//! - **[`MessageNode`]**: outbound connection to one peer
//! - **[`MessageHandler`]**: lifecycle and message callbacks
//!
//! # Message Size Limits
//!
//! Declared lengths above the configured maximum (100 MB by default) are a
//! protocol violation and close the connection.

pub mod buffer;
pub mod codec;
pub mod connection;
pub mod node;
pub mod server;
pub mod sessions;

pub use buffer::MessageBuffer;
pub use codec::{BsonCodec, Codec, JsonCodec, DEFAULT_MAX_MESSAGE_SIZE, LENGTH_PREFIX_SIZE};
pub use connection::{Connection, MessageHandler, SessionId};
pub use node::{ConnectState, MessageNode, DEFAULT_CONNECT_TIMEOUT};
pub use server::MessageServer;
pub use sessions::SessionBuffers;
