//! CloudMesh node runtime
//!
//! This crate ties the transport, the object space and the layer
//! dispatcher together into a [`Cloud`]: one cluster member that answers
//! every message of the protocol and offers the client side of it.

pub mod cloud;
mod handler;
pub mod config;
pub mod keepalive;
pub mod locks;
pub mod peers;
pub mod services;

pub use cloud::Cloud;
pub use config::{KeepAliveConfig, NodeConfig};
pub use locks::{LockError, LockManager};
pub use services::{echo_service, FnService, LayerService, ServiceTable};
