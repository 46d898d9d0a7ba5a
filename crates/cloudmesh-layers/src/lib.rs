//! Layers: services published by nodes and invoked across the cluster.
//!
//! A [`LayerRegistry`] tracks which nodes offer which layer; the
//! [`RpcDispatcher`] picks one of them round-robin and correlates the reply.

pub mod config;
pub mod context;
pub mod dispatcher;
pub mod layer;
pub mod registry;

pub use config::DispatcherConfig;
pub use dispatcher::{MessageSink, RpcDispatcher};
pub use layer::DistributedLayer;
pub use registry::LayerRegistry;
