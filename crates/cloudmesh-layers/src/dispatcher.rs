//! Correlated request/reply over the cluster.
//!
//! Every outgoing request registers a oneshot under its message id. The
//! reply carries the same id and is routed back through
//! [`RpcDispatcher::complete`]. Entries leave the table on completion, on
//! timeout, or when the waiting future is dropped. A reply arriving after
//! that finds no entry and is dropped.

use cloudmesh_common::protocol::{
    CloudError, LayerInvoke, Message, MessageBody, MessageId, MethodInvoke, NodeId, Result, Value,
};
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::config::DispatcherConfig;
use crate::context;
use crate::registry::LayerRegistry;

/// Outbound seam of the dispatcher: deliver a message to a node.
pub trait MessageSink: Send + Sync {
    fn send_to(&self, node: &str, message: &Message) -> Result<()>;
}

pub struct RpcDispatcher {
    registry: Arc<LayerRegistry>,
    sink: Arc<dyn MessageSink>,
    pending: DashMap<MessageId, oneshot::Sender<Message>>,
    busy: DashSet<NodeId>,
    config: DispatcherConfig,
}

impl RpcDispatcher {
    pub fn new(registry: Arc<LayerRegistry>, sink: Arc<dyn MessageSink>) -> Self {
        Self::with_config(registry, sink, DispatcherConfig::default())
    }

    pub fn with_config(
        registry: Arc<LayerRegistry>,
        sink: Arc<dyn MessageSink>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            registry,
            sink,
            pending: DashMap::new(),
            busy: DashSet::new(),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<LayerRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Invoke `method` on the layer at `path`, on the next node in its
    /// rotation.
    pub async fn invoke_layer(
        &self,
        path: &str,
        method: &str,
        parameter_types: Vec<String>,
        arguments: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let node = self.pick_node(path)?;
        let session = context::current_session();

        let mut message = Message::new(MessageBody::LayerInvoke(LayerInvoke {
            path: path.to_string(),
            method: method.to_string(),
            parameter_types,
            caller_session: session.clone(),
            arguments,
        }));
        message.session_id = session;

        debug!(path, method, node = %node, id = %message.id, "Invoking layer");
        let reply = self.request(&node, message, timeout).await?;
        Self::method_result(reply)
    }

    /// Invoke `method` directly on `node`.
    pub async fn invoke_method(
        &self,
        node: &str,
        method: &str,
        parameter_types: Vec<String>,
        arguments: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let mut message = Message::new(MessageBody::MethodInvoke(MethodInvoke {
            method: method.to_string(),
            parameter_types,
            arguments,
        }));
        message.session_id = context::current_session();

        let reply = self.request(node, message, timeout).await?;
        Self::method_result(reply)
    }

    /// Send `message` to `node` and wait for the message answering it.
    pub async fn request(
        &self,
        node: &str,
        message: Message,
        timeout: Option<Duration>,
    ) -> Result<Message> {
        let sink = self.sink.clone();
        self.request_with(message, timeout, |m| sink.send_to(node, m))
            .await
    }

    /// Like [`request`](Self::request) with no deadline. Used for lock
    /// waits the coordinator bounds, or that may wait forever.
    pub async fn request_unbounded(&self, node: &str, message: Message) -> Result<Message> {
        let (rx, _guard) = self.register(message.id);
        self.sink.send_to(node, &message)?;
        rx.await.map_err(|_| CloudError::Disconnected)
    }

    /// Like [`request`](Self::request), sending through `send` instead of
    /// the sink. Used before the peer has identified itself.
    pub async fn request_with<S>(
        &self,
        message: Message,
        timeout: Option<Duration>,
        send: S,
    ) -> Result<Message>
    where
        S: FnOnce(&Message) -> Result<()>,
    {
        let timeout = timeout.unwrap_or(self.config.default_timeout);
        let id = message.id;

        let (rx, _guard) = self.register(id);
        send(&message)?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            // The sender was dropped without a reply.
            Ok(Err(_)) => Err(CloudError::Disconnected),
            Err(_) => {
                debug!(%id, kind = message.type_name(), "Request timed out");
                Err(CloudError::Timeout {
                    id,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Open a pending entry for `id`. The guard closes it however the wait
    /// ends, including when the waiting future is dropped.
    fn register(&self, id: MessageId) -> (oneshot::Receiver<Message>, PendingGuard<'_>) {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        let guard = PendingGuard {
            pending: &self.pending,
            id,
        };
        (rx, guard)
    }

    /// Hand a reply to the request waiting for it.
    ///
    /// Returns false when no request is waiting, e.g. because it already
    /// timed out.
    pub fn complete(&self, message: Message) -> bool {
        match self.pending.remove(&message.id) {
            Some((_, tx)) => tx.send(message).is_ok(),
            None => {
                debug!(id = %message.id, kind = message.type_name(), "Dropping reply with no pending request");
                false
            }
        }
    }

    pub fn is_pending(&self, id: &MessageId) -> bool {
        self.pending.contains_key(id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn mark_busy(&self, node: &str) {
        trace!(node, "Node busy");
        self.busy.insert(node.to_string());
    }

    pub fn clear_busy(&self, node: &str) {
        self.busy.remove(node);
    }

    pub fn is_busy(&self, node: &str) -> bool {
        self.busy.contains(node)
    }

    /// Next node for `path`, passing over busy nodes while an idle one is
    /// listed.
    fn pick_node(&self, path: &str) -> Result<NodeId> {
        let layer = self
            .registry
            .get(path)
            .ok_or_else(|| CloudError::LayerNotFound(path.to_string()))?;

        let first = layer
            .node_to_invoke()
            .ok_or_else(|| CloudError::LayerNotFound(path.to_string()))?;
        if !self.config.skip_busy_nodes || !self.is_busy(&first) {
            return Ok(first);
        }

        for _ in 1..layer.node_count() {
            match layer.node_to_invoke() {
                Some(node) if !self.is_busy(&node) => return Ok(node),
                Some(_) => continue,
                None => break,
            }
        }
        Ok(first)
    }

    fn method_result(reply: Message) -> Result<Value> {
        match reply.body {
            MessageBody::MethodResponse(response) => {
                response.into_result().map_err(CloudError::RemoteException)
            }
            other => Err(CloudError::InvalidRequest(format!(
                "Expected MethodResponse, got {}",
                other.type_name()
            ))),
        }
    }
}

struct PendingGuard<'a> {
    pending: &'a DashMap<MessageId, oneshot::Sender<Message>>,
    id: MessageId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}
