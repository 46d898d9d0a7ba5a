use cloudmesh_common::protocol::{
    CloudError, CloudWagon, LockRequest, Message, MessageBody, NodeDescriptor, NodeId, PathRef,
    PublishPath, Result, ServiceDefinition, SignalRequest, Value,
};
use cloudmesh_common::transport::{MessageHandler, MessageNode, MessageServer};
use cloudmesh_layers::registry::publication;
use cloudmesh_layers::{LayerRegistry, MessageSink, RpcDispatcher};
use cloudmesh_space::{ObjectSpace, Resolution};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::NodeConfig;
use crate::handler::{CloudHandler, Origin};
use crate::keepalive::KeepAlive;
use crate::locks::{Grant, LockManager};
use crate::peers::PeerTable;
use crate::services::{LayerService, ServiceTable, Trigger};

/// One member of the cluster.
///
/// A `Cloud` listens for peers, dials the peers it was configured with and
/// keeps the shared namespace, layer registry and lock table in step with
/// them. All methods are safe to call from any task.
///
/// # Example
///
/// ```no_run
/// use cloudmesh_node::{Cloud, NodeConfig};
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let cloud = Cloud::start(NodeConfig::new("alpha", "127.0.0.1:7400")).await?;
/// cloud.publish(vec!["config".into(), "threads".into()], json!(8), vec![])?;
/// # Ok(())
/// # }
/// ```
pub struct Cloud {
    pub(crate) descriptor: NodeDescriptor,
    pub(crate) config: NodeConfig,
    pub(crate) space: Mutex<ObjectSpace>,
    pub(crate) dispatcher: RpcDispatcher,
    pub(crate) locks: Mutex<LockManager>,
    pub(crate) services: ServiceTable,
    pub(crate) peers: Arc<PeerTable>,
    server: Arc<MessageServer>,
    local_addr: SocketAddr,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    me: Weak<Cloud>,
}

/// Routes dispatcher traffic: to peers over the network, to this node
/// in-process.
struct Router {
    local: NodeId,
    peers: Arc<PeerTable>,
    cloud: Weak<Cloud>,
}

impl MessageSink for Router {
    fn send_to(&self, node: &str, message: &Message) -> Result<()> {
        if node == self.local {
            let cloud = self.cloud.upgrade().ok_or(CloudError::Disconnected)?;
            cloud.dispatch(Origin::Local, message.clone());
            return Ok(());
        }
        self.peers.send_to(node, message)
    }
}

impl Cloud {
    /// Bind the message server, start background tasks and join the
    /// configured peers. A peer that cannot be reached is logged and
    /// skipped.
    pub async fn start(config: NodeConfig) -> Result<Arc<Self>> {
        let server =
            MessageServer::bind_with_limit(&config.bind_addr, config.max_message_size).await?;
        let local_addr = server.local_addr()?;

        let node_id = config
            .node_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let descriptor =
            NodeDescriptor::new(node_id.clone(), config.name.clone()).with_address(local_addr.to_string());

        let peers = Arc::new(PeerTable::new());
        let registry = Arc::new(LayerRegistry::new());

        let cloud = Arc::new_cyclic(|me: &Weak<Cloud>| {
            let router = Arc::new(Router {
                local: node_id.clone(),
                peers: peers.clone(),
                cloud: me.clone(),
            });
            Cloud {
                dispatcher: RpcDispatcher::with_config(registry, router, config.dispatcher.clone()),
                space: Mutex::new(ObjectSpace::new(node_id.clone())),
                locks: Mutex::new(LockManager::new()),
                services: ServiceTable::new(),
                peers,
                server: Arc::new(server),
                local_addr,
                tasks: Mutex::new(Vec::new()),
                me: me.clone(),
                descriptor,
                config,
            }
        });

        cloud.track(cloud.server.clone().spawn(cloud.handler()));
        if cloud.config.keep_alive.is_enabled() {
            let keep_alive = KeepAlive::new(Arc::downgrade(&cloud), cloud.config.keep_alive.clone());
            cloud.track(keep_alive.spawn());
        }

        info!(node = %cloud.node_id(), addr = %local_addr, "Node started");

        for addr in cloud.config.peers.clone() {
            if let Err(e) = cloud.connect(&addr).await {
                warn!(addr = %addr, "Could not join peer: {}", e);
            }
        }

        Ok(cloud)
    }

    pub fn node_id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn descriptor(&self) -> &NodeDescriptor {
        &self.descriptor
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<LayerRegistry> {
        self.dispatcher.registry()
    }

    pub fn dispatcher(&self) -> &RpcDispatcher {
        &self.dispatcher
    }

    /// Identified peers.
    pub fn peers(&self) -> Vec<NodeDescriptor> {
        self.peers.descriptors()
    }

    /// Open sessions on the message server, identified or not.
    pub fn inbound_sessions(&self) -> usize {
        self.server.session_count()
    }

    /// Dial `addr`, exchange identities and state. Returns the peer's id.
    pub async fn connect(&self, addr: &str) -> Result<NodeId> {
        let link = Arc::new(MessageNode::connect_with(
            addr,
            self.handler(),
            self.config.connect_timeout,
            self.config.max_message_size,
        ));
        let connection = link.wait_for_connect().await?;

        let hello = Message::new(MessageBody::NodeIdentification(self.descriptor.clone()));
        let reply = self
            .dispatcher
            .request_with(hello, Some(self.config.handshake_timeout), |m| connection.send(m))
            .await?;
        let peer = match reply.body {
            MessageBody::NodeIdentification(peer) => peer,
            other => {
                connection.close();
                return Err(CloudError::Protocol(format!(
                    "Expected NodeIdentification, got {}",
                    other.type_name()
                )));
            }
        };
        self.peers.remember_dialed(addr, link);

        let definition = Message::new(MessageBody::ServiceDefinition(self.service_definition()));
        self.dispatcher
            .request(&peer.id, definition, Some(self.config.handshake_timeout))
            .await?;

        info!(peer = %peer.id, name = %peer.name, addr, "Joined peer");
        Ok(peer.id)
    }

    // ---- namespace ----

    /// Store `value` at `path` as owned by this node and announce it.
    ///
    /// Every peer learns the path; the value itself travels only to
    /// `destinations`.
    pub fn publish(&self, path: Vec<String>, value: Value, destinations: Vec<NodeId>) -> Result<()> {
        let publication = self.space().publish_local(path, value, destinations)?;

        self.peers
            .broadcast(&Message::new(MessageBody::PublishPath(publication.path)));
        if !publication.object.destinations.is_empty() {
            let message = Message::new(MessageBody::PublishObject(publication.object.clone()));
            for node in &publication.object.destinations {
                if let Err(e) = self.peers.send_to(node, &message) {
                    warn!(node = %node, "Could not push published value: {}", e);
                }
            }
        }
        Ok(())
    }

    /// Stop owning `path` and tell the peers. Returns false if this node
    /// held no value there.
    pub fn retract(&self, path: &[String]) -> bool {
        let Some(path) = self.space().retract_local(path) else {
            return false;
        };
        self.peers.broadcast(&Message::new(MessageBody::HidePath(path)));
        true
    }

    /// Delete `path` here and on every peer.
    pub fn remove(&self, path: &[String]) -> bool {
        let removed = self.space().remove(path);
        self.peers
            .broadcast(&Message::new(MessageBody::RemoveObject(PathRef { path: path.to_vec() })));
        removed
    }

    /// What this node knows about `path`, without asking anyone.
    pub fn resolve(&self, path: &[String]) -> Resolution {
        self.space().resolve(path)
    }

    pub fn local_paths(&self) -> Vec<Vec<String>> {
        self.space().local_paths()
    }

    /// Value at `path`, fetched from an owner when held remotely.
    pub async fn get(&self, path: &[String]) -> Result<Option<Value>> {
        let resolution = self.space().resolve(path);
        match resolution {
            Resolution::Local(value) => Ok(Some(value)),
            Resolution::Remote(owners) => self.fetch(path, &owners.nodes, None).await,
            Resolution::Branch | Resolution::NotFound => Ok(None),
        }
    }

    /// Ask `node` for `path`. It answers from its own view, forwarding to
    /// an owner if it only knows who holds the value.
    pub async fn get_from(&self, node: &str, path: &[String]) -> Result<Option<Value>> {
        self.fetch(path, &[node.to_string()], None).await
    }

    /// Ask `owners` in turn for `path`, skipping `requester`. Errors only
    /// when no owner answered at all.
    pub(crate) async fn fetch(
        &self,
        path: &[String],
        owners: &[NodeId],
        requester: Option<&str>,
    ) -> Result<Option<Value>> {
        let mut last_error = None;
        let mut answered = false;

        for owner in owners {
            if owner == self.node_id() || Some(owner.as_str()) == requester {
                continue;
            }
            let get = Message::new(MessageBody::Get(PathRef { path: path.to_vec() }));
            match self.dispatcher.request(owner, get, None).await {
                Ok(Message {
                    body: MessageBody::Response(response),
                    ..
                }) => {
                    if !response.not_found {
                        return Ok(response.value);
                    }
                    answered = true;
                }
                Ok(other) => {
                    debug!(owner = %owner, kind = other.type_name(), "Unexpected reply to Get");
                }
                Err(e) => {
                    debug!(owner = %owner, "Get failed: {}", e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if !answered => Err(e),
            _ => Ok(None),
        }
    }

    // ---- layers ----

    /// Serve `service` as the layer at `path` and announce it.
    pub fn register_layer(&self, path: &str, service: Arc<dyn LayerService>) {
        self.services.add_layer(path, service);
        self.registry().publish(path, self.node_id());
        let announce = publication(path, &self.descriptor.id, self.node_id());
        self.peers
            .broadcast(&Message::new(MessageBody::PublishLayer(announce)));
    }

    /// Serve `service` for `MethodInvoke` calls naming `method`.
    pub fn register_method(&self, method: &str, service: Arc<dyn LayerService>) {
        self.services.add_method(method, service);
    }

    /// Run `trigger` when an `Invoke` for `path` arrives.
    pub fn register_trigger(&self, path: Vec<String>, trigger: Trigger) {
        self.services.add_trigger(path, trigger);
    }

    pub async fn invoke_layer(
        &self,
        path: &str,
        method: &str,
        parameter_types: Vec<String>,
        arguments: Vec<Value>,
    ) -> Result<Value> {
        self.dispatcher
            .invoke_layer(path, method, parameter_types, arguments, None)
            .await
    }

    pub async fn invoke_method(
        &self,
        node: &str,
        method: &str,
        parameter_types: Vec<String>,
        arguments: Vec<Value>,
    ) -> Result<Value> {
        self.dispatcher
            .invoke_method(node, method, parameter_types, arguments, None)
            .await
    }

    /// Fire the trigger at `path` on `node`. Returns false if `node` has
    /// none there.
    pub async fn trigger(&self, node: &str, path: Vec<String>) -> Result<bool> {
        let invoke = Message::new(MessageBody::Invoke(PathRef { path }));
        let reply = self.dispatcher.request(node, invoke, None).await?;
        match reply.body {
            MessageBody::Ack => Ok(true),
            MessageBody::Response(response) if response.not_found => Ok(false),
            other => Err(unexpected_reply(&other)),
        }
    }

    // ---- locks ----

    /// Acquire `lock` on the node coordinating it. `timeout` bounds the
    /// wait in the coordinator's queue.
    /// Acquire `lock` on `coordinator`. A zero `timeout` waits until the
    /// lock is granted.
    pub async fn lock(&self, coordinator: &str, lock: &str, timeout: Duration) -> Result<()> {
        let request = LockRequest {
            path: vec![lock.to_string()],
            timeout_nanos: timeout.as_nanos() as u64,
        };
        self.lock_wait(coordinator, lock, request, timeout).await
    }

    pub async fn unlock(&self, coordinator: &str, lock: &str) -> Result<()> {
        let request = LockRequest {
            path: vec![lock.to_string()],
            timeout_nanos: 0,
        };
        self.lock_request(coordinator, MessageBody::Unlock(request), Duration::ZERO)
            .await
    }

    /// Release `lock` and wait for `condition` to be signalled, then
    /// reacquire it.
    pub async fn await_condition(
        &self,
        coordinator: &str,
        lock: &str,
        condition: &str,
        timeout: Duration,
    ) -> Result<()> {
        let request = LockRequest {
            path: vec![lock.to_string(), condition.to_string()],
            timeout_nanos: timeout.as_nanos() as u64,
        };
        self.lock_wait(coordinator, lock, request, timeout).await
    }

    pub async fn signal(&self, coordinator: &str, lock: &str, condition: &str) -> Result<()> {
        let body = MessageBody::Signal(SignalRequest {
            lock_name: lock.to_string(),
            condition_name: condition.to_string(),
        });
        self.lock_request(coordinator, body, Duration::ZERO).await
    }

    pub async fn signal_all(&self, coordinator: &str, lock: &str, condition: &str) -> Result<()> {
        let body = MessageBody::SignalAll(SignalRequest {
            lock_name: lock.to_string(),
            condition_name: condition.to_string(),
        });
        self.lock_request(coordinator, body, Duration::ZERO).await
    }

    /// Send a `Lock` the coordinator may queue. If the reply does not make
    /// it back in time, the wait is withdrawn so a late grant does not
    /// leave the lock held.
    async fn lock_wait(
        &self,
        coordinator: &str,
        lock: &str,
        request: LockRequest,
        wait: Duration,
    ) -> Result<()> {
        let message = Message::new(MessageBody::Lock(request));
        let reply = if wait.is_zero() {
            self.dispatcher.request_unbounded(coordinator, message).await
        } else {
            // The coordinator answers a timed-out wait itself; leave room
            // for that answer to arrive.
            let timeout = wait + self.config.handshake_timeout;
            self.dispatcher.request(coordinator, message, Some(timeout)).await
        };

        match reply {
            Ok(reply) => lock_result(reply),
            Err(e) if e.is_timeout() => {
                if let Err(release) = self.unlock(coordinator, lock).await {
                    debug!(lock, coordinator, "Could not withdraw timed-out wait: {}", release);
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn lock_request(&self, coordinator: &str, body: MessageBody, wait: Duration) -> Result<()> {
        let timeout = wait + self.config.handshake_timeout;
        let reply = self
            .dispatcher
            .request(coordinator, Message::new(body), Some(timeout))
            .await?;
        lock_result(reply)
    }

    // ---- membership ----

    /// Tell peers whether this node takes more work.
    pub fn set_busy(&self, busy: bool) {
        let body = if busy {
            MessageBody::BusyNode(self.descriptor.clone())
        } else {
            MessageBody::NodeIdentification(self.descriptor.clone())
        };
        self.peers.broadcast(&Message::new(body));
    }

    /// Hand `wagon` to `via`, which delivers or forwards each batch.
    pub fn send_wagon(&self, via: &str, mut wagon: CloudWagon) -> Result<()> {
        wagon.source.get_or_insert_with(|| self.node_id().to_string());
        self.peers
            .send_to(via, &Message::new(MessageBody::CloudWagon(wagon)))
    }

    /// Announce departure, close every link and stop background tasks.
    pub fn shutdown(&self) {
        let sent = self.peers.broadcast(&Message::new(MessageBody::Shutdown));
        info!(node = %self.node_id(), peers = sent, "Node shutting down");
        self.peers.close_all();
        for task in self.tasks().drain(..) {
            task.abort();
        }
    }

    /// Drop `node` and everything it contributed.
    pub(crate) fn drop_peer(&self, node: &str) {
        self.peers.remove(node);
        self.forget_peer(node);
    }

    pub(crate) fn forget_peer(&self, node: &str) {
        let leaves = self.space().forget_node(node);
        let layers = self.registry().forget_node(node);
        let grants = self.lock_table().forget_node(node);
        self.dispatcher.clear_busy(node);
        for grant in grants {
            self.grant(grant);
        }
        info!(node, leaves, layers = layers.len(), "Peer left");
    }

    /// Reply `Ack` to a lock request granted by the lock manager.
    pub(crate) fn grant(&self, grant: Grant) {
        self.deliver(&grant.node, Message::ack(grant.request));
    }

    /// Send a reply to `node`, completing it in-process when `node` is us.
    pub(crate) fn deliver(&self, node: &str, message: Message) {
        if node == self.node_id() {
            self.dispatcher.complete(message);
        } else if let Err(e) = self.peers.send_to(node, &message) {
            warn!(node, kind = message.type_name(), "Could not deliver reply: {}", e);
        }
    }

    /// This node's state as embedded messages: its layers, then its paths.
    pub(crate) fn service_definition(&self) -> ServiceDefinition {
        let mut messages: Vec<Message> = self
            .services
            .layer_paths()
            .iter()
            .map(|path| {
                let announce = publication(path, &self.descriptor.id, self.node_id());
                Message::new(MessageBody::PublishLayer(announce))
            })
            .collect();
        messages.extend(
            self.local_paths()
                .into_iter()
                .map(|path| Message::new(MessageBody::PublishPath(PublishPath { path }))),
        );

        ServiceDefinition {
            service_id: self.descriptor.id.clone(),
            service_name: self.descriptor.name.clone(),
            broadcasting: true,
            event_listener: true,
            messages,
        }
    }

    pub(crate) fn handler(&self) -> Arc<dyn MessageHandler> {
        Arc::new(CloudHandler::new(self.me.clone()))
    }

    pub(crate) fn space(&self) -> MutexGuard<'_, ObjectSpace> {
        self.space.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn lock_table(&self) -> MutexGuard<'_, LockManager> {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn track(&self, task: JoinHandle<()>) {
        self.tasks().push(task);
    }
}

/// `Ack` grants, a failed `MethodResponse` refuses.
fn lock_result(reply: Message) -> Result<()> {
    match reply.body {
        MessageBody::Ack => Ok(()),
        MessageBody::MethodResponse(response) => response
            .into_result()
            .map(|_| ())
            .map_err(CloudError::RemoteException),
        other => Err(unexpected_reply(&other)),
    }
}

fn unexpected_reply(body: &MessageBody) -> CloudError {
    CloudError::Protocol(format!("Unexpected reply: {}", body.type_name()))
}
