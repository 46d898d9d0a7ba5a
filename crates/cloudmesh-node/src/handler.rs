//! Receiving side of the protocol: what a node does with each message.

use cloudmesh_common::protocol::{
    CloudError, CloudWagon, GetResponse, LayerInvoke, LockRequest, Message, MessageBody,
    MessageId, MethodResponse, NodeId, PathRef, RemoteFailure, ServiceDefinition, SignalRequest,
    Value,
};
use cloudmesh_common::transport::{Connection, MessageHandler};
use cloudmesh_layers::{context, MessageSink};
use cloudmesh_space::Resolution;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cloud::Cloud;
use crate::locks::{LockError, LockOutcome, LockTarget};
use crate::services::no_such_service;

/// Where a message came from, and so where its reply goes.
#[derive(Debug, Clone)]
pub(crate) enum Origin {
    /// Sent by this node to itself through the dispatcher.
    Local,
    Peer(Connection),
    /// Loaded into a wagon by this node and relayed by others. Replies go
    /// back to it directly.
    Relayed(NodeId),
}

/// Transport callbacks of a [`Cloud`]. Holds it weakly so open
/// connections do not keep a stopped node alive.
pub(crate) struct CloudHandler {
    cloud: Weak<Cloud>,
}

impl CloudHandler {
    pub(crate) fn new(cloud: Weak<Cloud>) -> Self {
        Self { cloud }
    }
}

impl MessageHandler for CloudHandler {
    fn on_message(&self, connection: &Connection, message: Message) {
        if let Some(cloud) = self.cloud.upgrade() {
            cloud.dispatch(Origin::Peer(connection.clone()), message);
        }
    }

    fn on_connect(&self, connection: &Connection) {
        debug!(session = connection.session(), peer = %connection.peer_addr(), "Session opened");
    }

    fn on_connect_fail(&self, addr: &str, error: &CloudError) {
        warn!(addr, "Could not reach peer: {}", error);
    }

    fn on_disconnect(&self, connection: &Connection) {
        let Some(cloud) = self.cloud.upgrade() else {
            return;
        };
        if let Some(node) = cloud.peers.unbind_session(connection.session()) {
            cloud.forget_peer(&node);
        }
    }
}

impl Cloud {
    /// Handle one message. Never blocks: anything that waits runs on a
    /// spawned task.
    pub(crate) fn dispatch(self: &Arc<Self>, origin: Origin, message: Message) {
        let Message {
            id,
            timestamp,
            session_id: session,
            body,
        } = message;

        match body {
            reply @ (MessageBody::Ack | MessageBody::Response(_) | MessageBody::MethodResponse(_)) => {
                self.dispatcher.complete(Message {
                    id,
                    timestamp,
                    session_id: session,
                    body: reply,
                });
            }

            MessageBody::NodeIdentification(peer) => {
                let Origin::Peer(connection) = &origin else {
                    return;
                };
                let fresh = self.peers.bind(peer.clone(), connection.clone());
                self.dispatcher.clear_busy(&peer.id);
                if fresh {
                    info!(peer = %peer.id, name = %peer.name, session = connection.session(), "Peer identified");
                }

                if self.dispatcher.is_pending(&id) {
                    self.dispatcher
                        .complete(Message::reply(id, MessageBody::NodeIdentification(peer)));
                } else if fresh {
                    let hello = MessageBody::NodeIdentification(self.descriptor.clone());
                    self.reply(&origin, Message::reply(id, hello));
                }
            }

            MessageBody::KeepAlive => self.reply(&origin, Message::ack(id)),

            MessageBody::Shutdown => {
                if let Some(node) = self.sender(&origin) {
                    if node != self.node_id() {
                        self.drop_peer(&node);
                    }
                }
            }

            MessageBody::BusyNode(peer) => self.dispatcher.mark_busy(&peer.id),

            MessageBody::PublishPath(publish) => {
                let Some(owner) = self.identified_sender(&origin, "PublishPath") else {
                    return;
                };
                if let Err(e) = self.space().apply_publish_path(&owner, &publish.path) {
                    warn!(owner = %owner, path = ?publish.path, "Ignoring PublishPath: {}", e);
                }
            }

            MessageBody::PublishObject(publish) => {
                let stored = self.space().apply_publish(&publish);
                debug!(stored, "Applied PublishObject");
            }

            MessageBody::HidePath(hide) => {
                if let Some(owner) = self.identified_sender(&origin, "HidePath") {
                    self.space().hide(&owner, &hide.path);
                }
            }

            MessageBody::RemoveObject(remove) => {
                self.space().remove(&remove.path);
            }

            MessageBody::Get(get) => self.answer_get(origin, id, get),

            MessageBody::Lock(request) => self.handle_lock(origin, id, request),

            MessageBody::Unlock(request) => self.handle_unlock(origin, id, request),

            MessageBody::Signal(request) => self.handle_signal(origin, id, request, false),

            MessageBody::SignalAll(request) => self.handle_signal(origin, id, request, true),

            MessageBody::PublishLayer(publish) => {
                self.registry().publish_message(&publish);
            }

            MessageBody::LayerInvoke(LayerInvoke {
                path,
                method,
                parameter_types,
                caller_session,
                arguments,
            }) => {
                let service = self.services.layer(&path);
                let caller = caller_session.or(session);
                let cloud = self.clone();
                tokio::spawn(async move {
                    let result = match service {
                        Some(service) => {
                            let call = service.invoke(&method, &parameter_types, arguments);
                            context::maybe_with_session(caller, call).await
                        }
                        None => Err(no_such_service(&path)),
                    };
                    cloud.reply(&origin, Message::reply(id, method_response(result)));
                });
            }

            MessageBody::MethodInvoke(invoke) => {
                let service = self.services.method(&invoke.method);
                let cloud = self.clone();
                tokio::spawn(async move {
                    let result = match service {
                        Some(service) => {
                            let call = service.invoke(&invoke.method, &invoke.parameter_types, invoke.arguments);
                            context::maybe_with_session(session, call).await
                        }
                        None => Err(no_such_service(&invoke.method)),
                    };
                    cloud.reply(&origin, Message::reply(id, method_response(result)));
                });
            }

            MessageBody::Invoke(invoke) => {
                let reply = match self.services.trigger(&invoke.path) {
                    Some(trigger) => {
                        trigger();
                        MessageBody::Ack
                    }
                    None => MessageBody::Response(GetResponse::not_found()),
                };
                self.reply(&origin, Message::reply(id, reply));
            }

            MessageBody::ServiceDefinition(definition) => {
                self.apply_definition(&origin, definition);
                let ours = MessageBody::ServiceDefinitionResponse(self.service_definition());
                self.reply(&origin, Message::reply(id, ours));
            }

            MessageBody::ServiceDefinitionResponse(definition) => {
                let summary = ServiceDefinition {
                    messages: Vec::new(),
                    ..definition.clone()
                };
                self.apply_definition(&origin, definition);
                self.dispatcher
                    .complete(Message::reply(id, MessageBody::ServiceDefinitionResponse(summary)));
            }

            MessageBody::CloudWagon(wagon) => self.unload_wagon(&origin, wagon),

            MessageBody::Encrypted(encrypted) => {
                warn!(
                    bytes = encrypted.payload.len(),
                    "Dropping encrypted message: no key material on this node"
                );
            }
        }
    }

    fn reply(&self, origin: &Origin, message: Message) {
        match origin {
            Origin::Local => {
                self.dispatcher.complete(message);
            }
            Origin::Peer(connection) => {
                if let Err(e) = connection.send(&message) {
                    debug!(session = connection.session(), "Could not send reply: {}", e);
                }
            }
            Origin::Relayed(node) => self.deliver(node, message),
        }
    }

    fn sender(&self, origin: &Origin) -> Option<NodeId> {
        match origin {
            Origin::Local => Some(self.node_id().to_string()),
            Origin::Peer(connection) => self.peers.node_of(connection.session()),
            Origin::Relayed(node) => Some(node.clone()),
        }
    }

    fn identified_sender(&self, origin: &Origin, kind: &str) -> Option<NodeId> {
        let sender = self.sender(origin);
        if sender.is_none() {
            warn!(kind, "Dropping message from an unidentified session");
        }
        sender
    }

    fn answer_get(self: &Arc<Self>, origin: Origin, id: MessageId, get: PathRef) {
        let resolution = self.space().resolve(&get.path);
        match resolution {
            Resolution::Local(value) => {
                self.reply(&origin, Message::reply(id, MessageBody::Response(GetResponse::found(value))));
            }
            Resolution::Remote(owners) => {
                let requester = self.sender(&origin);
                let cloud = self.clone();
                tokio::spawn(async move {
                    let response = match cloud.fetch(&get.path, &owners.nodes, requester.as_deref()).await {
                        Ok(Some(value)) => GetResponse::found(value),
                        Ok(None) => GetResponse::not_found(),
                        Err(e) => {
                            debug!(path = ?get.path, "Forwarded Get failed: {}", e);
                            GetResponse::not_found()
                        }
                    };
                    cloud.reply(&origin, Message::reply(id, MessageBody::Response(response)));
                });
            }
            Resolution::Branch | Resolution::NotFound => {
                self.reply(&origin, Message::reply(id, MessageBody::Response(GetResponse::not_found())));
            }
        }
    }

    fn handle_lock(self: &Arc<Self>, origin: Origin, id: MessageId, request: LockRequest) {
        let Some(node) = self.identified_sender(&origin, "Lock") else {
            self.reply(&origin, lock_failure(id, RemoteFailure::new("UnknownNode", "Identify before locking")));
            return;
        };

        let outcome = match LockTarget::parse(&request.path) {
            Ok(LockTarget::Lock(lock)) => {
                let outcome = self.lock_table().lock(&lock, &node, id);
                Ok((lock, outcome == LockOutcome::Queued, None))
            }
            Ok(LockTarget::Condition { lock, condition }) => self
                .lock_table()
                .await_condition(&lock, &condition, &node, id)
                .map(|grant| (lock, true, grant)),
            Err(e) => Err(e),
        };

        match outcome {
            Ok((lock, waiting, grant)) => {
                if let Some(grant) = grant {
                    self.grant(grant);
                }
                if !waiting {
                    self.reply(&origin, Message::ack(id));
                } else if request.timeout_nanos > 0 {
                    self.expire_later(origin, id, lock, Duration::from_nanos(request.timeout_nanos));
                }
            }
            Err(e) => self.reply(&origin, lock_failure(id, e.into())),
        }
    }

    /// Answer a waiting lock request with `LockTimeout` once `after`
    /// elapses, unless it was granted first.
    fn expire_later(self: &Arc<Self>, origin: Origin, id: MessageId, lock: String, after: Duration) {
        let cloud = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if cloud.lock_table().expire(&lock, id) {
                debug!(lock = %lock, %id, "Lock wait timed out");
                let failure = RemoteFailure::new("LockTimeout", format!("Timed out waiting for {}", lock));
                cloud.reply(&origin, lock_failure(id, failure));
            }
        });
    }

    fn handle_unlock(&self, origin: Origin, id: MessageId, request: LockRequest) {
        let Some(node) = self.identified_sender(&origin, "Unlock") else {
            self.reply(&origin, lock_failure(id, RemoteFailure::new("UnknownNode", "Identify before unlocking")));
            return;
        };

        let result = match LockTarget::parse(&request.path) {
            Ok(LockTarget::Lock(lock)) => self.lock_table().unlock(&lock, &node),
            Ok(LockTarget::Condition { .. }) => Err(LockError::InvalidPath(request.path)),
            Err(e) => Err(e),
        };

        match result {
            Ok(grant) => {
                self.reply(&origin, Message::ack(id));
                if let Some(grant) = grant {
                    self.grant(grant);
                }
            }
            Err(e) => self.reply(&origin, lock_failure(id, e.into())),
        }
    }

    fn handle_signal(&self, origin: Origin, id: MessageId, request: SignalRequest, all: bool) {
        let grant = {
            let mut locks = self.lock_table();
            if all {
                locks.signal_all(&request.lock_name, &request.condition_name)
            } else {
                locks.signal(&request.lock_name, &request.condition_name)
            }
        };
        self.reply(&origin, Message::ack(id));
        if let Some(grant) = grant {
            self.grant(grant);
        }
    }

    /// Apply the state a peer embedded in its service definition.
    fn apply_definition(self: &Arc<Self>, origin: &Origin, definition: ServiceDefinition) {
        debug!(
            service = %definition.service_name,
            messages = definition.messages.len(),
            "Applying service definition"
        );
        for embedded in definition.messages {
            self.dispatch(origin.clone(), embedded);
        }
    }

    /// Handle our share of `wagon` and pass the rest on, one wagon per
    /// destination. Every hop attributes the messages to the node that
    /// loaded the wagon.
    fn unload_wagon(self: &Arc<Self>, origin: &Origin, wagon: CloudWagon) {
        let sender = self.sender(origin);
        let source = wagon.source.or_else(|| sender.clone());
        let local_origin = match &source {
            Some(node) if sender.as_ref() != Some(node) => Origin::Relayed(node.clone()),
            _ => origin.clone(),
        };

        for (node, messages) in wagon.messages {
            if node == self.node_id() {
                for message in messages {
                    self.dispatch(local_origin.clone(), message);
                }
                continue;
            }

            let mut onward = CloudWagon::new();
            onward.source = source.clone();
            for message in messages {
                onward.load(node.clone(), message);
            }
            let forward = Message::new(MessageBody::CloudWagon(onward));
            if let Err(e) = self.peers.send_to(&node, &forward) {
                warn!(node = %node, "Could not forward wagon: {}", e);
            }
        }
    }
}

fn method_response(result: Result<Value, RemoteFailure>) -> MessageBody {
    match result {
        Ok(value) => MessageBody::MethodResponse(MethodResponse::success(value)),
        Err(failure) => MessageBody::MethodResponse(MethodResponse::failure(failure)),
    }
}

fn lock_failure(id: MessageId, failure: RemoteFailure) -> Message {
    Message::reply(id, MessageBody::MethodResponse(MethodResponse::failure(failure)))
}
