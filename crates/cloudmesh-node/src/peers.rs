use cloudmesh_common::protocol::{CloudError, Message, NodeDescriptor, NodeId, Result};
use cloudmesh_common::transport::{Connection, MessageNode, SessionId};
use cloudmesh_layers::MessageSink;
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Peer {
    pub descriptor: NodeDescriptor,
    pub connection: Connection,
}

/// Identified peers and the sessions that carry them.
///
/// A node is reachable through one session at a time. When two nodes dial
/// each other the later identification wins; the older session stays open
/// but no longer speaks for the node.
#[derive(Default)]
pub struct PeerTable {
    nodes: DashMap<NodeId, Peer>,
    sessions: DashMap<SessionId, NodeId>,
    /// Outbound links we dialed, by address.
    dialed: DashMap<String, Arc<MessageNode>>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `connection` to the node it identified as. Returns true if the
    /// session was not bound before.
    pub fn bind(&self, descriptor: NodeDescriptor, connection: Connection) -> bool {
        let session = connection.session();
        let fresh = self
            .sessions
            .insert(session, descriptor.id.clone())
            .is_none();
        self.nodes.insert(
            descriptor.id.clone(),
            Peer {
                descriptor,
                connection,
            },
        );
        fresh
    }

    pub fn node_of(&self, session: SessionId) -> Option<NodeId> {
        self.sessions.get(&session).map(|n| n.clone())
    }

    /// Forget `session`. Returns the node it spoke for when it was that
    /// node's current session, i.e. when the node is now unreachable.
    pub fn unbind_session(&self, session: SessionId) -> Option<NodeId> {
        let (_, node) = self.sessions.remove(&session)?;
        self.nodes
            .remove_if(&node, |_, peer| peer.connection.session() == session)
            .map(|(node, _)| node)
    }

    /// Drop `node` and close its session.
    pub fn remove(&self, node: &str) -> Option<Peer> {
        let (_, peer) = self.nodes.remove(node)?;
        self.sessions.remove(&peer.connection.session());
        peer.connection.close();
        Some(peer)
    }

    pub fn connection(&self, node: &str) -> Option<Connection> {
        self.nodes.get(node).map(|p| p.connection.clone())
    }

    pub fn descriptor(&self, node: &str) -> Option<NodeDescriptor> {
        self.nodes.get(node).map(|p| p.descriptor.clone())
    }

    pub fn contains(&self, node: &str) -> bool {
        self.nodes.contains_key(node)
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn descriptors(&self) -> Vec<NodeDescriptor> {
        let mut peers: Vec<NodeDescriptor> =
            self.nodes.iter().map(|e| e.value().descriptor.clone()).collect();
        peers.sort_by(|a, b| a.id.cmp(&b.id));
        peers
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Send `message` to every identified peer. Returns how many sends
    /// were queued.
    pub fn broadcast(&self, message: &Message) -> usize {
        let mut sent = 0;
        for peer in self.nodes.iter() {
            match peer.connection.send(message) {
                Ok(()) => sent += 1,
                Err(e) => tracing::debug!(node = %peer.key(), "Broadcast skipped: {}", e),
            }
        }
        sent
    }

    pub fn remember_dialed(&self, addr: impl Into<String>, node: Arc<MessageNode>) {
        if let Some(previous) = self.dialed.insert(addr.into(), node) {
            previous.close();
        }
    }

    pub fn close_all(&self) {
        for peer in self.nodes.iter() {
            peer.connection.close();
        }
        for link in self.dialed.iter() {
            link.close();
        }
        self.nodes.clear();
        self.sessions.clear();
        self.dialed.clear();
    }
}

impl MessageSink for PeerTable {
    fn send_to(&self, node: &str, message: &Message) -> Result<()> {
        let connection = self
            .connection(node)
            .ok_or_else(|| CloudError::UnknownNode(node.to_string()))?;
        connection.send(message)
    }
}
