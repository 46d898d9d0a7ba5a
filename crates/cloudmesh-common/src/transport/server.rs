use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use super::codec::DEFAULT_MAX_MESSAGE_SIZE;
use super::connection::{next_session_id, spawn_connection, Connection, MessageHandler, SessionId};
use super::sessions::SessionBuffers;
use crate::protocol::error::{CloudError, Result};

/// Async TCP server accepting CloudMesh sessions.
///
/// Each accepted connection gets its own session id, a pending
/// [`MessageBuffer`](super::MessageBuffer) in the shared [`SessionBuffers`]
/// and a reader and writer task. Decoded messages go to the handler passed
/// to [`MessageServer::run`].
pub struct MessageServer {
    listener: TcpListener,
    buffers: Arc<SessionBuffers>,
    connections: Arc<DashMap<SessionId, Connection>>,
}

impl MessageServer {
    /// Creates a server bound to `bind_addr` (e.g. "0.0.0.0:7400").
    pub async fn bind(bind_addr: &str) -> Result<Self> {
        Self::bind_with_limit(bind_addr, DEFAULT_MAX_MESSAGE_SIZE).await
    }

    pub async fn bind_with_limit(bind_addr: &str, max_message_size: usize) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| CloudError::Connection(format!("Failed to bind to {}: {}", bind_addr, e)))?;

        Ok(Self {
            listener,
            buffers: Arc::new(SessionBuffers::new(max_message_size)),
            connections: Arc::new(DashMap::new()),
        })
    }

    /// Gets the actual bound address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| CloudError::Connection(format!("Failed to get local addr: {}", e)))
    }

    /// Handle of a live session.
    pub fn connection(&self, session: SessionId) -> Option<Connection> {
        self.connections.get(&session).map(|c| c.clone())
    }

    pub fn session_count(&self) -> usize {
        self.connections.len()
    }

    /// Accepts connections until the listener fails.
    pub async fn run(&self, handler: Arc<dyn MessageHandler>) -> Result<()> {
        loop {
            let (stream, peer_addr) = self
                .listener
                .accept()
                .await
                .map_err(|e| CloudError::Connection(format!("Failed to accept connection: {}", e)))?;

            let session = next_session_id();
            tracing::debug!(session, %peer_addr, "Connection established");

            self.buffers.open(session);
            let buffers = self.buffers.clone();
            let closing_buffers = self.buffers.clone();
            let connections = self.connections.clone();

            // Registered before the reader starts, so a session that closes
            // straight away is still removed.
            let spawned = spawn_connection(
                stream,
                session,
                handler.clone(),
                move |bytes| buffers.feed(session, bytes),
                |connection: &Connection| {
                    self.connections.insert(session, connection.clone());
                },
                move |connection: &Connection| {
                    closing_buffers.close(connection.session());
                    connections.remove(&connection.session());
                },
            );

            match spawned {
                Ok(connection) => {
                    tracing::trace!(session, peer = %connection.peer_addr(), "Session registered");
                }
                Err(e) => {
                    tracing::warn!(session, %peer_addr, "Failed to set up connection: {}", e);
                    self.buffers.close(session);
                }
            }
        }
    }

    /// Spawns [`MessageServer::run`] on the runtime.
    pub fn spawn(self: Arc<Self>, handler: Arc<dyn MessageHandler>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run(handler).await {
                tracing::error!("Message server stopped: {}", e);
            }
        })
    }
}
