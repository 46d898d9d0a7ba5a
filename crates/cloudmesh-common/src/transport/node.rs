use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;

use super::buffer::MessageBuffer;
use super::codec::DEFAULT_MAX_MESSAGE_SIZE;
use super::connection::{next_session_id, spawn_connection, Connection, MessageHandler};
use crate::protocol::error::{CloudError, Result};
use crate::protocol::Message;

/// Default timeout for establishing a connection (5 seconds)
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection state observed by [`MessageNode::wait_for_connect`].
#[derive(Debug, Clone)]
pub enum ConnectState {
    Connecting,
    Connected(Connection),
    Failed(String),
    Disconnected,
}

/// Client side of a CloudMesh link: one outbound connection to one peer.
///
/// [`MessageNode::connect`] returns immediately; the connect attempt runs on
/// its own task. Callers park on [`MessageNode::wait_for_connect`] until the
/// attempt succeeds or fails.
///
/// # Example
///
/// ```no_run
/// use cloudmesh_common::transport::{Connection, MessageHandler, MessageNode};
/// use cloudmesh_common::protocol::{Message, MessageBody};
/// use std::sync::Arc;
///
/// struct Print;
///
/// impl MessageHandler for Print {
///     fn on_message(&self, _connection: &Connection, message: Message) {
///         println!("{}", message.type_name());
///     }
/// }
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let node = MessageNode::connect("127.0.0.1:7400", Arc::new(Print));
/// node.wait_for_connect().await?;
/// node.send(&Message::new(MessageBody::KeepAlive))?;
/// # Ok(())
/// # }
/// ```
pub struct MessageNode {
    addr: String,
    state: watch::Receiver<ConnectState>,
}

impl MessageNode {
    pub fn connect(addr: impl Into<String>, handler: Arc<dyn MessageHandler>) -> Self {
        Self::connect_with(addr, handler, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_MESSAGE_SIZE)
    }

    pub fn connect_with(
        addr: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
        connect_timeout: Duration,
        max_message_size: usize,
    ) -> Self {
        let addr = addr.into();
        let (tx, rx) = watch::channel(ConnectState::Connecting);

        let task_addr = addr.clone();
        tokio::spawn(async move {
            let state = tx.clone();
            match Self::establish(&task_addr, connect_timeout).await {
                Ok(stream) => {
                    let mut buffer = MessageBuffer::with_max_size(max_message_size);
                    let spawned = spawn_connection(
                        stream,
                        next_session_id(),
                        handler.clone(),
                        move |bytes| {
                            buffer.append_bytes(bytes)?;
                            Ok(buffer.take_messages())
                        },
                        |_: &Connection| {},
                        move |_: &Connection| {
                            state.send_replace(ConnectState::Disconnected);
                        },
                    );
                    match spawned {
                        Ok(connection) => {
                            tracing::debug!(addr = %task_addr, session = connection.session(), "Connected");
                            // The reader may already have seen EOF and
                            // marked us Disconnected.
                            tx.send_if_modified(|current| {
                                if matches!(current, ConnectState::Connecting) {
                                    *current = ConnectState::Connected(connection);
                                    true
                                } else {
                                    false
                                }
                            });
                        }
                        Err(e) => {
                            handler.on_connect_fail(&task_addr, &e);
                            tx.send_replace(ConnectState::Failed(e.to_string()));
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(addr = %task_addr, "Connect failed: {}", e);
                    handler.on_connect_fail(&task_addr, &e);
                    tx.send_replace(ConnectState::Failed(e.to_string()));
                }
            }
        });

        Self { addr, state: rx }
    }

    async fn establish(addr: &str, connect_timeout: Duration) -> Result<TcpStream> {
        match tokio::time::timeout(connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(CloudError::Connection(format!(
                "Failed to connect to {}: {}",
                addr, e
            ))),
            Err(_) => Err(CloudError::Connection(format!(
                "Timed out connecting to {} after {}ms",
                addr,
                connect_timeout.as_millis()
            ))),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Parks until the connect attempt resolves.
    pub async fn wait_for_connect(&self) -> Result<Connection> {
        let mut rx = self.state.clone();
        let state = rx
            .wait_for(|s| !matches!(s, ConnectState::Connecting))
            .await
            .map_err(|_| CloudError::Disconnected)?
            .clone();

        match state {
            ConnectState::Connected(connection) => Ok(connection),
            ConnectState::Failed(reason) => Err(CloudError::Connection(reason)),
            ConnectState::Disconnected | ConnectState::Connecting => Err(CloudError::Disconnected),
        }
    }

    pub fn state(&self) -> ConnectState {
        self.state.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        matches!(*self.state.borrow(), ConnectState::Connected(_))
    }

    /// Current connection, if established and still open.
    pub fn connection(&self) -> Option<Connection> {
        match &*self.state.borrow() {
            ConnectState::Connected(connection) => Some(connection.clone()),
            _ => None,
        }
    }

    /// Wrap `message` in a buffer and write it to the peer.
    pub fn send(&self, message: &Message) -> Result<()> {
        let connection = self.connection().ok_or(CloudError::Disconnected)?;
        connection.send(message)
    }

    pub fn close(&self) {
        if let Some(connection) = self.connection() {
            connection.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ignore;

    impl MessageHandler for Ignore {
        fn on_message(&self, _connection: &Connection, _message: Message) {}
    }

    #[tokio::test]
    async fn test_connect_refused_reports_failure() {
        // Bind and drop to get a port nobody listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let node = MessageNode::connect(addr.to_string(), Arc::new(Ignore));
        let result = node.wait_for_connect().await;

        assert!(matches!(result, Err(CloudError::Connection(_))));
        assert!(!node.is_connected());
        assert!(matches!(node.send(&Message::new(crate::protocol::MessageBody::KeepAlive)), Err(CloudError::Disconnected)));
    }

    #[tokio::test]
    async fn test_connect_succeeds() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let node = MessageNode::connect(addr.to_string(), Arc::new(Ignore));
        let (_socket, _) = listener.accept().await.unwrap();

        let connection = node.wait_for_connect().await.unwrap();
        assert_eq!(connection.peer_addr(), addr);
        assert!(node.is_connected());
    }
}
