//! Per-connection IO shared by the server and node roles.

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use super::buffer::MessageBuffer;
use crate::protocol::error::{CloudError, Result};
use crate::protocol::Message;

/// Identifier of one TCP session, unique within this process.
pub type SessionId = u64;

/// Size of a single socket read.
const READ_CHUNK_SIZE: usize = 64 * 1024;

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_session_id() -> SessionId {
    SESSION_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Callbacks invoked by the transport.
///
/// All hooks run on IO tasks and must not block; long work belongs on a
/// spawned task. Messages of one session are delivered in the order they
/// were framed.
pub trait MessageHandler: Send + Sync + 'static {
    fn on_message(&self, connection: &Connection, message: Message);

    fn on_connect(&self, _connection: &Connection) {}

    /// Called by the node role when the outbound connect attempt fails.
    fn on_connect_fail(&self, _addr: &str, _error: &CloudError) {}

    fn on_disconnect(&self, _connection: &Connection) {}
}

enum Outbound {
    Frame(Bytes),
    Close,
}

/// Clonable handle to one live connection.
///
/// Sending never blocks: frames are queued for the connection's writer
/// task.
#[derive(Clone)]
pub struct Connection {
    session: SessionId,
    peer_addr: SocketAddr,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl Connection {
    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Encode and queue `message`.
    pub fn send(&self, message: &Message) -> Result<()> {
        let buffer = MessageBuffer::for_message(message)?;
        self.send_buffer(&buffer)
    }

    /// Queue the staged bytes of `buffer`.
    pub fn send_buffer(&self, buffer: &MessageBuffer) -> Result<()> {
        self.outbound
            .send(Outbound::Frame(Bytes::copy_from_slice(buffer.bytes())))
            .map_err(|_| CloudError::Disconnected)
    }

    /// Ask the writer to flush what is queued and shut the socket down.
    pub fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("session", &self.session)
            .field("peer_addr", &self.peer_addr)
            .finish()
    }
}

/// Splits `stream`, spawns its writer and reader tasks and returns the
/// outbound handle.
///
/// `decode` turns each chunk read from the socket into the messages it
/// completes. A decode error is a protocol violation and closes the
/// connection. `on_open` runs before any task starts, so it always precedes
/// `on_close`, which runs once the reader stops, before `on_disconnect`.
pub(crate) fn spawn_connection<D, O, C>(
    stream: TcpStream,
    session: SessionId,
    handler: Arc<dyn MessageHandler>,
    decode: D,
    on_open: O,
    on_close: C,
) -> Result<Connection>
where
    D: FnMut(&[u8]) -> Result<Vec<Message>> + Send + 'static,
    O: FnOnce(&Connection),
    C: FnOnce(&Connection) + Send + 'static,
{
    let peer_addr = stream.peer_addr()?;
    let _ = stream.set_nodelay(true);
    let (reader, writer) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();

    let connection = Connection {
        session,
        peer_addr,
        outbound: tx,
    };
    on_open(&connection);

    tokio::spawn(write_loop(writer, rx, session));

    let reader_connection = connection.clone();
    tokio::spawn(async move {
        handler.on_connect(&reader_connection);
        if let Err(e) = read_loop(reader, &reader_connection, handler.as_ref(), decode).await {
            tracing::warn!(session, peer = %reader_connection.peer_addr, "Closing connection: {}", e);
        }
        reader_connection.close();
        on_close(&reader_connection);
        handler.on_disconnect(&reader_connection);
    });

    Ok(connection)
}

async fn read_loop<D>(
    mut reader: OwnedReadHalf,
    connection: &Connection,
    handler: &dyn MessageHandler,
    mut decode: D,
) -> Result<()>
where
    D: FnMut(&[u8]) -> Result<Vec<Message>>,
{
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => {
                tracing::debug!(session = connection.session, "Connection closed by peer");
                return Ok(());
            }
            Ok(n) => n,
            Err(e) => {
                return Err(CloudError::Connection(format!("Failed to read: {}", e)));
            }
        };

        for message in decode(&chunk[..n])? {
            tracing::trace!(
                session = connection.session,
                kind = message.type_name(),
                id = %message.id,
                "Message received"
            );
            handler.on_message(connection, message);
        }
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    session: SessionId,
) {
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Frame(bytes) => {
                if let Err(e) = writer.write_all(&bytes).await {
                    tracing::warn!(session, "Failed to write frame: {}", e);
                    break;
                }
            }
            Outbound::Close => break,
        }
    }
    rx.close();
    let _ = writer.shutdown().await;
}
