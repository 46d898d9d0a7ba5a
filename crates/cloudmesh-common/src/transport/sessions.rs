use dashmap::DashMap;

use super::buffer::MessageBuffer;
use super::connection::SessionId;
use crate::protocol::error::Result;
use crate::protocol::Message;

/// Pending message buffers of the server's sessions.
///
/// Feeding a session holds that session's map entry for the whole
/// append-decode-store sequence, so framing of one session is serialized
/// while other sessions proceed in parallel.
pub struct SessionBuffers {
    buffers: DashMap<SessionId, MessageBuffer>,
    max_message_size: usize,
}

impl SessionBuffers {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            buffers: DashMap::new(),
            max_message_size,
        }
    }

    /// Start tracking a session with an empty buffer.
    pub fn open(&self, session: SessionId) {
        self.buffers
            .insert(session, MessageBuffer::with_max_size(self.max_message_size));
    }

    /// Feed bytes read from `session` and return the messages they complete.
    ///
    /// Once a buffer completes, its leftover chain replaces it. Bytes for a
    /// session that is not open (already torn down) are dropped.
    pub fn feed(&self, session: SessionId, bytes: &[u8]) -> Result<Vec<Message>> {
        let Some(mut buffer) = self.buffers.get_mut(&session) else {
            tracing::warn!(session, len = bytes.len(), "Dropping bytes for unknown session");
            return Ok(Vec::new());
        };

        buffer.append_bytes(bytes)?;
        if !buffer.is_complete() {
            return Ok(Vec::new());
        }

        let messages = buffer.take_messages();
        let next = buffer
            .take_leftover()
            .unwrap_or_else(|| MessageBuffer::with_max_size(self.max_message_size));
        *buffer = next;
        Ok(messages)
    }

    /// Discard the buffer of a torn down session.
    pub fn close(&self, session: SessionId) {
        if let Some((_, buffer)) = self.buffers.remove(&session) {
            if buffer.pending_len() > 0 {
                tracing::debug!(
                    session,
                    pending = buffer.pending_len(),
                    "Discarding partial message of closed session"
                );
            }
        }
    }

    pub fn contains(&self, session: SessionId) -> bool {
        self.buffers.contains_key(&session)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MessageBody, PathRef};
    use crate::transport::codec::{Codec, DEFAULT_MAX_MESSAGE_SIZE};

    fn encoded(path: &str) -> (Message, Vec<u8>) {
        let message = Message::new(MessageBody::HidePath(PathRef::new([path])));
        let bytes = Codec::new().encode(&message).unwrap();
        (message, bytes)
    }

    #[test]
    fn test_sessions_are_independent() {
        let buffers = SessionBuffers::new(DEFAULT_MAX_MESSAGE_SIZE);
        buffers.open(1);
        buffers.open(2);

        let (a, a_bytes) = encoded("a");
        let (b, b_bytes) = encoded("b");

        assert!(buffers.feed(1, &a_bytes[..6]).unwrap().is_empty());
        assert_eq!(buffers.feed(2, &b_bytes).unwrap(), vec![b]);
        assert_eq!(buffers.feed(1, &a_bytes[6..]).unwrap(), vec![a]);
    }

    #[test]
    fn test_leftover_replaces_completed_buffer() {
        let buffers = SessionBuffers::new(DEFAULT_MAX_MESSAGE_SIZE);
        buffers.open(9);

        let (a, a_bytes) = encoded("a");
        let (b, b_bytes) = encoded("b");
        let mut chunk = a_bytes.clone();
        chunk.extend_from_slice(&b_bytes[..3]);

        assert_eq!(buffers.feed(9, &chunk).unwrap(), vec![a]);
        assert_eq!(buffers.feed(9, &b_bytes[3..]).unwrap(), vec![b]);
    }

    #[test]
    fn test_unknown_session_is_dropped() {
        let buffers = SessionBuffers::new(DEFAULT_MAX_MESSAGE_SIZE);
        let (_, bytes) = encoded("late");

        assert!(buffers.feed(42, &bytes).unwrap().is_empty());
        assert!(!buffers.contains(42));
    }

    #[test]
    fn test_close_discards_buffer() {
        let buffers = SessionBuffers::new(DEFAULT_MAX_MESSAGE_SIZE);
        buffers.open(3);
        let (_, bytes) = encoded("partial");
        buffers.feed(3, &bytes[..5]).unwrap();

        buffers.close(3);
        assert!(buffers.is_empty());
        assert!(buffers.feed(3, &bytes[5..]).unwrap().is_empty());
    }

    #[test]
    fn test_protocol_violation_surfaces() {
        let buffers = SessionBuffers::new(128);
        buffers.open(4);
        assert!(buffers.feed(4, &4096i32.to_le_bytes()).is_err());
    }
}
