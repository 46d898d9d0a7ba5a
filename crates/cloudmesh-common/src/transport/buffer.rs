//! Message buffer for accumulating partial reads.
//!
//! TCP delivers bytes with arbitrary fragmentation and coalescing. A
//! [`MessageBuffer`] turns that stream back into whole [`Message`]s:
//!
//! - bytes accumulate until the 4-byte length prefix is available;
//! - once `declared` bytes are present, exactly one document is decoded;
//! - bytes past the end of that document belong to later messages and are
//!   handed to a chained *leftover* buffer;
//! - a buffer that already produced a message never accepts more raw bytes
//!   itself, everything new goes down the leftover chain. Completed
//!   leftovers are merged back up, so decoded messages always come out in
//!   arrival order.
//!
//! The same type also stages outbound bytes on the send path
//! ([`MessageBuffer::append_message`] / [`MessageBuffer::bytes`]).
//!
//! # Example
//!
//! ```
//! use cloudmesh_common::transport::{Codec, MessageBuffer};
//! use cloudmesh_common::protocol::{Message, MessageBody};
//!
//! let encoded = Codec::new().encode(&Message::new(MessageBody::KeepAlive)).unwrap();
//! let mut buffer = MessageBuffer::new();
//!
//! buffer.append_bytes(&encoded[..10]).unwrap();
//! assert!(!buffer.is_complete());
//!
//! buffer.append_bytes(&encoded[10..]).unwrap();
//! assert!(buffer.is_complete());
//! assert_eq!(buffer.take_messages().len(), 1);
//! ```

use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;

use super::codec::{read_declared_length, Codec, DEFAULT_MAX_MESSAGE_SIZE, LENGTH_PREFIX_SIZE};
use crate::protocol::error::{CloudError, Result};
use crate::protocol::Message;

pub struct MessageBuffer {
    codec: Codec,
    max_message_size: usize,
    /// Raw bytes of a document that is not complete yet.
    pending: BytesMut,
    /// Decoded messages waiting to be drained.
    decoded: VecDeque<Message>,
    /// Set once this buffer decoded its first message.
    produced: bool,
    /// Buffer holding bytes of messages that arrived after ours.
    leftover: Option<Box<MessageBuffer>>,
    /// Encoded bytes staged for transmission.
    outbound: Bytes,
}

impl MessageBuffer {
    /// Create a buffer with the default codec and a 100 MB size limit.
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_MESSAGE_SIZE)
    }

    pub fn with_max_size(max_message_size: usize) -> Self {
        Self::with_codec(Codec::new(), max_message_size)
    }

    pub fn with_codec(codec: Codec, max_message_size: usize) -> Self {
        Self {
            codec,
            max_message_size,
            pending: BytesMut::new(),
            decoded: VecDeque::new(),
            produced: false,
            leftover: None,
            outbound: Bytes::new(),
        }
    }

    /// Wraps one outbound message.
    pub fn for_message(message: &Message) -> Result<Self> {
        let mut buffer = Self::new();
        buffer.append_message(message)?;
        Ok(buffer)
    }

    /// Encode `message` and replace the staged outbound bytes with it.
    pub fn append_message(&mut self, message: &Message) -> Result<()> {
        self.outbound = Bytes::from(self.codec.encode(message)?);
        Ok(())
    }

    /// Feed raw bytes read from the connection.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Protocol`] when a length prefix is negative, too
    /// small or above the size limit, and a codec error when a complete
    /// document cannot be decoded. Either way the stream can no longer be
    /// trusted and the connection should be closed.
    pub fn append_bytes(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        if self.produced {
            let codec = self.codec;
            let max = self.max_message_size;
            let leftover = self
                .leftover
                .get_or_insert_with(|| Box::new(MessageBuffer::with_codec(codec, max)));
            leftover.append_bytes(data)?;
            self.absorb_leftover();
            return Ok(());
        }

        self.pending.extend_from_slice(data);
        self.frame()
    }

    /// True once at least one decoded message is queued.
    pub fn is_complete(&self) -> bool {
        !self.decoded.is_empty()
    }

    /// Drain every decoded message, oldest first. The leftover chain is kept.
    pub fn take_messages(&mut self) -> Vec<Message> {
        self.decoded.drain(..).collect()
    }

    /// Buffer holding bytes of messages that are not complete yet.
    pub fn leftover(&self) -> Option<&MessageBuffer> {
        self.leftover.as_deref()
    }

    pub fn take_leftover(&mut self) -> Option<MessageBuffer> {
        self.leftover.take().map(|b| *b)
    }

    /// Bytes staged for transmission.
    pub fn bytes(&self) -> &[u8] {
        &self.outbound
    }

    /// Number of raw bytes held by this buffer and its leftover chain.
    pub fn pending_len(&self) -> usize {
        self.pending.len() + self.leftover.as_ref().map_or(0, |l| l.pending_len())
    }

    /// Decode as many whole documents as `pending` holds.
    ///
    /// The first document completes this buffer. Anything after it is fed to
    /// a fresh leftover buffer; documents that completes there are merged
    /// back into our queue.
    fn frame(&mut self) -> Result<()> {
        if self.pending.len() < LENGTH_PREFIX_SIZE {
            return Ok(());
        }

        let declared = self.checked_length()?;
        if self.pending.len() < declared {
            return Ok(());
        }

        let document = self.pending.split_to(declared);
        let message = self.codec.decode(&document)?;
        self.decoded.push_back(message);
        self.produced = true;

        let mut rest = self.pending.split();
        while !rest.is_empty() {
            if rest.len() < LENGTH_PREFIX_SIZE {
                break;
            }
            let declared = self.check_limit(read_declared_length(&rest)?)?;
            if rest.len() < declared {
                break;
            }
            let document = rest.split_to(declared);
            self.decoded.push_back(self.codec.decode(&document)?);
        }

        if !rest.is_empty() {
            let mut leftover = MessageBuffer::with_codec(self.codec, self.max_message_size);
            leftover.append_bytes(&rest)?;
            self.leftover = Some(Box::new(leftover));
        }
        Ok(())
    }

    /// Pull messages out of completed leftover buffers, keeping order.
    fn absorb_leftover(&mut self) {
        while let Some(leftover) = self.leftover.as_mut() {
            if !leftover.is_complete() {
                break;
            }
            self.decoded.extend(leftover.decoded.drain(..));
            let next = leftover.leftover.take();
            self.leftover = next;
        }
    }

    fn checked_length(&self) -> Result<usize> {
        self.check_limit(read_declared_length(&self.pending)?)
    }

    fn check_limit(&self, declared: usize) -> Result<usize> {
        if declared > self.max_message_size {
            return Err(CloudError::Protocol(format!(
                "Message too large: {} bytes (max {} bytes)",
                declared, self.max_message_size
            )));
        }
        Ok(declared)
    }
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MessageBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBuffer")
            .field("pending", &self.pending.len())
            .field("decoded", &self.decoded.len())
            .field("produced", &self.produced)
            .field("leftover", &self.leftover)
            .field("outbound", &self.outbound.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MessageBody, PathRef};

    fn encode(message: &Message) -> Vec<u8> {
        Codec::new().encode(message).unwrap()
    }

    fn get(path: &str) -> Message {
        Message::new(MessageBody::Get(PathRef::new([path])))
    }

    #[test]
    fn test_split_frame_reassembly() {
        let message = get("split");
        let bytes = encode(&message);
        let n = bytes.len();
        let mut buffer = MessageBuffer::new();

        buffer.append_bytes(&bytes[..n - 1]).unwrap();
        assert!(!buffer.is_complete());

        buffer.append_bytes(&bytes[n - 1..]).unwrap();
        assert!(buffer.is_complete());
        assert_eq!(buffer.take_messages(), vec![message]);
    }

    #[test]
    fn test_prefix_split_across_reads() {
        let message = get("prefix");
        let bytes = encode(&message);
        let mut buffer = MessageBuffer::new();

        buffer.append_bytes(&bytes[..2]).unwrap();
        buffer.append_bytes(&bytes[2..3]).unwrap();
        assert!(!buffer.is_complete());
        buffer.append_bytes(&bytes[3..]).unwrap();
        assert_eq!(buffer.take_messages(), vec![message]);
    }

    #[test]
    fn test_coalesced_frames_keep_order() {
        let a = get("a");
        let b = get("b");
        let mut bytes = encode(&a);
        bytes.extend(encode(&b));

        let mut buffer = MessageBuffer::new();
        buffer.append_bytes(&bytes).unwrap();

        assert_eq!(buffer.take_messages(), vec![a, b]);
        assert!(buffer.leftover().is_none());
    }

    #[test]
    fn test_three_frames_in_one_chunk() {
        let messages: Vec<Message> = ["x", "y", "z"].into_iter().map(get).collect();
        let bytes: Vec<u8> = messages.iter().flat_map(encode).collect();

        let mut buffer = MessageBuffer::new();
        buffer.append_bytes(&bytes).unwrap();
        assert_eq!(buffer.take_messages(), messages);
    }

    #[test]
    fn test_trailing_partial_frame_goes_to_leftover() {
        let a = get("a");
        let b = get("b");
        let b_bytes = encode(&b);
        let mut bytes = encode(&a);
        bytes.extend_from_slice(&b_bytes[..7]);

        let mut buffer = MessageBuffer::new();
        buffer.append_bytes(&bytes).unwrap();

        assert_eq!(buffer.take_messages(), vec![a]);
        let leftover = buffer.leftover().expect("leftover chain");
        assert!(!leftover.is_complete());
        assert_eq!(leftover.pending_len(), 7);

        let mut leftover = buffer.take_leftover().unwrap();
        leftover.append_bytes(&b_bytes[7..]).unwrap();
        assert_eq!(leftover.take_messages(), vec![b]);
    }

    #[test]
    fn test_completed_buffer_routes_new_bytes_to_leftover() {
        let a = get("a");
        let b = get("b");
        let mut buffer = MessageBuffer::new();

        buffer.append_bytes(&encode(&a)).unwrap();
        assert!(buffer.is_complete());

        // More bytes before the consumer drained `a`.
        buffer.append_bytes(&encode(&b)).unwrap();
        assert_eq!(buffer.take_messages(), vec![a, b]);
    }

    #[test]
    fn test_drained_buffer_still_uses_leftover() {
        let a = get("a");
        let b = get("b");
        let b_bytes = encode(&b);
        let mut buffer = MessageBuffer::new();

        buffer.append_bytes(&encode(&a)).unwrap();
        assert_eq!(buffer.take_messages().len(), 1);
        assert!(!buffer.is_complete());

        buffer.append_bytes(&b_bytes[..5]).unwrap();
        assert!(!buffer.is_complete());
        assert_eq!(buffer.leftover().unwrap().pending_len(), 5);

        buffer.append_bytes(&b_bytes[5..]).unwrap();
        assert_eq!(buffer.take_messages(), vec![b]);
    }

    #[test]
    fn test_byte_by_byte_feed() {
        let messages = vec![get("one"), get("two")];
        let bytes: Vec<u8> = messages.iter().flat_map(encode).collect();

        let mut buffer = MessageBuffer::new();
        let mut received = Vec::new();
        for byte in bytes {
            buffer.append_bytes(&[byte]).unwrap();
            received.extend(buffer.take_messages());
        }
        assert_eq!(received, messages);
    }

    #[test]
    fn test_oversized_length_is_protocol_violation() {
        let mut buffer = MessageBuffer::with_max_size(64);
        let err = buffer.append_bytes(&1000i32.to_le_bytes()).unwrap_err();
        assert!(matches!(err, CloudError::Protocol(_)));
    }

    #[test]
    fn test_negative_length_is_protocol_violation() {
        let mut buffer = MessageBuffer::new();
        let err = buffer.append_bytes(&(-1i32).to_le_bytes()).unwrap_err();
        assert!(matches!(err, CloudError::Protocol(_)));
    }

    #[test]
    fn test_oversized_trailing_frame_is_rejected() {
        let a = get("a");
        let mut bytes = encode(&a);
        bytes.extend_from_slice(&i32::MAX.to_le_bytes());

        let mut buffer = MessageBuffer::with_max_size(1024);
        assert!(buffer.append_bytes(&bytes).is_err());
    }

    #[test]
    fn test_append_message_stages_bytes() {
        let message = get("out");
        let mut buffer = MessageBuffer::new();
        assert!(buffer.bytes().is_empty());

        buffer.append_message(&message).unwrap();
        assert_eq!(buffer.bytes(), encode(&message).as_slice());

        let other = get("replaced");
        buffer.append_message(&other).unwrap();
        assert_eq!(buffer.bytes(), encode(&other).as_slice());
    }
}
