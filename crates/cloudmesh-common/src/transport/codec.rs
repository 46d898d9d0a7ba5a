use crate::protocol::error::{CloudError, Result};
use crate::protocol::Message;

/// Size of the little-endian length prefix that starts every document.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Smallest length a document may declare: the prefix plus one byte of body.
pub const MIN_DOCUMENT_SIZE: usize = LENGTH_PREFIX_SIZE + 1;

/// Default upper bound for a single document (100 MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// Document codec used to turn messages into self-describing byte documents.
///
/// Every document starts with a 4-byte little-endian `i32` holding the total
/// document length, prefix included, followed by the encoded body. The body
/// carries the reserved `_class` field naming the message variant.
///
/// BSON is the wire encoding: a BSON document already opens with its own
/// total length, so the document is the frame. JSON bodies behind the same
/// prefix remain available for tooling and tests.
///
/// # Example
///
/// ```
/// use cloudmesh_common::transport::Codec;
/// use cloudmesh_common::protocol::{Message, MessageBody};
///
/// let codec = Codec::new();
/// let message = Message::new(MessageBody::KeepAlive);
///
/// let encoded = codec.encode(&message).unwrap();
/// let decoded = codec.decode(&encoded).unwrap();
/// assert_eq!(message, decoded);
/// ```
#[derive(Debug, Clone, Copy)]
pub enum Codec {
    Bson(BsonCodec),
    Json(JsonCodec),
}

impl Codec {
    pub fn new() -> Self {
        Codec::Bson(BsonCodec)
    }

    /// Encode a message into one complete document.
    pub fn encode(&self, message: &Message) -> Result<Vec<u8>> {
        match self {
            Codec::Bson(_) => BsonCodec::encode_message(message),
            Codec::Json(_) => JsonCodec::encode_message(message),
        }
    }

    /// Decode exactly one complete document.
    pub fn decode(&self, document: &[u8]) -> Result<Message> {
        match self {
            Codec::Bson(_) => BsonCodec::decode_message(document),
            Codec::Json(_) => JsonCodec::decode_message(document),
        }
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}

/// BSON documents. The leading `i32` of the document is the frame length.
#[derive(Debug, Clone, Copy)]
pub struct BsonCodec;

impl BsonCodec {
    pub fn encode_message(message: &Message) -> Result<Vec<u8>> {
        let document = bson::to_document(message)?;
        let mut bytes = Vec::new();
        document.to_writer(&mut bytes)?;
        Ok(bytes)
    }

    pub fn decode_message(document: &[u8]) -> Result<Message> {
        check_declared_length(document)?;
        let parsed = bson::Document::from_reader(&mut &document[..])?;
        Ok(bson::from_document(parsed)?)
    }
}

/// JSON bodies behind the length prefix.
#[derive(Debug, Clone, Copy)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn encode_message(message: &Message) -> Result<Vec<u8>> {
        let body = serde_json::to_vec(message)?;
        let total = LENGTH_PREFIX_SIZE + body.len();
        let declared = i32::try_from(total).map_err(|_| {
            CloudError::Protocol(format!("Document too large to encode: {} bytes", total))
        })?;

        let mut document = Vec::with_capacity(total);
        document.extend_from_slice(&declared.to_le_bytes());
        document.extend_from_slice(&body);
        Ok(document)
    }

    pub fn decode_message(document: &[u8]) -> Result<Message> {
        check_declared_length(document)?;
        Ok(serde_json::from_slice(&document[LENGTH_PREFIX_SIZE..])?)
    }
}

fn check_declared_length(document: &[u8]) -> Result<()> {
    let declared = read_declared_length(document)?;
    if declared != document.len() {
        return Err(CloudError::Protocol(format!(
            "Declared length {} does not match document length {}",
            declared,
            document.len()
        )));
    }
    Ok(())
}

/// Reads the declared total length from the first four bytes of `bytes`.
///
/// Fails when fewer than four bytes are given or when the declared length is
/// negative or too small to hold a document body.
pub fn read_declared_length(bytes: &[u8]) -> Result<usize> {
    let prefix: [u8; LENGTH_PREFIX_SIZE] = bytes
        .get(..LENGTH_PREFIX_SIZE)
        .and_then(|p| p.try_into().ok())
        .ok_or_else(|| CloudError::Protocol("Missing length prefix".to_string()))?;

    let declared = i32::from_le_bytes(prefix);
    if declared < MIN_DOCUMENT_SIZE as i32 {
        return Err(CloudError::Protocol(format!(
            "Invalid declared document length: {}",
            declared
        )));
    }
    Ok(declared as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{GetResponse, MessageBody, PathRef, Value};

    #[test]
    fn test_prefix_is_little_endian_total_length() {
        let message = Message::new(MessageBody::Get(PathRef::new(["a", "b"])));
        let encoded = JsonCodec::encode_message(&message).unwrap();

        let declared = u32::from_le_bytes(encoded[..4].try_into().unwrap()) as usize;
        assert_eq!(declared, encoded.len());
    }

    #[test]
    fn test_body_carries_type_field() {
        let message = Message::new(MessageBody::KeepAlive);
        let encoded = JsonCodec::encode_message(&message).unwrap();

        let body: serde_json::Value = serde_json::from_slice(&encoded[4..]).unwrap();
        assert_eq!(body["_class"], "cloudmesh.protocol.KeepAlive");
        assert_eq!(body["id"], message.id.to_string());
    }

    #[test]
    fn test_codec_enum_round_trip() {
        let message = Message::new(MessageBody::Shutdown).with_session("session-7");

        for codec in [Codec::new(), Codec::Json(JsonCodec)] {
            let decoded = codec.decode(&codec.encode(&message).unwrap()).unwrap();
            assert_eq!(message, decoded);
        }
    }

    #[test]
    fn test_default_codec_writes_bson_documents() {
        let message = Message::new(MessageBody::Get(PathRef::new(["a", "b"])));
        let encoded = Codec::new().encode(&message).unwrap();

        // The BSON document's own length is the frame prefix.
        let declared = i32::from_le_bytes(encoded[..4].try_into().unwrap()) as usize;
        assert_eq!(declared, encoded.len());
        assert_eq!(*encoded.last().unwrap(), 0);

        let document = bson::Document::from_reader(&mut encoded.as_slice()).unwrap();
        assert_eq!(document.get_str("_class").unwrap(), "cloudmesh.protocol.Get");
        assert!(document.contains_key("id"));
    }

    #[test]
    fn test_bson_keeps_null_values() {
        let message = Message::new(MessageBody::Response(GetResponse::found(Value::Null)));
        let decoded = BsonCodec::decode_message(&BsonCodec::encode_message(&message).unwrap()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_bson_mismatched_length_rejected() {
        let message = Message::new(MessageBody::KeepAlive);
        let mut encoded = BsonCodec::encode_message(&message).unwrap();
        encoded.push(0);
        assert!(matches!(
            BsonCodec::decode_message(&encoded),
            Err(CloudError::Protocol(_))
        ));
    }

    #[test]
    fn test_bson_unknown_type_rejected() {
        let document = bson::doc! {
            "id": "6f2a1c9e-1f0b-4a55-8b7e-4fd1c1a3a001",
            "timestamp": 1i64,
            "_class": "cloudmesh.protocol.Nope",
        };
        let mut bytes = Vec::new();
        document.to_writer(&mut bytes).unwrap();

        assert!(matches!(
            BsonCodec::decode_message(&bytes),
            Err(CloudError::BsonDecode(_))
        ));
    }

    #[test]
    fn test_negative_length_rejected() {
        let bytes = (-12i32).to_le_bytes();
        assert!(matches!(
            read_declared_length(&bytes),
            Err(CloudError::Protocol(_))
        ));
    }

    #[test]
    fn test_length_shorter_than_prefix_rejected() {
        let bytes = 3i32.to_le_bytes();
        assert!(read_declared_length(&bytes).is_err());
    }

    #[test]
    fn test_mismatched_length_rejected() {
        let message = Message::new(MessageBody::KeepAlive);
        let mut encoded = JsonCodec::encode_message(&message).unwrap();
        encoded.push(b' ');
        assert!(JsonCodec::decode_message(&encoded).is_err());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let body = br#"{"id":"6f2a1c9e-1f0b-4a55-8b7e-4fd1c1a3a001","timestamp":1,"_class":"cloudmesh.protocol.Nope"}"#;
        let mut document = ((body.len() + 4) as i32).to_le_bytes().to_vec();
        document.extend_from_slice(body);

        assert!(matches!(
            JsonCodec::decode_message(&document),
            Err(CloudError::Codec(_))
        ));
    }
}
