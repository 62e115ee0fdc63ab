//! Stream Codec Module
//!
//! Pure encoding and decoding between JSON text frames and the message
//! types in [`messages`](super::messages). No state, no I/O.
//!
//! The server may batch several messages into one frame as a JSON array:
//!
//! ```json
//! [{"type":"curve_event","id":"1700000000000-0",...},{"type":"curve_event","id":"1700000000000-1",...}]
//! ```

use super::messages::{
    ClientMessage, CurveEventMessage, DisconnectMessage, ErrorMessage, FiltersMessage,
    InfoMessage, ServerMessage,
};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Unknown message type.
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    /// Message object without a `type` field.
    #[error("message has no type field")]
    MissingType,

    /// Invalid message format.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// JSON codec for the curve event stream.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a text frame into server messages.
    ///
    /// Accepts a single JSON object or an array of objects.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON parsing fails or any element has an unknown
    /// or missing type.
    pub fn decode(&self, text: &str) -> Result<Vec<ServerMessage>, CodecError> {
        let trimmed = text.trim();

        if trimmed.starts_with('[') {
            let raw: Vec<serde_json::Value> = serde_json::from_str(trimmed)?;
            raw.into_iter().map(decode_value).collect()
        } else if trimmed.starts_with('{') {
            let value: serde_json::Value = serde_json::from_str(trimmed)?;
            Ok(vec![decode_value(value)?])
        } else {
            let preview: String = trimmed.chars().take(50).collect();
            Err(CodecError::InvalidFormat(format!(
                "expected JSON array or object, got: {preview}..."
            )))
        }
    }

    /// Encode a client request.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode(&self, message: &ClientMessage) -> Result<String, CodecError> {
        Ok(serde_json::to_string(message)?)
    }

    /// Decode a client request (server side of the protocol).
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid request.
    pub fn decode_request(&self, text: &str) -> Result<ClientMessage, CodecError> {
        Ok(serde_json::from_str(text.trim())?)
    }

    /// Encode a server message (server side of the protocol).
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode_server(&self, message: &ServerMessage) -> Result<String, CodecError> {
        Ok(serde_json::to_string(message)?)
    }
}

fn decode_value(value: serde_json::Value) -> Result<ServerMessage, CodecError> {
    let msg_type = value
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or(CodecError::MissingType)?;

    let message = match msg_type {
        "curve_event" => {
            let m: CurveEventMessage = serde_json::from_value(value)?;
            ServerMessage::CurveEvent(m)
        }
        "filters" => {
            let m: FiltersMessage = serde_json::from_value(value)?;
            ServerMessage::Filters(m)
        }
        "message" => {
            let m: InfoMessage = serde_json::from_value(value)?;
            ServerMessage::Message(m)
        }
        "error" => {
            let m: ErrorMessage = serde_json::from_value(value)?;
            ServerMessage::Error(m)
        }
        "disconnect" => {
            let m: DisconnectMessage = serde_json::from_value(value)?;
            ServerMessage::Disconnect(m)
        }
        other => return Err(CodecError::UnknownMessageType(other.to_string())),
    };

    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::{EventId, EventType};
    use crate::domain::filter::NameFilter;

    #[test]
    fn decode_curve_event_object() {
        let codec = JsonCodec::new();
        let json = r#"{
            "type": "curve_event",
            "id": "1700000000000-0",
            "curve": {"name": "pro de wnd ec00 mwh/h cet min15 f", "area": "DE"},
            "event_type": "CURVE_UPDATE",
            "begin": "2024-01-01T00:00:00Z",
            "end": "2024-01-01T06:00:00+00:00",
            "num_values": 24
        }"#;

        let messages = codec.decode(json).unwrap();
        assert_eq!(messages.len(), 1);

        match &messages[0] {
            ServerMessage::CurveEvent(msg) => {
                assert_eq!(msg.id, EventId::new(1_700_000_000_000, 0));
                assert_eq!(msg.event_type, EventType::CurveUpdate);
                assert_eq!(msg.num_values, 24);
                assert!(msg.end > msg.begin);
            }
            other => panic!("expected CurveEvent, got {other:?}"),
        }
    }

    #[test]
    fn decode_batched_array_preserves_order() {
        let codec = JsonCodec::new();
        let json = r#"[
            {"type":"curve_event","id":"1700000000000-0","curve":"a","event_type":"CURVE_UPDATE"},
            {"type":"message","message":"hello"},
            {"type":"curve_event","id":"1700000000000-1","curve":"b","event_type":"CURVE_TRUNCATE"}
        ]"#;

        let messages = codec.decode(json).unwrap();
        assert_eq!(messages.len(), 3);
        assert!(matches!(&messages[0], ServerMessage::CurveEvent(m) if m.id.serial() == 0));
        assert!(matches!(&messages[1], ServerMessage::Message(m) if m.message == "hello"));
        assert!(matches!(&messages[2], ServerMessage::CurveEvent(m) if m.id.serial() == 1));
    }

    #[test]
    fn decode_control_messages() {
        let codec = JsonCodec::new();

        let ack = codec
            .decode(r#"{"type":"filters","request_id":"r1","success":false,"message":"nope"}"#)
            .unwrap();
        assert!(matches!(&ack[0], ServerMessage::Filters(m) if !m.success));

        let err = codec
            .decode(r#"{"type":"error","code":429,"message":"slow down"}"#)
            .unwrap();
        assert!(matches!(&err[0], ServerMessage::Error(m) if m.code == Some(429)));

        let bye = codec
            .decode(r#"{"type":"disconnect","code":1001,"message":"restart"}"#)
            .unwrap();
        assert!(matches!(&bye[0], ServerMessage::Disconnect(m) if m.code == Some(1001)));
    }

    #[test]
    fn decode_empty_array() {
        let codec = JsonCodec::new();
        assert!(codec.decode("[]").unwrap().is_empty());
    }

    #[test]
    fn decode_rejects_unknown_and_malformed() {
        let codec = JsonCodec::new();
        assert!(matches!(
            codec.decode(r#"{"type":"heartbeat"}"#),
            Err(CodecError::UnknownMessageType(t)) if t == "heartbeat"
        ));
        assert!(matches!(
            codec.decode(r#"{"message":"no type"}"#),
            Err(CodecError::MissingType)
        ));
        assert!(matches!(codec.decode("ping"), Err(CodecError::InvalidFormat(_))));
        assert!(matches!(
            codec.decode(
                r#"{"type":"curve_event","id":"bad","curve":"a","event_type":"CURVE_UPDATE"}"#
            ),
            Err(CodecError::Json(_))
        ));
    }

    #[test]
    fn request_encode_decode_agree() {
        let codec = JsonCodec::new();
        let msg = ClientMessage::subscribe(vec![NameFilter::new(["x"]).into()], None);
        let text = codec.encode(&msg).unwrap();
        assert_eq!(codec.decode_request(&text).unwrap(), msg);
    }

    #[test]
    fn server_encoding_uses_type_tag() {
        let codec = JsonCodec::new();
        let text = codec
            .encode_server(&ServerMessage::Message(InfoMessage {
                message: "hi".to_string(),
            }))
            .unwrap();
        assert!(text.contains(r#""type":"message""#));
        assert_eq!(codec.decode(&text).unwrap().len(), 1);
    }
}
