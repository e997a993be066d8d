use serde::Serialize;
use serde::de::DeserializeOwned;

use super::messages::{ClientEvent, ServerEvent};

/// Current protocol version, reported by the health endpoint.
pub const PROTOCOL_VERSION: u8 = 1;

/// Maximum size of a client frame in bytes.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024;

/// Maximum size of a server frame in bytes. Server events carry whole rooms
/// and history pages, so they get far more room than client frames.
pub const MAX_OUTBOUND_SIZE: usize = 1024 * 1024;

#[derive(Debug)]
pub enum ProtocolError {
    EmptyMessage,
    PayloadTooLarge { size: usize, max: usize },
    NotAnEvent,
    SerializeError(String),
    DeserializeError(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::PayloadTooLarge { size, max } => {
                write!(f, "payload too large: {size} bytes (max {max})")
            },
            Self::NotAnEvent => write!(f, "expected an object with an \"event\" name"),
            Self::SerializeError(e) => write!(f, "serialize error: {e}"),
            Self::DeserializeError(e) => write!(f, "deserialize error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Encode any event enum to a JSON text frame of at most `max` bytes.
pub fn encode_event<T: Serialize>(event: &T, max: usize) -> Result<String, ProtocolError> {
    let text =
        serde_json::to_string(event).map_err(|e| ProtocolError::SerializeError(e.to_string()))?;
    if text.len() > max {
        return Err(ProtocolError::PayloadTooLarge {
            size: text.len(),
            max,
        });
    }
    Ok(text)
}

/// Encode a `ServerEvent` to wire format.
pub fn encode_server_event(event: &ServerEvent) -> Result<String, ProtocolError> {
    encode_event(event, MAX_OUTBOUND_SIZE)
}

/// Encode a `ClientEvent` to wire format.
pub fn encode_client_event(event: &ClientEvent) -> Result<String, ProtocolError> {
    encode_event(event, MAX_MESSAGE_SIZE)
}

/// Decode a JSON text frame of at most `max` bytes into an event enum.
///
/// Frames whose `data` is missing or `null` are decoded as if `data` were
/// `{}`, so payload-less events like `createChessRoom` may omit it.
pub fn decode_event<T: DeserializeOwned>(text: &str, max: usize) -> Result<T, ProtocolError> {
    if text.trim().is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    if text.len() > max {
        return Err(ProtocolError::PayloadTooLarge {
            size: text.len(),
            max,
        });
    }
    let mut value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializeError(e.to_string()))?;
    let Some(obj) = value.as_object_mut() else {
        return Err(ProtocolError::NotAnEvent);
    };
    if !obj.get("event").is_some_and(serde_json::Value::is_string) {
        return Err(ProtocolError::NotAnEvent);
    }
    match obj.get("data") {
        None | Some(serde_json::Value::Null) => {
            obj.insert("data".to_string(), serde_json::json!({}));
        },
        Some(_) => {},
    }
    serde_json::from_value(value).map_err(|e| ProtocolError::DeserializeError(e.to_string()))
}

/// Decode raw wire data into a `ClientEvent`.
pub fn decode_client_event(text: &str) -> Result<ClientEvent, ProtocolError> {
    decode_event(text, MAX_MESSAGE_SIZE)
}

/// Decode raw wire data into a `ServerEvent`.
pub fn decode_server_event(text: &str) -> Result<ServerEvent, ProtocolError> {
    decode_event(text, MAX_OUTBOUND_SIZE)
}
