//! Outgoing payload normalization and incoming payload decoding.

use std::borrow::Cow;

use serde::Serialize;
use tracing::warn;

use crate::error::RpcError;

/// Payload carried by an addressed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    pub fn empty() -> Self {
        Self::Text(String::new())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.is_empty(),
            Self::Binary(bytes) => bytes.is_empty(),
        }
    }

    /// The payload as UTF-8 text. Binary payloads that are not valid UTF-8
    /// are logged and yield `None`.
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            Self::Text(text) => Some(Cow::Borrowed(text)),
            Self::Binary(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) => Some(Cow::Borrowed(text)),
                Err(e) => {
                    warn!(error = %e, len = bytes.len(), "Failed to decode payload bytes");
                    None
                }
            },
        }
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

/// Wraps any serializable value so it is sent as JSON text.
#[derive(Debug, Clone)]
pub struct Json<T>(pub T);

/// Conversion into an outgoing [`Payload`].
///
/// Nothing becomes empty text, text and bytes pass through unchanged, and
/// structured values are serialized to JSON text.
pub trait IntoPayload {
    fn into_payload(self) -> Result<Payload, RpcError>;
}

impl IntoPayload for Payload {
    fn into_payload(self) -> Result<Payload, RpcError> {
        Ok(self)
    }
}

impl IntoPayload for () {
    fn into_payload(self) -> Result<Payload, RpcError> {
        Ok(Payload::empty())
    }
}

impl IntoPayload for String {
    fn into_payload(self) -> Result<Payload, RpcError> {
        Ok(Payload::Text(self))
    }
}

impl IntoPayload for &str {
    fn into_payload(self) -> Result<Payload, RpcError> {
        Ok(Payload::Text(self.to_string()))
    }
}

impl IntoPayload for Vec<u8> {
    fn into_payload(self) -> Result<Payload, RpcError> {
        Ok(Payload::Binary(self))
    }
}

impl IntoPayload for &[u8] {
    fn into_payload(self) -> Result<Payload, RpcError> {
        Ok(Payload::Binary(self.to_vec()))
    }
}

impl IntoPayload for serde_json::Value {
    fn into_payload(self) -> Result<Payload, RpcError> {
        if self.is_null() {
            return Ok(Payload::empty());
        }
        Ok(Payload::Text(serde_json::to_string(&self)?))
    }
}

impl IntoPayload for serde_json::Map<String, serde_json::Value> {
    fn into_payload(self) -> Result<Payload, RpcError> {
        Ok(Payload::Text(serde_json::to_string(&self)?))
    }
}

impl<T: Serialize> IntoPayload for Json<T> {
    fn into_payload(self) -> Result<Payload, RpcError> {
        Ok(Payload::Text(serde_json::to_string(&self.0)?))
    }
}

impl<T: IntoPayload> IntoPayload for Option<T> {
    fn into_payload(self) -> Result<Payload, RpcError> {
        match self {
            Some(inner) => inner.into_payload(),
            None => Ok(Payload::empty()),
        }
    }
}

/// Assign a fresh UUIDv4 string to `field` unless it already holds a value.
///
/// Missing, `null`, `false`, zero, and empty strings, arrays or objects
/// count as unset. Returns the id now stored in the field.
pub fn ensure_id(map: &mut serde_json::Map<String, serde_json::Value>, field: &str) -> String {
    match map.get(field) {
        Some(serde_json::Value::String(id)) if !id.is_empty() => return id.clone(),
        Some(value) if !is_unset(value) => return value.to_string(),
        _ => {}
    }
    let id = uuid::Uuid::new_v4().to_string();
    map.insert(field.to_string(), serde_json::Value::String(id.clone()));
    id
}

fn is_unset(value: &serde_json::Value) -> bool {
    use serde_json::Value;

    match value {
        Value::Null | Value::Bool(false) => true,
        Value::Bool(true) => false,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
    }
}
