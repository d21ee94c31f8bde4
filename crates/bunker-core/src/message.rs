//! Protocol message schema.
//!
//! The decrypted body of an envelope is one of three JSON shapes:
//! `{id, method, params}` (request), `{id, result}` (accept), or
//! `{id, error}` (reject). The `id` correlates a request with exactly one
//! terminal response.

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Protocol method names.
pub mod method {
    pub const CONNECT: &str = "connect";
    pub const GET_PUBLIC_KEY: &str = "get_public_key";
    pub const SIGN_EVENT: &str = "sign_event";
    pub const PING: &str = "ping";
    pub const NIP04_ENCRYPT: &str = "nip04_encrypt";
    pub const NIP04_DECRYPT: &str = "nip04_decrypt";
    pub const NIP44_ENCRYPT: &str = "nip44_encrypt";
    pub const NIP44_DECRYPT: &str = "nip44_decrypt";

    /// Whether the engine knows how to execute this method at all.
    pub fn is_supported(name: &str) -> bool {
        matches!(
            name,
            CONNECT
                | GET_PUBLIC_KEY
                | SIGN_EVENT
                | PING
                | NIP04_ENCRYPT
                | NIP04_DECRYPT
                | NIP44_ENCRYPT
                | NIP44_DECRYPT
        )
    }
}

/// A request from a peer: invoke `method` with `params`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestMessage {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: Vec<String>,
}

/// A successful terminal response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AcceptMessage {
    pub id: String,
    pub result: String,
}

/// A failed terminal response with a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RejectMessage {
    pub id: String,
    pub error: String,
}

/// A protocol message, discriminated by field shape rather than a tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Request(RequestMessage),
    Accept(AcceptMessage),
    Reject(RejectMessage),
}

impl RequestMessage {
    /// Build a request with a fresh random id.
    pub fn new(method: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            id: fresh_id(),
            method: method.into(),
            params,
        }
    }

    /// The accept answering this request.
    pub fn accept(&self, result: impl Into<String>) -> Message {
        Message::Accept(AcceptMessage {
            id: self.id.clone(),
            result: result.into(),
        })
    }

    /// The reject answering this request.
    pub fn reject(&self, error: impl Into<String>) -> Message {
        Message::Reject(RejectMessage {
            id: self.id.clone(),
            error: error.into(),
        })
    }
}

impl Message {
    /// The correlation id shared by a request and its terminal response.
    pub fn id(&self) -> &str {
        match self {
            Message::Request(m) => &m.id,
            Message::Accept(m) => &m.id,
            Message::Reject(m) => &m.id,
        }
    }

    /// Whether this is a terminal response (accept or reject).
    pub fn is_response(&self) -> bool {
        !matches!(self, Message::Request(_))
    }

    /// Parse a decrypted payload into a validated message.
    ///
    /// Malformed JSON is a `Decode` error; well-formed JSON that does not
    /// match any message shape, or matches with empty required fields, is a
    /// `Schema` error.
    pub fn parse(payload: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(payload).map_err(|e| CoreError::Decode(e.to_string()))?;
        let message: Message =
            serde_json::from_value(value).map_err(|e| CoreError::Schema(e.to_string()))?;
        message.validate()?;
        Ok(message)
    }

    /// Serialize to the canonical wire JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    fn validate(&self) -> Result<()> {
        if self.id().is_empty() {
            return Err(CoreError::Schema("empty message id".into()));
        }
        if let Message::Request(req) = self {
            if req.method.is_empty() {
                return Err(CoreError::Schema("empty request method".into()));
            }
        }
        Ok(())
    }
}

/// A random 16-byte hex correlation id.
fn fresh_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request() {
        let msg = Message::parse(r#"{"id":"1","method":"ping","params":[]}"#).unwrap();
        match msg {
            Message::Request(req) => {
                assert_eq!(req.method, "ping");
                assert!(req.params.is_empty());
            }
            other => panic!("expected Request, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_accept_and_reject() {
        assert!(matches!(
            Message::parse(r#"{"id":"1","result":"pong"}"#).unwrap(),
            Message::Accept(_)
        ));
        assert!(matches!(
            Message::parse(r#"{"id":"1","error":"denied"}"#).unwrap(),
            Message::Reject(_)
        ));
    }

    #[test]
    fn test_malformed_json_is_decode_error() {
        match Message::parse("{not json") {
            Err(CoreError::Decode(_)) => {}
            other => panic!("expected Decode error, got {:?}", other),
        }
    }

    #[test]
    fn test_wrong_shape_is_schema_error() {
        match Message::parse(r#"{"id":"1","unexpected":true}"#) {
            Err(CoreError::Schema(_)) => {}
            other => panic!("expected Schema error, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_id_is_schema_error() {
        match Message::parse(r#"{"id":"","result":"x"}"#) {
            Err(CoreError::Schema(_)) => {}
            other => panic!("expected Schema error, got {:?}", other),
        }
    }

    #[test]
    fn test_answer_helpers_share_id() {
        let req = RequestMessage::new(method::PING, vec![]);
        assert_eq!(req.accept("pong").id(), req.id);
        assert_eq!(req.reject("no").id(), req.id);
    }

    #[test]
    fn test_fresh_ids_are_unique() {
        let a = RequestMessage::new(method::PING, vec![]);
        let b = RequestMessage::new(method::PING, vec![]);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_wire_roundtrip() {
        let original = Message::Request(RequestMessage::new(
            method::SIGN_EVENT,
            vec![r#"{"kind":1}"#.into()],
        ));
        let parsed = Message::parse(&original.to_json().unwrap()).unwrap();
        assert_eq!(parsed, original);
    }
}
