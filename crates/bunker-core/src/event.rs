//! Signed transport events and canonical serialization.
//!
//! An event id is the sha256 of the canonical JSON array
//! `[0, pubkey, created_at, kind, tags, content]` with no whitespace. Two
//! events with the same canonical fields have the same id; the Schnorr
//! signature binds that id to the author's public key.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CoreError, Result};
use crate::types::{EventId, PublicKey};

/// The fixed event kind used by the remote-signing protocol (NIP-46).
pub const NOSTR_CONNECT_KIND: u16 = 24133;

/// An unsigned event, the precursor handed to a signing capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTemplate {
    /// Unix timestamp in seconds.
    pub created_at: i64,
    /// Event kind.
    pub kind: u16,
    /// Tag list; each tag is a list of strings, first element is the name.
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    /// Event body. For protocol envelopes this is ciphertext.
    pub content: String,
}

impl EventTemplate {
    /// Create a template with the given kind and content, no tags.
    pub fn new(created_at: i64, kind: u16, content: impl Into<String>) -> Self {
        Self {
            created_at,
            kind,
            tags: Vec::new(),
            content: content.into(),
        }
    }

    /// Append a tag.
    pub fn tag(mut self, parts: Vec<String>) -> Self {
        self.tags.push(parts);
        self
    }
}

/// A signed event, immutable once signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEvent {
    /// Deterministic content address of the canonical fields.
    pub id: EventId,
    /// Author's x-only public key.
    pub pubkey: PublicKey,
    /// Unix timestamp in seconds.
    pub created_at: i64,
    /// Event kind.
    pub kind: u16,
    /// Tag list.
    pub tags: Vec<Vec<String>>,
    /// Event body.
    pub content: String,
    /// Hex-encoded BIP-340 Schnorr signature over `id`.
    pub sig: String,
}

/// Compute the canonical JSON bytes an event id is derived from.
pub fn canonical_bytes(pubkey: &PublicKey, template: &EventTemplate) -> Result<Vec<u8>> {
    let value = serde_json::json!([
        0,
        pubkey.to_hex(),
        template.created_at,
        template.kind,
        template.tags,
        template.content,
    ]);
    serde_json::to_vec(&value).map_err(|e| CoreError::Serialization(e.to_string()))
}

/// Compute the deterministic event id for a template authored by `pubkey`.
pub fn compute_event_id(pubkey: &PublicKey, template: &EventTemplate) -> Result<EventId> {
    let bytes = canonical_bytes(pubkey, template)?;
    let digest = Sha256::digest(&bytes);
    Ok(EventId::from_bytes(digest.into()))
}

impl SignedEvent {
    /// Recompute the id from the canonical fields.
    pub fn compute_id(&self) -> Result<EventId> {
        let template = EventTemplate {
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags.clone(),
            content: self.content.clone(),
        };
        compute_event_id(&self.pubkey, &template)
    }

    /// Verify that the id matches the canonical fields and that the
    /// signature binds the id to the author.
    pub fn verify(&self) -> Result<()> {
        use k256::schnorr::signature::Verifier;
        use k256::schnorr::{Signature, VerifyingKey};

        if self.compute_id()? != self.id {
            return Err(CoreError::InvalidSignature(
                "event id does not match canonical fields".into(),
            ));
        }

        let verifying_key = VerifyingKey::from_bytes(&self.pubkey.0)
            .map_err(|e| CoreError::InvalidKey(format!("bad author key: {e}")))?;
        let sig_bytes = hex::decode(&self.sig)?;
        let signature = Signature::try_from(sig_bytes.as_slice())
            .map_err(|e| CoreError::InvalidSignature(format!("bad signature encoding: {e}")))?;

        verifying_key
            .verify(&self.id.0, &signature)
            .map_err(|e| CoreError::InvalidSignature(format!("verification failed: {e}")))
    }

    /// First value of the first tag with the given name.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.first().map(String::as_str) == Some(name))
            .and_then(|t| t.get(1))
            .map(String::as_str)
    }

    /// The recipient named by the `p` tag, if present and valid.
    pub fn recipient(&self) -> Option<PublicKey> {
        self.tag_value("p").and_then(|v| PublicKey::from_hex(v).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keys;

    fn template() -> EventTemplate {
        EventTemplate::new(1_700_000_000, NOSTR_CONNECT_KIND, "ciphertext")
            .tag(vec!["p".into(), "ab".repeat(32)])
    }

    #[test]
    fn test_event_id_is_deterministic() {
        let pk = PublicKey::from_bytes([7; 32]);
        assert_eq!(
            compute_event_id(&pk, &template()).unwrap(),
            compute_event_id(&pk, &template()).unwrap()
        );
    }

    #[test]
    fn test_event_id_depends_on_content() {
        let pk = PublicKey::from_bytes([7; 32]);
        let mut other = template();
        other.content = "different".into();
        assert_ne!(
            compute_event_id(&pk, &template()).unwrap(),
            compute_event_id(&pk, &other).unwrap()
        );
    }

    #[test]
    fn test_sign_and_verify() {
        let keys = Keys::generate();
        let event = keys.sign_template(template()).unwrap();
        assert_eq!(event.pubkey, keys.public_key());
        assert_eq!(event.id, event.compute_id().unwrap());
        event.verify().unwrap();
    }

    #[test]
    fn test_tampered_event_fails_verification() {
        let keys = Keys::generate();
        let mut event = keys.sign_template(template()).unwrap();
        event.content = "forged".into();
        assert!(event.verify().is_err());
    }

    #[test]
    fn test_recipient_from_p_tag() {
        let keys = Keys::generate();
        let event = keys.sign_template(template()).unwrap();
        assert_eq!(event.recipient(), Some(PublicKey::from_bytes([0xab; 32])));
    }

    #[test]
    fn test_event_json_roundtrip() {
        let keys = Keys::generate();
        let event = keys.sign_template(template()).unwrap();
        let json = serde_json::to_string(&event).unwrap();
        let back: SignedEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
        back.verify().unwrap();
    }
}
