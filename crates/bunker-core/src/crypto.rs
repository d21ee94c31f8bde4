//! Schnorr keys for event signing.
//!
//! Wraps secp256k1 BIP-340 signing with the crate's strong types. The
//! encryption side of the signing capability lives in the transport crate;
//! this module only covers identity and event signatures.

use k256::elliptic_curve::rand_core::OsRng;
use k256::schnorr::signature::Signer;
use k256::schnorr::{Signature, SigningKey};
use std::fmt;

use crate::error::{CoreError, Result};
use crate::event::{compute_event_id, EventTemplate, SignedEvent};
use crate::types::PublicKey;

/// A secp256k1 keypair for signing events.
#[derive(Clone)]
pub struct Keys {
    signing: SigningKey,
    public: PublicKey,
}

impl Keys {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        let signing = SigningKey::random(&mut OsRng);
        let public = PublicKey(signing.verifying_key().to_bytes().into());
        Self { signing, public }
    }

    /// Restore a keypair from a hex-encoded 32-byte secret.
    pub fn from_secret_hex(secret: &str) -> Result<Self> {
        let bytes = hex::decode(secret)?;
        let signing = SigningKey::from_bytes(&bytes)
            .map_err(|e| CoreError::InvalidKey(format!("bad secret key: {e}")))?;
        let public = PublicKey(signing.verifying_key().to_bytes().into());
        Ok(Self { signing, public })
    }

    /// The x-only public key.
    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    /// Hex encoding of the secret key.
    ///
    /// Needed to hand the same identity to an encryption capability; never
    /// logged or serialized by this crate.
    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing.to_bytes())
    }

    /// Sign a template, producing the finished event.
    pub fn sign_template(&self, template: EventTemplate) -> Result<SignedEvent> {
        let id = compute_event_id(&self.public, &template)?;
        let signature: Signature = self.signing.sign(&id.0);
        Ok(SignedEvent {
            id,
            pubkey: self.public,
            created_at: template.created_at,
            kind: template.kind,
            tags: template.tags,
            content: template.content,
            sig: hex::encode(signature.to_bytes()),
        })
    }
}

impl fmt::Debug for Keys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Secret material stays out of debug output.
        write!(f, "Keys({})", self.public)
    }
}
