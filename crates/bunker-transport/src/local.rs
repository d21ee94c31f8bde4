//! In-memory signing capability.

use async_trait::async_trait;
use nostr::nips::{nip04, nip44};

use bunker_core::{EventTemplate, Keys, PublicKey, SignedEvent};

use crate::error::{Result, TransportError};
use crate::signer::{CipherScheme, Signer};

/// A [`Signer`] holding its keypair in process memory.
///
/// Pairs the Schnorr keypair with the secp256k1 ECDH material the payload
/// ciphers need. Both are derived from the same 32-byte secret.
pub struct LocalSigner {
    keys: Keys,
    secret: nostr::SecretKey,
}

impl LocalSigner {
    /// Build a signer from an existing keypair.
    pub fn new(keys: Keys) -> Result<Self> {
        let secret = nostr::SecretKey::from_hex(keys.secret_hex())
            .map_err(|e| TransportError::Signing(format!("bad secret key: {e}")))?;
        Ok(Self { keys, secret })
    }

    /// Generate a fresh identity.
    pub fn generate() -> Result<Self> {
        Self::new(Keys::generate())
    }

    /// Restore a signer from a hex-encoded secret.
    pub fn from_secret_hex(secret: &str) -> Result<Self> {
        Self::new(Keys::from_secret_hex(secret)?)
    }

    /// The identity public key.
    pub fn public_key(&self) -> PublicKey {
        self.keys.public_key()
    }

    fn peer_key(&self, peer: &PublicKey) -> Result<nostr::PublicKey> {
        nostr::PublicKey::from_hex(peer.to_hex())
            .map_err(|e| TransportError::Encryption(format!("bad peer key: {e}")))
    }
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LocalSigner({})", self.keys.public_key())
    }
}

#[async_trait]
impl Signer for LocalSigner {
    async fn get_public_key(&self) -> Result<PublicKey> {
        Ok(self.keys.public_key())
    }

    async fn sign_event(&self, template: EventTemplate) -> Result<SignedEvent> {
        Ok(self.keys.sign_template(template)?)
    }

    async fn encrypt(
        &self,
        peer: &PublicKey,
        plaintext: &str,
        scheme: CipherScheme,
    ) -> Result<String> {
        let peer = self.peer_key(peer)?;
        match scheme {
            CipherScheme::Nip04 => nip04::encrypt(&self.secret, &peer, plaintext)
                .map_err(|e| TransportError::Encryption(e.to_string())),
            CipherScheme::Nip44 => {
                nip44::encrypt(&self.secret, &peer, plaintext, nip44::Version::V2)
                    .map_err(|e| TransportError::Encryption(e.to_string()))
            }
        }
    }

    async fn decrypt(&self, peer: &PublicKey, ciphertext: &str) -> Result<String> {
        let peer = self.peer_key(peer)?;
        match CipherScheme::detect(ciphertext) {
            CipherScheme::Nip04 => nip04::decrypt(&self.secret, &peer, ciphertext)
                .map_err(|e| TransportError::Decryption(e.to_string())),
            CipherScheme::Nip44 => nip44::decrypt(&self.secret, &peer, ciphertext)
                .map_err(|e| TransportError::Decryption(e.to_string())),
        }
    }
}
