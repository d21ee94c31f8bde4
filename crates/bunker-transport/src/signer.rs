//! The signing capability consumed by the engine.
//!
//! The engine never touches key material directly; everything it needs is
//! behind this trait, so a hardware signer or an out-of-process signer can
//! replace the in-memory one without touching the protocol code.

use async_trait::async_trait;

use bunker_core::{EventTemplate, PublicKey, SignedEvent};

use crate::error::Result;

/// Ciphertext schemes the protocol understands.
///
/// The scheme is never negotiated; it is recognized from the ciphertext
/// itself. The legacy scheme carries an explicit IV marker, the default one
/// does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherScheme {
    /// Legacy AES-CBC scheme (NIP-04), marked by `?iv=` in the ciphertext.
    Nip04,
    /// Default payload scheme (NIP-44 v2).
    Nip44,
}

impl CipherScheme {
    /// Select the decryption scheme for a ciphertext by its marker.
    pub fn detect(ciphertext: &str) -> Self {
        if ciphertext.contains("?iv=") {
            CipherScheme::Nip04
        } else {
            CipherScheme::Nip44
        }
    }
}

/// Opaque signing and encryption capability.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Signer: Send + Sync {
    /// The identity this capability signs as.
    async fn get_public_key(&self) -> Result<PublicKey>;

    /// Sign a template into a finished event.
    async fn sign_event(&self, template: EventTemplate) -> Result<SignedEvent>;

    /// Encrypt a payload to a peer using the given scheme.
    async fn encrypt(
        &self,
        peer: &PublicKey,
        plaintext: &str,
        scheme: CipherScheme,
    ) -> Result<String>;

    /// Decrypt a payload from a peer, selecting the scheme by marker.
    async fn decrypt(&self, peer: &PublicKey, ciphertext: &str) -> Result<String>;
}
