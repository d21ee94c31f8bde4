//! Sealing and opening protocol envelopes.
//!
//! An envelope is a kind-24133 event whose content is the encrypted JSON of
//! one protocol message, addressed by a `p` tag. Sealing signs for the local
//! identity; opening verifies the author's signature before decrypting.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bunker_core::{EventTemplate, Message, PublicKey, SignedEvent, NOSTR_CONNECT_KIND};

use crate::error::{Result, TransportError};
use crate::signer::{CipherScheme, Signer};

/// An opened envelope.
///
/// Carries the scheme the peer used so the reply can be sealed with the
/// same one.
#[derive(Debug, Clone)]
pub struct Incoming {
    /// The verified envelope as it arrived.
    pub event: SignedEvent,
    /// The decrypted, validated message.
    pub message: Message,
    /// Cipher scheme the peer used.
    pub scheme: CipherScheme,
}

impl Incoming {
    /// The envelope author.
    pub fn peer(&self) -> PublicKey {
        self.event.pubkey
    }
}

/// Turns messages into signed envelopes and back.
#[derive(Clone)]
pub struct EnvelopeCodec {
    signer: Arc<dyn Signer>,
    local: PublicKey,
}

impl EnvelopeCodec {
    pub fn new(signer: Arc<dyn Signer>, local: PublicKey) -> Self {
        Self { signer, local }
    }

    /// The identity envelopes are sealed as.
    pub fn local_key(&self) -> PublicKey {
        self.local
    }

    /// Seal a message into a signed envelope for `recipient`.
    ///
    /// The envelope is stamped with the current time unless `created_at`
    /// overrides it.
    pub async fn seal(
        &self,
        message: &Message,
        recipient: &PublicKey,
        scheme: CipherScheme,
        created_at: Option<i64>,
    ) -> Result<SignedEvent> {
        let payload = message.to_json()?;
        let ciphertext = self.signer.encrypt(recipient, &payload, scheme).await?;
        let stamp = created_at.unwrap_or_else(unix_now);
        let template = EventTemplate::new(stamp, NOSTR_CONNECT_KIND, ciphertext)
            .tag(vec!["p".into(), recipient.to_hex()]);
        self.signer.sign_event(template).await
    }

    /// Open an inbound envelope.
    ///
    /// Envelopes authored by the local identity are rejected as [`Echo`]
    /// before any crypto work. The author's signature is verified before the
    /// content is trusted enough to decrypt.
    ///
    /// [`Echo`]: TransportError::Echo
    pub async fn open(&self, event: SignedEvent) -> Result<Incoming> {
        if event.pubkey == self.local {
            return Err(TransportError::Echo);
        }
        event.verify()?;

        let scheme = CipherScheme::detect(&event.content);
        let plaintext = self.signer.decrypt(&event.pubkey, &event.content).await?;
        let message = Message::parse(&plaintext)?;

        Ok(Incoming {
            event,
            message,
            scheme,
        })
    }
}

/// Current Unix timestamp in seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalSigner;
    use bunker_core::{method, RequestMessage};

    fn codec(signer: LocalSigner) -> EnvelopeCodec {
        let local = signer.public_key();
        EnvelopeCodec::new(Arc::new(signer), local)
    }

    #[tokio::test]
    async fn test_seal_open_roundtrip() {
        let alice = codec(LocalSigner::generate().unwrap());
        let bob = codec(LocalSigner::generate().unwrap());

        let request = Message::Request(RequestMessage::new(method::PING, vec![]));
        let envelope = alice
            .seal(&request, &bob.local_key(), CipherScheme::Nip44, None)
            .await
            .unwrap();

        assert_eq!(envelope.kind, NOSTR_CONNECT_KIND);
        assert_eq!(envelope.recipient(), Some(bob.local_key()));
        assert_ne!(envelope.content, request.to_json().unwrap());

        let incoming = bob.open(envelope).await.unwrap();
        assert_eq!(incoming.message, request);
        assert_eq!(incoming.peer(), alice.local_key());
        assert_eq!(incoming.scheme, CipherScheme::Nip44);
    }

    #[tokio::test]
    async fn test_seal_honors_supplied_timestamp() {
        let alice = codec(LocalSigner::generate().unwrap());
        let bob = codec(LocalSigner::generate().unwrap());

        let request = Message::Request(RequestMessage::new(method::PING, vec![]));
        let envelope = alice
            .seal(
                &request,
                &bob.local_key(),
                CipherScheme::Nip44,
                Some(1_234_567),
            )
            .await
            .unwrap();

        assert_eq!(envelope.created_at, 1_234_567);
        envelope.verify().unwrap();
        assert_eq!(bob.open(envelope).await.unwrap().message, request);
    }

    #[tokio::test]
    async fn test_legacy_scheme_detected_on_open() {
        let alice = codec(LocalSigner::generate().unwrap());
        let bob = codec(LocalSigner::generate().unwrap());

        let request = Message::Request(RequestMessage::new(method::GET_PUBLIC_KEY, vec![]));
        let envelope = alice
            .seal(&request, &bob.local_key(), CipherScheme::Nip04, None)
            .await
            .unwrap();

        let incoming = bob.open(envelope).await.unwrap();
        assert_eq!(incoming.scheme, CipherScheme::Nip04);
        assert_eq!(incoming.message, request);
    }

    #[tokio::test]
    async fn test_own_envelope_is_echo() {
        let alice = codec(LocalSigner::generate().unwrap());
        let bob_key = LocalSigner::generate().unwrap().public_key();

        let request = Message::Request(RequestMessage::new(method::PING, vec![]));
        let envelope = alice
            .seal(&request, &bob_key, CipherScheme::Nip44, None)
            .await
            .unwrap();

        assert!(matches!(
            alice.open(envelope).await,
            Err(TransportError::Echo)
        ));
    }

    #[tokio::test]
    async fn test_tampered_envelope_rejected() {
        let alice = codec(LocalSigner::generate().unwrap());
        let bob = codec(LocalSigner::generate().unwrap());

        let request = Message::Request(RequestMessage::new(method::PING, vec![]));
        let mut envelope = alice
            .seal(&request, &bob.local_key(), CipherScheme::Nip44, None)
            .await
            .unwrap();
        envelope.content.push('x');

        assert!(matches!(
            bob.open(envelope).await,
            Err(TransportError::Core(_))
        ));
    }

    #[tokio::test]
    async fn test_garbage_ciphertext_rejected() {
        let alice = LocalSigner::generate().unwrap();
        let bob = codec(LocalSigner::generate().unwrap());

        // Properly signed envelope whose content is not valid ciphertext.
        let template = EventTemplate::new(unix_now(), NOSTR_CONNECT_KIND, "not ciphertext")
            .tag(vec!["p".into(), bob.local_key().to_hex()]);
        let envelope = alice.sign_event(template).await.unwrap();

        assert!(matches!(
            bob.open(envelope).await,
            Err(TransportError::Decryption(_))
        ));
    }
}
