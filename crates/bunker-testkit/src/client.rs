//! A scripted remote client.
//!
//! Plays the application side of the protocol against an engine under
//! test: returns invite secrets, answers (or refuses to answer) the
//! follow-up challenge, and issues requests.

use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;

use bunker_core::{method, AcceptMessage, EventTemplate, Message, PublicKey, RequestMessage};
use bunker_transport::{
    CipherScheme, EnvelopeCodec, LocalSigner, RelayPool, Result, Socket, SocketConfig,
};

/// What the client does with inbound `get_public_key` challenges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeBehavior {
    /// Answer with the client's own pubkey, completing invite joins.
    Answer,
    /// Stay silent, so joins must not resolve.
    Ignore,
}

/// A remote application talking to one engine.
pub struct RemoteClient {
    socket: Arc<Socket>,
    bunker: PublicKey,
}

impl RemoteClient {
    /// Connect a fresh client identity to the network and point it at the
    /// engine identified by `bunker`.
    pub async fn connect(
        pool: Arc<dyn RelayPool>,
        relays: &[String],
        bunker: PublicKey,
        behavior: ChallengeBehavior,
    ) -> Result<Self> {
        let signer = Arc::new(LocalSigner::generate()?);
        let codec = EnvelopeCodec::new(signer.clone(), signer.public_key());
        let (socket, mut inbound) = Socket::new(
            codec,
            pool,
            SocketConfig {
                subscribe_timeout: Duration::from_millis(500),
                request_timeout: Duration::from_secs(2),
            },
        );
        socket.subscribe(relays).await?;

        let responder = Arc::clone(&socket);
        let own = signer.public_key();
        tokio::spawn(async move {
            while let Some(incoming) = inbound.recv().await {
                let Message::Request(request) = &incoming.message else {
                    continue;
                };
                if behavior == ChallengeBehavior::Answer
                    && request.method == method::GET_PUBLIC_KEY
                {
                    let reply = request.accept(own.to_hex());
                    let _ = responder
                        .send(&reply, &incoming.peer(), incoming.scheme, None)
                        .await;
                }
            }
        });

        Ok(Self { socket, bunker })
    }

    /// The client's identity.
    pub fn pubkey(&self) -> PublicKey {
        self.socket.local_key()
    }

    /// Return an invite secret as an unsolicited accept.
    pub async fn accept_invite(&self, secret: &str) -> Result<()> {
        let accept = Message::Accept(AcceptMessage {
            id: fresh_id(),
            result: secret.to_string(),
        });
        self.socket
            .send(&accept, &self.bunker, CipherScheme::Nip44, None)
            .await?;
        Ok(())
    }

    /// Open the handshake, optionally proving a `bunker://` secret.
    pub async fn connect_to_bunker(&self, secret: Option<&str>) -> Result<Message> {
        let mut params = vec![self.bunker.to_hex()];
        if let Some(secret) = secret {
            params.push(secret.to_string());
        }
        self.request(method::CONNECT, params).await
    }

    /// Ask the engine for its identity.
    pub async fn get_public_key(&self) -> Result<Message> {
        self.request(method::GET_PUBLIC_KEY, vec![]).await
    }

    /// Ask the engine to sign a template.
    pub async fn sign_event(&self, template: &EventTemplate) -> Result<Message> {
        let raw = serde_json::to_string(template)
            .map_err(|e| bunker_core::CoreError::Serialization(e.to_string()))?;
        self.request(method::SIGN_EVENT, vec![raw]).await
    }

    /// Check the engine for liveness.
    pub async fn ping(&self) -> Result<bool> {
        self.socket.ping(&self.bunker, CipherScheme::Nip44).await
    }

    /// Issue an arbitrary request and wait for the terminal response.
    pub async fn request(&self, name: &str, params: Vec<String>) -> Result<Message> {
        self.socket
            .request(
                RequestMessage::new(name, params),
                &self.bunker,
                CipherScheme::Nip44,
                None,
            )
            .await
    }

    /// Issue a request with an explicit wait window.
    pub async fn request_with_timeout(
        &self,
        name: &str,
        params: Vec<String>,
        timeout: Duration,
    ) -> Result<Message> {
        self.socket
            .request(
                RequestMessage::new(name, params),
                &self.bunker,
                CipherScheme::Nip44,
                Some(timeout),
            )
            .await
    }
}

fn fresh_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
