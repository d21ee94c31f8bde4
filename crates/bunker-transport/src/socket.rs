//! The protocol socket: subscription lifecycle and request/response
//! correlation on top of the envelope codec and a relay pool.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use bunker_core::{method, Message, PublicKey, RequestMessage, NOSTR_CONNECT_KIND};

use crate::codec::{EnvelopeCodec, Incoming};
use crate::error::{Result, TransportError};
use crate::relay::{PublishReceipt, RelayPool, SubscribeFilter};
use crate::signer::CipherScheme;

/// Socket timing knobs. No defaults; the caller decides.
#[derive(Debug, Clone, Copy)]
pub struct SocketConfig {
    /// How long `subscribe` waits for the subscription to report live.
    pub subscribe_timeout: Duration,
    /// Default wait for a terminal response in `request`.
    pub request_timeout: Duration,
}

/// A live protocol endpoint.
///
/// Inbound requests (other than `ping`, answered inline) come out of the
/// receiver returned by [`Socket::new`]. Responses are routed to the waiter
/// registered under their id; unsolicited responses are forwarded on the
/// same receiver, since an unsolicited accept may be claiming an open
/// invite.
pub struct Socket {
    codec: EnvelopeCodec,
    pool: Arc<dyn RelayPool>,
    config: SocketConfig,
    relays: RwLock<Vec<String>>,
    ready: AtomicBool,
    waiters: Mutex<HashMap<String, oneshot::Sender<Message>>>,
    inbound: mpsc::Sender<Incoming>,
    /// The task draining the current subscription's sink. Exactly one is
    /// alive at a time; re-subscribing replaces it.
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Socket {
    /// Build a socket. The returned receiver yields inbound requests once
    /// [`subscribe`](Socket::subscribe) has completed.
    pub fn new(
        codec: EnvelopeCodec,
        pool: Arc<dyn RelayPool>,
        config: SocketConfig,
    ) -> (Arc<Self>, mpsc::Receiver<Incoming>) {
        let (inbound, rx) = mpsc::channel(64);
        let socket = Arc::new(Self {
            codec,
            pool,
            config,
            relays: RwLock::new(Vec::new()),
            ready: AtomicBool::new(false),
            waiters: Mutex::new(HashMap::new()),
            inbound,
            pump: Mutex::new(None),
        });
        (socket, rx)
    }

    /// The identity this socket speaks as.
    pub fn local_key(&self) -> PublicKey {
        self.codec.local_key()
    }

    /// The current relay set.
    pub async fn relays(&self) -> Vec<String> {
        self.relays.read().await.clone()
    }

    /// Whether a live subscription exists.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Merge `relays` into the live set and (re)issue the subscription.
    ///
    /// Resolves once the pool reports the subscription live, or fails with
    /// [`SubscribeTimeout`](TransportError::SubscribeTimeout). The previous
    /// subscription's pump is stopped once the new one is live, so each
    /// inbound event is handled exactly once.
    pub async fn subscribe(self: &Arc<Self>, relays: &[String]) -> Result<()> {
        let merged = {
            let mut live = self.relays.write().await;
            for relay in relays {
                if !live.contains(relay) {
                    live.push(relay.clone());
                }
            }
            live.clone()
        };

        let filter = SubscribeFilter {
            kind: NOSTR_CONNECT_KIND,
            recipient: self.local_key(),
        };
        let (tx, mut rx) = mpsc::channel(64);
        tokio::time::timeout(
            self.config.subscribe_timeout,
            self.pool.subscribe(&merged, filter, tx),
        )
        .await
        .map_err(|_| TransportError::SubscribeTimeout)??;

        let socket = Arc::clone(self);
        let pump = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match socket.codec.open(event).await {
                    Ok(incoming) => socket.dispatch(incoming).await,
                    // Own envelopes come back from shared relays; not a fault.
                    Err(TransportError::Echo) => {}
                    Err(e) => warn!(error = %e, "dropping undecodable envelope"),
                }
            }
        });
        let old = self
            .pump
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(pump);
        if let Some(old) = old {
            old.abort();
        }

        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    async fn dispatch(&self, incoming: Incoming) {
        match &incoming.message {
            Message::Request(req) if req.method == method::PING => {
                let pong = req.accept("pong");
                if let Err(e) = self
                    .send(&pong, &incoming.peer(), incoming.scheme, None)
                    .await
                {
                    warn!(error = %e, "failed to answer ping");
                }
            }
            Message::Request(_) => {
                if self.inbound.send(incoming).await.is_err() {
                    debug!("inbound receiver dropped");
                }
            }
            response => {
                let id = response.id().to_string();
                let waiter = self.waiters.lock().unwrap_or_else(|e| e.into_inner()).remove(&id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(incoming.message);
                    }
                    None => {
                        // An unsolicited accept may carry an invite secret;
                        // the engine decides, not the socket.
                        debug!(%id, "response without outstanding waiter, forwarding");
                        if self.inbound.send(incoming).await.is_err() {
                            debug!("inbound receiver dropped");
                        }
                    }
                }
            }
        }
    }

    /// Seal and publish a message. Best-effort broadcast: succeeds if any
    /// relay accepts.
    pub async fn send(
        &self,
        message: &Message,
        recipient: &PublicKey,
        scheme: CipherScheme,
        relays: Option<&[String]>,
    ) -> Result<PublishReceipt> {
        if !self.is_ready() {
            return Err(TransportError::NotReady);
        }
        let envelope = self.codec.seal(message, recipient, scheme, None).await?;
        let targets = match relays {
            Some(r) => r.to_vec(),
            None => self.relays().await,
        };
        self.pool.publish(&targets, &envelope).await
    }

    /// Send a request and wait for its terminal response.
    ///
    /// At most one waiter per id; registering again for the same id replaces
    /// the earlier waiter. A response arriving after resolution is dropped.
    pub async fn request(
        &self,
        request: RequestMessage,
        recipient: &PublicKey,
        scheme: CipherScheme,
        timeout: Option<Duration>,
    ) -> Result<Message> {
        let id = request.id.clone();
        let (tx, rx) = oneshot::channel();
        self.waiters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), tx);

        let message = Message::Request(request);
        if let Err(e) = self.send(&message, recipient, scheme, None).await {
            self.remove_waiter(&id);
            return Err(e);
        }

        let wait = timeout.unwrap_or(self.config.request_timeout);
        match tokio::time::timeout(wait, rx).await {
            Ok(Ok(response)) => Ok(response),
            // Closed sender means the waiter was replaced; same outcome.
            Ok(Err(_)) => Err(TransportError::RequestTimeout),
            Err(_) => {
                self.remove_waiter(&id);
                Err(TransportError::RequestTimeout)
            }
        }
    }

    /// Liveness check: a `ping` request whose acceptance means alive.
    pub async fn ping(&self, recipient: &PublicKey, scheme: CipherScheme) -> Result<bool> {
        let request = RequestMessage::new(method::PING, vec![]);
        match self.request(request, recipient, scheme, None).await {
            Ok(Message::Accept(_)) => Ok(true),
            Ok(_) => Ok(false),
            Err(TransportError::RequestTimeout) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn remove_waiter(&self, id: &str) {
        self.waiters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalSigner;
    use crate::relay::memory::MemoryRelayNetwork;
    use async_trait::async_trait;
    use bunker_core::SignedEvent;

    const RELAY: &str = "wss://relay.test";

    fn config() -> SocketConfig {
        SocketConfig {
            subscribe_timeout: Duration::from_millis(200),
            request_timeout: Duration::from_millis(200),
        }
    }

    async fn socket_on(
        network: &Arc<MemoryRelayNetwork>,
    ) -> (Arc<Socket>, mpsc::Receiver<Incoming>) {
        let signer = LocalSigner::generate().unwrap();
        let local = signer.public_key();
        let codec = EnvelopeCodec::new(Arc::new(signer), local);
        let (socket, rx) = Socket::new(codec, network.clone(), config());
        socket.subscribe(&[RELAY.to_string()]).await.unwrap();
        (socket, rx)
    }

    #[tokio::test]
    async fn test_send_before_subscribe_is_not_ready() {
        let network = MemoryRelayNetwork::new([RELAY]);
        let signer = LocalSigner::generate().unwrap();
        let local = signer.public_key();
        let codec = EnvelopeCodec::new(Arc::new(signer), local);
        let (socket, _rx) = Socket::new(codec, network, config());

        let peer = LocalSigner::generate().unwrap().public_key();
        let message = Message::Request(RequestMessage::new(method::PING, vec![]));
        assert!(matches!(
            socket.send(&message, &peer, CipherScheme::Nip44, None).await,
            Err(TransportError::NotReady)
        ));
    }

    #[tokio::test]
    async fn test_request_resolved_by_peer_response() {
        let network = MemoryRelayNetwork::new([RELAY]);
        let (client, _client_rx) = socket_on(&network).await;
        let (server, mut server_rx) = socket_on(&network).await;

        let server_clone = Arc::clone(&server);
        tokio::spawn(async move {
            let incoming = server_rx.recv().await.unwrap();
            let Message::Request(req) = &incoming.message else {
                panic!("expected request");
            };
            let reply = req.accept("done");
            server_clone
                .send(&reply, &incoming.peer(), incoming.scheme, None)
                .await
                .unwrap();
        });

        let request = RequestMessage::new(method::GET_PUBLIC_KEY, vec![]);
        let response = client
            .request(request, &server.local_key(), CipherScheme::Nip44, None)
            .await
            .unwrap();
        match response {
            Message::Accept(accept) => assert_eq!(accept.result, "done"),
            other => panic!("expected accept, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_request_times_out_without_response() {
        let network = MemoryRelayNetwork::new([RELAY]);
        let (client, _client_rx) = socket_on(&network).await;
        let (server, _server_rx) = socket_on(&network).await;

        let request = RequestMessage::new(method::GET_PUBLIC_KEY, vec![]);
        let result = client
            .request(
                request,
                &server.local_key(),
                CipherScheme::Nip44,
                Some(Duration::from_millis(50)),
            )
            .await;
        assert!(matches!(result, Err(TransportError::RequestTimeout)));
    }

    #[tokio::test]
    async fn test_ping_is_answered_inline() {
        let network = MemoryRelayNetwork::new([RELAY]);
        let (client, _client_rx) = socket_on(&network).await;
        // Server never reads its inbound queue; pings are answered anyway.
        let (server, _server_rx) = socket_on(&network).await;

        assert!(client
            .ping(&server.local_key(), CipherScheme::Nip44)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_ping_false_when_peer_silent() {
        let network = MemoryRelayNetwork::new([RELAY]);
        let (client, _client_rx) = socket_on(&network).await;
        let silent = LocalSigner::generate().unwrap().public_key();

        assert!(!client.ping(&silent, CipherScheme::Nip44).await.unwrap());
    }

    #[tokio::test]
    async fn test_resubscribe_delivers_each_event_once() {
        let second = "wss://relay-b.test";
        let network = MemoryRelayNetwork::new([RELAY, second]);
        let (client, _client_rx) = socket_on(&network).await;
        let (server, mut server_rx) = socket_on(&network).await;

        // Merging another relay must not leave the first subscription's
        // pump running alongside the new one.
        server.subscribe(&[second.to_string()]).await.unwrap();
        assert_eq!(server.relays().await.len(), 2);

        let message = Message::Request(RequestMessage::new(method::GET_PUBLIC_KEY, vec![]));
        client
            .send(&message, &server.local_key(), CipherScheme::Nip44, None)
            .await
            .unwrap();

        let incoming = server_rx.recv().await.unwrap();
        assert_eq!(incoming.message, message);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(server_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsolicited_response_is_forwarded() {
        let network = MemoryRelayNetwork::new([RELAY]);
        let (client, mut client_rx) = socket_on(&network).await;
        let (server, _server_rx) = socket_on(&network).await;

        let stray = Message::Accept(bunker_core::AcceptMessage {
            id: "no-such-request".into(),
            result: "invite-secret".into(),
        });
        server
            .send(&stray, &client.local_key(), CipherScheme::Nip44, None)
            .await
            .unwrap();

        let incoming = client_rx.recv().await.unwrap();
        assert_eq!(incoming.message, stray);
        assert_eq!(incoming.peer(), server.local_key());
    }

    struct StalledPool;

    #[async_trait]
    impl RelayPool for StalledPool {
        async fn publish(
            &self,
            _relays: &[String],
            _event: &SignedEvent,
        ) -> Result<PublishReceipt> {
            Ok(PublishReceipt::default())
        }

        async fn subscribe(
            &self,
            _relays: &[String],
            _filter: SubscribeFilter,
            _sink: mpsc::Sender<SignedEvent>,
        ) -> Result<()> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_subscribe_timeout() {
        let signer = LocalSigner::generate().unwrap();
        let local = signer.public_key();
        let codec = EnvelopeCodec::new(Arc::new(signer), local);
        let (socket, _rx) = Socket::new(codec, Arc::new(StalledPool), config());

        assert!(matches!(
            socket.subscribe(&[RELAY.to_string()]).await,
            Err(TransportError::SubscribeTimeout)
        ));
        assert!(!socket.is_ready());
    }
}
