//! End-to-end engine behavior over the in-memory relay network.
//!
//! Each test runs a real engine and a hand-rolled remote socket on the same
//! network, so every assertion crosses the full seal/publish/open path.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use bunker::core::{method, Message, PublicKey, RequestMessage, SignedEvent};
use bunker::transport::{
    CipherScheme, EnvelopeCodec, Incoming, LocalSigner, MemoryRelayNetwork, Socket, SocketConfig,
    TransportError,
};
use bunker::{
    Engine, EngineConfig, PermissionPolicy, Profile, QueueEvent, SessionEvent, SessionToken,
    REASON_TIMEOUT,
};

const RELAY: &str = "wss://relay.test";

fn config() -> EngineConfig {
    EngineConfig {
        relays: vec![RELAY.into()],
        request_timeout: Duration::from_millis(250),
        invite_timeout: Duration::from_millis(250),
        pending_session_timeout: Duration::from_millis(250),
        subscribe_timeout: Duration::from_millis(500),
        default_policy: PermissionPolicy::default(),
    }
}

struct Remote {
    socket: Arc<Socket>,
    _inbound: mpsc::Receiver<Incoming>,
}

impl Remote {
    async fn on(network: &Arc<MemoryRelayNetwork>) -> Self {
        let signer = Arc::new(LocalSigner::generate().unwrap());
        let codec = EnvelopeCodec::new(signer.clone(), signer.public_key());
        let (socket, inbound) = Socket::new(
            codec,
            network.clone(),
            SocketConfig {
                subscribe_timeout: Duration::from_millis(500),
                request_timeout: Duration::from_secs(2),
            },
        );
        socket.subscribe(&[RELAY.to_string()]).await.unwrap();
        Self {
            socket,
            _inbound: inbound,
        }
    }

    fn pubkey(&self) -> PublicKey {
        self.socket.local_key()
    }

    async fn request(&self, bunker: &PublicKey, name: &str, params: Vec<String>) -> Message {
        self.socket
            .request(
                RequestMessage::new(name, params),
                bunker,
                CipherScheme::Nip44,
                None,
            )
            .await
            .unwrap()
    }

    async fn request_short(
        &self,
        bunker: &PublicKey,
        name: &str,
        params: Vec<String>,
    ) -> Result<Message, TransportError> {
        self.socket
            .request(
                RequestMessage::new(name, params),
                bunker,
                CipherScheme::Nip44,
                Some(Duration::from_millis(300)),
            )
            .await
    }
}

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

async fn engine_on(network: &Arc<MemoryRelayNetwork>) -> Arc<Engine> {
    init_logging();
    let signer = Arc::new(LocalSigner::generate().unwrap());
    Engine::start(signer, network.clone(), config())
        .await
        .unwrap()
}

fn session_for(remote: &Remote, policy: PermissionPolicy) -> SessionToken {
    SessionToken {
        pubkey: remote.pubkey(),
        relays: vec![RELAY.into()],
        policy,
        profile: Profile::default(),
        created_at: 0,
    }
}

fn sign_params(kind: u16) -> Vec<String> {
    vec![format!(
        r#"{{"created_at":1700000000,"kind":{kind},"tags":[],"content":"note"}}"#
    )]
}

#[tokio::test]
async fn test_unknown_peer_connect_is_ignored() {
    let network = MemoryRelayNetwork::new([RELAY]);
    let engine = engine_on(&network).await;
    let remote = Remote::on(&network).await;
    let bunker = engine.local_key();

    // No pending entry: the engine stays silent, the request times out.
    let result = remote
        .request_short(&bunker, method::CONNECT, vec![bunker.to_hex()])
        .await;
    assert!(matches!(result, Err(TransportError::RequestTimeout)));

    // After registration the same message is answered and activates.
    engine.register_session(session_for(&remote, PermissionPolicy::default()));
    let mut sessions = engine.session_events();
    let response = remote
        .request(&bunker, method::CONNECT, vec![bunker.to_hex()])
        .await;
    match response {
        // The ack names the relays the session rides on.
        Message::Accept(accept) => assert_eq!(accept.result, format!("ack {RELAY}")),
        other => panic!("expected accept, got {:?}", other),
    }
    assert!(matches!(
        sessions.recv().await.unwrap(),
        SessionEvent::Activated(t) if t.pubkey == remote.pubkey()
    ));
    assert!(engine.session(&remote.pubkey()).is_some());
}

#[tokio::test]
async fn test_get_public_key_activates_and_answers_identity() {
    let network = MemoryRelayNetwork::new([RELAY]);
    let engine = engine_on(&network).await;
    let remote = Remote::on(&network).await;

    engine.register_session(session_for(&remote, PermissionPolicy::default()));
    let response = remote
        .request(&engine.local_key(), method::GET_PUBLIC_KEY, vec![])
        .await;
    match response {
        Message::Accept(accept) => assert_eq!(accept.result, engine.local_key().to_hex()),
        other => panic!("expected accept, got {:?}", other),
    }
    assert!(engine.session(&remote.pubkey()).is_some());
}

#[tokio::test]
async fn test_unsupported_method_from_known_peer_rejected() {
    let network = MemoryRelayNetwork::new([RELAY]);
    let engine = engine_on(&network).await;
    let remote = Remote::on(&network).await;

    engine.register_session(session_for(&remote, PermissionPolicy::default()));
    remote
        .request(&engine.local_key(), method::CONNECT, vec![])
        .await;

    let response = remote
        .request(&engine.local_key(), "frobnicate", vec![])
        .await;
    match response {
        Message::Reject(reject) => assert_eq!(reject.error, "invalid_method"),
        other => panic!("expected reject, got {:?}", other),
    }

    // The same nonsense from a stranger gets silence, not a reject.
    let stranger = Remote::on(&network).await;
    assert!(matches!(
        stranger
            .request_short(&engine.local_key(), "frobnicate", vec![])
            .await,
        Err(TransportError::RequestTimeout)
    ));
}

#[tokio::test]
async fn test_allowed_kind_signs_without_prompt() {
    let network = MemoryRelayNetwork::new([RELAY]);
    let engine = engine_on(&network).await;
    let remote = Remote::on(&network).await;

    engine.register_session(session_for(
        &remote,
        PermissionPolicy::default().allow_kind(1),
    ));
    remote
        .request(&engine.local_key(), method::CONNECT, vec![])
        .await;

    let mut queue = engine.queue_events();
    let response = remote
        .request(&engine.local_key(), method::SIGN_EVENT, sign_params(1))
        .await;

    match response {
        Message::Accept(accept) => {
            let signed: SignedEvent = serde_json::from_str(&accept.result).unwrap();
            assert_eq!(signed.kind, 1);
            assert_eq!(signed.pubkey, engine.local_key());
            signed.verify().unwrap();
        }
        other => panic!("expected accept, got {:?}", other),
    }

    // Approved, never prompted.
    assert!(matches!(
        queue.recv().await.unwrap(),
        QueueEvent::Approved(_)
    ));
    assert!(queue.try_recv().is_err());
}

#[tokio::test]
async fn test_ask_prompts_then_reject_answers_once() {
    let network = MemoryRelayNetwork::new([RELAY]);
    let engine = engine_on(&network).await;
    let remote = Remote::on(&network).await;

    engine.register_session(session_for(&remote, PermissionPolicy::default()));
    remote
        .request(&engine.local_key(), method::CONNECT, vec![])
        .await;

    let mut queue = engine.queue_events();
    let bunker = engine.local_key();
    let requester = tokio::spawn({
        let socket = remote.socket.clone();
        async move {
            socket
                .request(
                    RequestMessage::new(method::SIGN_EVENT, sign_params(1)),
                    &bunker,
                    CipherScheme::Nip44,
                    None,
                )
                .await
        }
    });

    let prompted = match queue.recv().await.unwrap() {
        QueueEvent::Prompt(request) => request,
        other => panic!("expected prompt, got {:?}", other),
    };
    assert_eq!(prompted.session, remote.pubkey());
    assert_eq!(engine.requests().len(), 1);

    engine.reject(&prompted.id, "denied by user", None).await.unwrap();
    match requester.await.unwrap().unwrap() {
        Message::Reject(reject) => assert_eq!(reject.error, "denied by user"),
        other => panic!("expected reject, got {:?}", other),
    }

    // Exactly one terminal event; the entry is gone.
    assert!(matches!(
        queue.recv().await.unwrap(),
        QueueEvent::Denied { reason, .. } if reason == "denied by user"
    ));
    assert!(engine.requests().is_empty());
    assert!(engine.reject(&prompted.id, "again", None).await.is_err());
    assert!(queue.try_recv().is_err());
}

#[tokio::test]
async fn test_undecided_request_times_out_with_reject() {
    let network = MemoryRelayNetwork::new([RELAY]);
    let engine = engine_on(&network).await;
    let remote = Remote::on(&network).await;

    engine.register_session(session_for(&remote, PermissionPolicy::default()));
    remote
        .request(&engine.local_key(), method::CONNECT, vec![])
        .await;

    // Nobody decides; the queue timer answers for us.
    let response = remote
        .request(&engine.local_key(), method::SIGN_EVENT, sign_params(1))
        .await;
    match response {
        Message::Reject(reject) => assert_eq!(reject.error, REASON_TIMEOUT),
        other => panic!("expected reject, got {:?}", other),
    }
    assert!(engine.requests().is_empty());
}

#[tokio::test]
async fn test_pending_peer_cannot_use_session_methods() {
    let network = MemoryRelayNetwork::new([RELAY]);
    let engine = engine_on(&network).await;
    let remote = Remote::on(&network).await;

    // Registered but never activated: session methods are ignored.
    engine.register_session(session_for(
        &remote,
        PermissionPolicy::default().allow_kind(1),
    ));
    assert!(matches!(
        remote
            .request_short(&engine.local_key(), method::SIGN_EVENT, sign_params(1))
            .await,
        Err(TransportError::RequestTimeout)
    ));
}

#[tokio::test]
async fn test_policy_deny_is_rejected_immediately() {
    let network = MemoryRelayNetwork::new([RELAY]);
    let engine = engine_on(&network).await;
    let remote = Remote::on(&network).await;

    engine.register_session(session_for(
        &remote,
        PermissionPolicy::default().deny_method(method::NIP04_DECRYPT),
    ));
    remote
        .request(&engine.local_key(), method::CONNECT, vec![])
        .await;

    let counterparty = LocalSigner::generate().unwrap();
    let response = remote
        .request(
            &engine.local_key(),
            method::NIP04_DECRYPT,
            vec![counterparty.public_key().to_hex(), "abc?iv=def".into()],
        )
        .await;
    match response {
        Message::Reject(reject) => assert_eq!(reject.error, bunker::REASON_POLICY),
        other => panic!("expected reject, got {:?}", other),
    }
    assert!(engine.requests().is_empty());
}

#[tokio::test]
async fn test_ping_answered_for_anyone() {
    let network = MemoryRelayNetwork::new([RELAY]);
    let engine = engine_on(&network).await;
    let remote = Remote::on(&network).await;

    // Liveness checks bypass sessions entirely.
    assert!(remote
        .socket
        .ping(&engine.local_key(), CipherScheme::Nip44)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_engine_pings_a_peer() {
    let network = MemoryRelayNetwork::new([RELAY]);
    let engine = engine_on(&network).await;
    let remote = Remote::on(&network).await;

    assert!(engine.ping(&remote.pubkey()).await.unwrap());
    let silent = LocalSigner::generate().unwrap().public_key();
    assert!(!engine.ping(&silent).await.unwrap());
}

#[tokio::test]
async fn test_register_peer_applies_default_policy() {
    init_logging();
    let network = MemoryRelayNetwork::new([RELAY]);
    let remote = Remote::on(&network).await;
    let signer = Arc::new(LocalSigner::generate().unwrap());
    let engine = Engine::start(
        signer,
        network.clone(),
        EngineConfig {
            default_policy: PermissionPolicy::default().allow_kind(1),
            ..config()
        },
    )
    .await
    .unwrap();

    engine.register_peer(remote.pubkey());
    remote
        .request(&engine.local_key(), method::CONNECT, vec![])
        .await;

    let response = remote
        .request(&engine.local_key(), method::SIGN_EVENT, sign_params(1))
        .await;
    assert!(matches!(response, Message::Accept(_)));
}

#[tokio::test]
async fn test_revoked_peer_loses_access() {
    let network = MemoryRelayNetwork::new([RELAY]);
    let engine = engine_on(&network).await;
    let remote = Remote::on(&network).await;

    engine.register_session(session_for(
        &remote,
        PermissionPolicy::default().allow_kind(1),
    ));
    remote
        .request(&engine.local_key(), method::CONNECT, vec![])
        .await;
    engine.revoke_session(&remote.pubkey());

    assert!(matches!(
        remote
            .request_short(&engine.local_key(), method::SIGN_EVENT, sign_params(1))
            .await,
        Err(TransportError::RequestTimeout)
    ));
}
