//! The engine facade: construction-time wiring and inbound dispatch.
//!
//! An [`Engine`] owns one socket, one session manager, one invite manager,
//! and one request queue, and routes every inbound message to exactly one of
//! them. Components never reach around each other; effects cross boundaries
//! as bus events or explicit calls made here.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use bunker_core::{method, AcceptMessage, Message, PublicKey, RequestMessage};
use bunker_perms::{
    encode_bunker, encode_invite, BunkerToken, InviteToken, PermissionPolicy, Profile,
    SessionToken,
};
use bunker_transport::{
    unix_now, CipherScheme, EnvelopeCodec, Incoming, RelayPool, Signer, Socket,
};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::invite::{InviteEvent, InviteManager};
use crate::queue::{PermissionRequest, QueueEvent, RequestQueue};
use crate::session::{Contact, SessionEvent, SessionManager};

/// The remote-signing engine.
pub struct Engine {
    config: EngineConfig,
    signer: Arc<dyn Signer>,
    local: PublicKey,
    socket: Arc<Socket>,
    sessions: Arc<SessionManager>,
    invites: Arc<InviteManager>,
    queue: Arc<RequestQueue>,
}

impl Engine {
    /// Wire up an engine, subscribe it on the configured relays, and start
    /// the inbound dispatch loop.
    pub async fn start(
        signer: Arc<dyn Signer>,
        pool: Arc<dyn RelayPool>,
        config: EngineConfig,
    ) -> Result<Arc<Self>> {
        let local = signer.get_public_key().await?;
        let codec = EnvelopeCodec::new(Arc::clone(&signer), local);
        let (socket, inbound) = Socket::new(codec, pool, config.socket());
        socket.subscribe(&config.relays).await?;

        let sessions = SessionManager::new(config.pending_session_timeout);
        let invites = InviteManager::new(config.invite_timeout);
        let queue = RequestQueue::new(
            Arc::clone(&sessions),
            Arc::clone(&socket),
            Arc::clone(&signer),
            config.request_timeout,
        );

        let engine = Arc::new(Self {
            config,
            signer,
            local,
            socket,
            sessions,
            invites,
            queue,
        });

        let dispatcher = Arc::clone(&engine);
        tokio::spawn(dispatcher.dispatch_loop(inbound));

        Ok(engine)
    }

    /// The engine's identity.
    pub fn local_key(&self) -> PublicKey {
        self.local
    }

    /// The signing capability the engine answers with.
    pub fn signer(&self) -> &Arc<dyn Signer> {
        &self.signer
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Invites
    // ─────────────────────────────────────────────────────────────────────────

    /// Open a time-bounded invite carrying the given terms.
    pub fn create_invite(&self, policy: PermissionPolicy, profile: Profile) -> InviteToken {
        self.invites
            .create(self.local, self.config.relays.clone(), policy, profile)
    }

    /// Render an open invite as its `nostrconnect://` URL.
    pub fn invite_url(&self, invite: &InviteToken) -> Result<String> {
        Ok(encode_invite(invite)?)
    }

    /// Render a `bunker://` URL pointing at this engine.
    pub fn bunker_url(&self, secret: &str) -> Result<String> {
        Ok(encode_bunker(&BunkerToken {
            pubkey: self.local,
            relays: self.config.relays.clone(),
            secret: secret.to_string(),
        })?)
    }

    /// Withdraw an open invite.
    pub fn cancel_invite(&self, secret: &str) {
        self.invites.cancel(secret);
    }

    /// Observe invite transitions.
    pub fn invite_events(&self) -> broadcast::Receiver<InviteEvent> {
        self.invites.subscribe()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sessions
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a pending session for a peer; the peer's first `connect` or
    /// `get_public_key` confirms it.
    pub fn register_session(&self, token: SessionToken) {
        self.sessions.register(token);
    }

    /// Register a pending session for a peer under the configured default
    /// policy.
    pub fn register_peer(&self, peer: PublicKey) {
        self.sessions.register(SessionToken {
            pubkey: peer,
            relays: self.config.relays.clone(),
            policy: self.config.default_policy.clone(),
            profile: Profile::default(),
            created_at: unix_now(),
        });
    }

    /// Cancel a pending session.
    pub fn cancel_session(&self, peer: &PublicKey) {
        self.sessions.cancel(peer);
    }

    /// Revoke an active session.
    pub fn revoke_session(&self, peer: &PublicKey) {
        self.sessions.revoke(peer);
    }

    /// Replace an active session's terms.
    pub fn update_session(&self, token: SessionToken) {
        self.sessions.update(token);
    }

    /// Drop every session, pending and active.
    pub fn clear_sessions(&self) {
        self.sessions.clear();
    }

    /// The active session for a peer.
    pub fn session(&self, peer: &PublicKey) -> Option<SessionToken> {
        self.sessions.session(peer)
    }

    /// Snapshot of all active sessions.
    pub fn sessions(&self) -> Vec<SessionToken> {
        self.sessions.sessions()
    }

    /// Observe session transitions.
    pub fn session_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.sessions.subscribe()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Request queue
    // ─────────────────────────────────────────────────────────────────────────

    /// Snapshot of the queued requests.
    pub fn requests(&self) -> Vec<PermissionRequest> {
        self.queue.snapshot()
    }

    /// Approve a queued request without answering the peer yet.
    pub fn approve(&self, id: &str, changes: Option<&PermissionPolicy>) -> Result<PermissionRequest> {
        self.queue.approve(id, changes)
    }

    /// Deny a queued request without answering the peer yet.
    pub fn deny(
        &self,
        id: &str,
        reason: &str,
        changes: Option<&PermissionPolicy>,
    ) -> Result<PermissionRequest> {
        self.queue.deny(id, reason, changes)
    }

    /// Approve, execute, and answer the peer with the result.
    pub async fn resolve(&self, id: &str, changes: Option<&PermissionPolicy>) -> Result<()> {
        self.queue.resolve(id, changes).await
    }

    /// Deny and answer the peer with the reason.
    pub async fn reject(
        &self,
        id: &str,
        reason: &str,
        changes: Option<&PermissionPolicy>,
    ) -> Result<()> {
        self.queue.reject(id, reason, changes).await
    }

    /// Approve every queued request with this method and grant it.
    pub fn approve_all_method(&self, name: &str) -> Vec<PermissionRequest> {
        self.queue.approve_all_method(name)
    }

    /// Deny every queued request with this method and revoke it.
    pub fn deny_all_method(&self, name: &str, reason: &str) -> Vec<PermissionRequest> {
        self.queue.deny_all_method(name, reason)
    }

    /// Approve every queued `sign_event` request of this kind and grant it.
    pub fn approve_all_kinds(&self, kind: u16) -> Vec<PermissionRequest> {
        self.queue.approve_all_kinds(kind)
    }

    /// Deny every queued `sign_event` request of this kind.
    pub fn deny_all_kinds(&self, kind: u16, reason: &str) -> Vec<PermissionRequest> {
        self.queue.deny_all_kinds(kind, reason)
    }

    /// Observe queue transitions.
    pub fn queue_events(&self) -> broadcast::Receiver<QueueEvent> {
        self.queue.subscribe()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transport
    // ─────────────────────────────────────────────────────────────────────────

    /// Check a peer for liveness.
    pub async fn ping(&self, peer: &PublicKey) -> Result<bool> {
        Ok(self.socket.ping(peer, CipherScheme::Nip44).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inbound dispatch
    // ─────────────────────────────────────────────────────────────────────────

    async fn dispatch_loop(self: Arc<Self>, mut inbound: mpsc::Receiver<Incoming>) {
        while let Some(incoming) = inbound.recv().await {
            let peer = incoming.peer();
            let scheme = incoming.scheme;
            match incoming.message {
                Message::Request(request) => self.handle_request(peer, scheme, request).await,
                Message::Accept(accept) => self.handle_accept(peer, scheme, accept).await,
                Message::Reject(reject) => {
                    debug!(peer = %peer, id = %reject.id, "unsolicited reject dropped");
                }
            }
        }
    }

    async fn handle_request(&self, peer: PublicKey, scheme: CipherScheme, request: RequestMessage) {
        match request.method.as_str() {
            // Handshake methods drive the session state machine.
            method::CONNECT | method::GET_PUBLIC_KEY => {
                match self.sessions.contact(&peer) {
                    Contact::Activated(token) | Contact::Active(token) => {
                        let result = if request.method == method::CONNECT {
                            connect_ack(&token.relays)
                        } else {
                            self.local.to_hex()
                        };
                        self.answer(&peer, scheme, request.accept(result)).await;
                    }
                    // A stranger may be mid-handshake elsewhere; stay silent.
                    Contact::Unknown => {
                        debug!(peer = %peer, method = %request.method, "unknown peer ignored")
                    }
                }
            }
            name if method::is_supported(name) => {
                let Some(token) = self.sessions.session(&peer) else {
                    debug!(peer = %peer, method = %name, "request without active session ignored");
                    return;
                };
                let id = request.id.clone();
                let permission = PermissionRequest {
                    id: id.clone(),
                    method: request.method,
                    params: request.params,
                    session: peer,
                    stamp: unix_now(),
                };
                let decision = self
                    .queue
                    .submit(permission, scheme, &token.policy)
                    .await;
                if decision == bunker_perms::Decision::Allow {
                    if let Err(e) = self.queue.resolve(&id, None).await {
                        warn!(%id, error = %e, "auto-approved request failed");
                    }
                }
            }
            _ => {
                if self.sessions.is_known(&peer) {
                    self.answer(&peer, scheme, request.reject("invalid_method"))
                        .await;
                } else {
                    debug!(peer = %peer, method = %request.method, "unknown peer ignored");
                }
            }
        }
    }

    /// An unsolicited accept may be a peer returning an invite secret. The
    /// secret alone is not enough: the peer must also answer a correlated
    /// `get_public_key` challenge before the invite joins.
    async fn handle_accept(self: &Arc<Self>, peer: PublicKey, scheme: CipherScheme, accept: AcceptMessage) {
        let secret = accept.result;
        let Some(invite) = self.invites.begin_challenge(&secret) else {
            debug!(peer = %peer, "unsolicited accept matched no open invite");
            return;
        };

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            match engine.challenge(&peer, scheme).await {
                Ok(confirmed) => {
                    if engine.invites.join(&secret, confirmed).is_some() {
                        let token =
                            SessionToken::from_invite(&invite, confirmed, unix_now());
                        engine.sessions.register(token);
                    }
                }
                Err(e) => {
                    debug!(peer = %peer, error = %e, "invite challenge failed");
                    engine.invites.abort_challenge(&secret);
                }
            }
        });
    }

    /// Issue the `get_public_key` challenge and parse the answer.
    async fn challenge(&self, peer: &PublicKey, scheme: CipherScheme) -> Result<PublicKey> {
        let request = RequestMessage::new(method::GET_PUBLIC_KEY, vec![]);
        let response = self.socket.request(request, peer, scheme, None).await?;
        match response {
            Message::Accept(accept) => Ok(PublicKey::from_hex(&accept.result)?),
            Message::Reject(reject) => Err(EngineError::InvalidParams(format!(
                "challenge rejected: {}",
                reject.error
            ))),
            Message::Request(_) => unreachable!("request() only resolves with responses"),
        }
    }

    async fn answer(&self, peer: &PublicKey, scheme: CipherScheme, message: Message) {
        if let Err(e) = self.socket.send(&message, peer, scheme, None).await {
            warn!(peer = %peer, error = %e, "failed to answer peer");
        }
    }
}

/// `connect` acknowledges together with the relays the session rides on.
fn connect_ack(relays: &[String]) -> String {
    if relays.is_empty() {
        "ack".to_string()
    } else {
        format!("ack {}", relays.join(" "))
    }
}
