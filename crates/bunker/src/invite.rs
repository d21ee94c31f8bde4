//! Invite lifecycle.
//!
//! An invite is open from creation until exactly one of joined, expired, or
//! cancelled. Joining is a two-step exchange: a peer returns the secret,
//! and only after it also answers a correlated `get_public_key` challenge
//! does the invite resolve. A relay-level message alone never joins.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::RngCore;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use bunker_core::{Bus, PublicKey};
use bunker_perms::{InviteToken, PermissionPolicy, Profile};

/// Invite state transitions.
#[derive(Debug, Clone)]
pub enum InviteEvent {
    /// A fresh invite was opened.
    Created(InviteToken),
    /// A peer proved the secret and answered the challenge.
    Joined { pubkey: PublicKey, secret: String },
    /// The invite timer fired before anyone joined.
    Expired { secret: String },
    /// The invite was withdrawn locally.
    Cancelled { secret: String },
}

struct OpenInvite {
    token: InviteToken,
    timer: JoinHandle<()>,
    /// A challenge for this secret is in flight; a second accept with the
    /// same secret must not start another.
    challenging: bool,
}

/// Tracks open invites keyed by secret.
pub struct InviteManager {
    open: Mutex<HashMap<String, OpenInvite>>,
    bus: Bus<InviteEvent>,
    timeout: Duration,
}

impl InviteManager {
    pub fn new(timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            open: Mutex::new(HashMap::new()),
            bus: Bus::default(),
            timeout,
        })
    }

    /// Observe invite transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<InviteEvent> {
        self.bus.subscribe()
    }

    /// Open an invite with a fresh unguessable secret and arm its timer.
    pub fn create(
        self: &Arc<Self>,
        issuer: PublicKey,
        relays: Vec<String>,
        policy: PermissionPolicy,
        profile: Profile,
    ) -> InviteToken {
        let secret = fresh_secret();
        let token = InviteToken {
            pubkey: issuer,
            relays,
            policy,
            profile,
            secret: secret.clone(),
        };

        let timer = {
            let manager = Arc::clone(self);
            let secret = secret.clone();
            tokio::spawn(async move {
                tokio::time::sleep(manager.timeout).await;
                manager.expire(&secret);
            })
        };

        lock(&self.open).insert(
            secret,
            OpenInvite {
                token: token.clone(),
                timer,
                challenging: false,
            },
        );
        self.bus.emit(InviteEvent::Created(token.clone()));
        token
    }

    /// Whether a secret is still open.
    pub fn is_open(&self, secret: &str) -> bool {
        lock(&self.open).contains_key(secret)
    }

    /// Claim a secret for a challenge round.
    ///
    /// Returns the invite if the secret is open and no challenge is already
    /// running, marking it so concurrent accepts cannot race a second one.
    pub fn begin_challenge(&self, secret: &str) -> Option<InviteToken> {
        let mut open = lock(&self.open);
        let entry = open.get_mut(secret)?;
        if entry.challenging {
            return None;
        }
        entry.challenging = true;
        Some(entry.token.clone())
    }

    /// Release a secret after a failed challenge so a later accept may try
    /// again while the invite is still open.
    pub fn abort_challenge(&self, secret: &str) {
        if let Some(entry) = lock(&self.open).get_mut(secret) {
            entry.challenging = false;
        }
    }

    /// Resolve an open invite to joined. Returns the invite so the caller
    /// can turn it into a session; `None` if the secret already resolved.
    pub fn join(&self, secret: &str, peer: PublicKey) -> Option<InviteToken> {
        let entry = lock(&self.open).remove(secret)?;
        entry.timer.abort();
        self.bus.emit(InviteEvent::Joined {
            pubkey: peer,
            secret: secret.to_string(),
        });
        Some(entry.token)
    }

    /// Withdraw an open invite.
    pub fn cancel(&self, secret: &str) {
        if let Some(entry) = lock(&self.open).remove(secret) {
            entry.timer.abort();
            self.bus.emit(InviteEvent::Cancelled {
                secret: secret.to_string(),
            });
        }
    }

    fn expire(&self, secret: &str) {
        if let Some(entry) = lock(&self.open).remove(secret) {
            entry.timer.abort();
            self.bus.emit(InviteEvent::Expired {
                secret: secret.to_string(),
            });
        }
    }
}

/// A random 16-byte hex secret.
fn fresh_secret() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
