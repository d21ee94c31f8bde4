//! Session lifecycle.
//!
//! A peer moves through absent, pending, active, and revoked; pending may
//! also be cancelled by its timer. The manager exclusively owns both maps;
//! other components observe transitions on the bus, never the maps.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

use bunker_core::{Bus, PublicKey};
use bunker_perms::{PermissionPolicy, SessionToken};

/// Session state transitions.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A pending entry was registered for this peer.
    Pending(SessionToken),
    /// A pending entry was confirmed by the handshake.
    Activated(SessionToken),
    /// A pending entry timed out or was cancelled.
    Cancelled(PublicKey),
    /// An active entry was revoked.
    Revoked(PublicKey),
    /// An active entry's terms were replaced.
    Updated(SessionToken),
    /// Both maps were emptied.
    Cleared,
}

/// Outcome of an inbound handshake message for a peer.
#[derive(Debug, Clone)]
pub enum Contact {
    /// First handshake message for a pending entry; it is now active.
    Activated(SessionToken),
    /// The peer already holds an active session.
    Active(SessionToken),
    /// No entry for this peer. The caller must not respond.
    Unknown,
}

struct PendingEntry {
    token: SessionToken,
    timer: JoinHandle<()>,
}

/// Tracks pending and active sessions keyed by peer pubkey.
pub struct SessionManager {
    pending: Mutex<HashMap<PublicKey, PendingEntry>>,
    active: Mutex<HashMap<PublicKey, SessionToken>>,
    bus: Bus<SessionEvent>,
    pending_timeout: Duration,
}

impl SessionManager {
    pub fn new(pending_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            bus: Bus::default(),
            pending_timeout,
        })
    }

    /// Observe session transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.bus.subscribe()
    }

    /// Insert a pending entry for the peer named by `token` and arm its
    /// handshake timer. Re-registering a peer replaces the earlier pending
    /// entry and its timer.
    pub fn register(self: &Arc<Self>, token: SessionToken) {
        let peer = token.pubkey;
        let timer = {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(manager.pending_timeout).await;
                manager.cancel(&peer);
            })
        };

        let mut pending = lock(&self.pending);
        if let Some(old) = pending.insert(
            peer,
            PendingEntry {
                token: token.clone(),
                timer,
            },
        ) {
            old.timer.abort();
        }
        drop(pending);
        self.bus.emit(SessionEvent::Pending(token));
    }

    /// Apply an inbound `connect`/`get_public_key` from `peer`.
    ///
    /// The first such message for a pending entry activates it; later ones
    /// find the active entry and change nothing.
    pub fn contact(&self, peer: &PublicKey) -> Contact {
        if let Some(entry) = lock(&self.pending).remove(peer) {
            entry.timer.abort();
            lock(&self.active).insert(*peer, entry.token.clone());
            self.bus.emit(SessionEvent::Activated(entry.token.clone()));
            return Contact::Activated(entry.token);
        }
        match lock(&self.active).get(peer) {
            Some(token) => Contact::Active(token.clone()),
            None => Contact::Unknown,
        }
    }

    /// Remove a pending entry, if present.
    pub fn cancel(&self, peer: &PublicKey) {
        if let Some(entry) = lock(&self.pending).remove(peer) {
            entry.timer.abort();
            self.bus.emit(SessionEvent::Cancelled(*peer));
        }
    }

    /// Remove an active entry, if present.
    pub fn revoke(&self, peer: &PublicKey) {
        if lock(&self.active).remove(peer).is_some() {
            self.bus.emit(SessionEvent::Revoked(*peer));
        }
    }

    /// Replace an active entry's terms. Pending entries are never touched
    /// by updates; they change only through the handshake.
    pub fn update(&self, token: SessionToken) {
        let mut active = lock(&self.active);
        match active.get_mut(&token.pubkey) {
            Some(existing) => {
                *existing = token.clone();
                drop(active);
                self.bus.emit(SessionEvent::Updated(token));
            }
            None => debug!(peer = %token.pubkey, "update for peer without active session"),
        }
    }

    /// Fold policy changes into an active session's policy.
    pub fn apply_policy_changes(&self, peer: &PublicKey, changes: &PermissionPolicy) {
        let merged = {
            let active = lock(&self.active);
            match active.get(peer) {
                Some(token) => token.with_policy(token.policy.merge(changes)),
                None => return,
            }
        };
        self.update(merged);
    }

    /// Drop everything, pending and active alike.
    pub fn clear(&self) {
        for (_, entry) in lock(&self.pending).drain() {
            entry.timer.abort();
        }
        lock(&self.active).clear();
        self.bus.emit(SessionEvent::Cleared);
    }

    /// The active session for a peer.
    pub fn session(&self, peer: &PublicKey) -> Option<SessionToken> {
        lock(&self.active).get(peer).cloned()
    }

    /// Whether the peer has a pending or active entry.
    pub fn is_known(&self, peer: &PublicKey) -> bool {
        lock(&self.active).contains_key(peer) || lock(&self.pending).contains_key(peer)
    }

    /// Snapshot of all active sessions.
    pub fn sessions(&self) -> Vec<SessionToken> {
        lock(&self.active).values().cloned().collect()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
