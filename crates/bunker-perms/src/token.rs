//! Invite and session tokens.
//!
//! An invite is a single-use, time-bounded offer to establish a session; a
//! session is the durable relationship with one peer. Both carry the policy
//! and profile that were agreed when the relationship was offered.

use serde::{Deserialize, Serialize};

use bunker_core::PublicKey;

use crate::policy::PermissionPolicy;

/// Optional human-facing metadata attached to an invite or session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: Option<String>,
    pub url: Option<String>,
    pub image: Option<String>,
}

impl Profile {
    /// Whether any field is set.
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.url.is_none() && self.image.is_none()
    }
}

/// A single-use invitation, identified by its secret.
///
/// `pubkey` is the identity of the party that issued the invite. The secret
/// is an unguessable correlation value; an invite is open from creation
/// until joined, expired, or cancelled, and exactly one of those happens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteToken {
    pub pubkey: PublicKey,
    pub relays: Vec<String>,
    pub policy: PermissionPolicy,
    pub profile: Profile,
    pub secret: String,
}

/// The durable record of a confirmed (or pending) session with one peer.
///
/// `pubkey` is the peer's identity. A peer has at most one token, pending or
/// active; pending becomes active only through the handshake protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken {
    pub pubkey: PublicKey,
    pub relays: Vec<String>,
    pub policy: PermissionPolicy,
    pub profile: Profile,
    pub created_at: i64,
}

impl SessionToken {
    /// Build the session token a joined invite resolves into.
    pub fn from_invite(invite: &InviteToken, peer: PublicKey, created_at: i64) -> Self {
        Self {
            pubkey: peer,
            relays: invite.relays.clone(),
            policy: invite.policy.clone(),
            profile: invite.profile.clone(),
            created_at,
        }
    }

    /// Copy of this token with a replaced policy.
    pub fn with_policy(&self, policy: PermissionPolicy) -> Self {
        Self {
            policy,
            ..self.clone()
        }
    }
}
