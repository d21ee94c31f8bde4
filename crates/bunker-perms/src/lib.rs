//! # bunker-perms
//!
//! Permission policy and connection tokens for the bunker engine:
//!
//! - **Policy**: explicit allow/deny rules keyed by method and event kind,
//!   with a pure `check` decision function (allow / deny / ask)
//! - **Tokens**: invite and session tokens, the terms of a relationship
//! - **URIs**: `nostrconnect://` and `bunker://` codecs, including the
//!   `perms=` grant list
//!
//! Everything here is pure data and pure functions; applying a decision or
//! a merged policy is the engine's job.

pub mod error;
pub mod policy;
pub mod token;
pub mod uri;

pub use error::{PermsError, Result};
pub use policy::{check, sign_event_kind, Decision, PermissionPolicy};
pub use token::{InviteToken, Profile, SessionToken};
pub use uri::{
    decode_bunker, decode_invite, encode_bunker, encode_invite, encode_perms, parse_perms,
    BunkerToken,
};
