//! # bunker
//!
//! A NIP-46 ("Nostr Connect") remote-signing engine. A device holding a
//! private key exchanges encrypted, correlated request/response messages
//! with remote applications over a relay network, mediated by session
//! tokens, invitations, and a permission policy.
//!
//! ## Overview
//!
//! - **Sessions**: at most one relationship per peer pubkey, pending until
//!   the peer completes the connect handshake
//! - **Invites**: single-use, time-bounded secrets that resolve to sessions
//!   through a two-step accept/challenge exchange
//! - **Request queue**: inbound requests gated by an explicit allow/deny/ask
//!   policy, with timeout-based auto-denial
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use bunker::{Engine, EngineConfig};
//! use bunker::perms::PermissionPolicy;
//! use bunker::transport::{LocalSigner, MemoryRelayNetwork};
//!
//! async fn example() -> bunker::Result<()> {
//!     let signer = Arc::new(LocalSigner::generate()?);
//!     let network = MemoryRelayNetwork::new(["wss://relay.example"]);
//!
//!     let engine = Engine::start(
//!         signer,
//!         network,
//!         EngineConfig {
//!             relays: vec!["wss://relay.example".into()],
//!             request_timeout: Duration::from_secs(60),
//!             invite_timeout: Duration::from_secs(300),
//!             pending_session_timeout: Duration::from_secs(300),
//!             subscribe_timeout: Duration::from_secs(10),
//!             default_policy: PermissionPolicy::default(),
//!         },
//!     )
//!     .await?;
//!
//!     let invite = engine.create_invite(PermissionPolicy::default().allow_kind(1), Default::default());
//!     println!("{}", engine.invite_url(&invite)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! The component crates are re-exported for convenience:
//!
//! - `bunker::core` - events, messages, keys, the event bus
//! - `bunker::perms` - policy, tokens, connection URIs
//! - `bunker::transport` - signer capability, codec, relays, socket

pub mod config;
pub mod engine;
pub mod error;
pub mod invite;
pub mod queue;
pub mod session;

// Re-export component crates
pub use bunker_core as core;
pub use bunker_perms as perms;
pub use bunker_transport as transport;

// Re-export main types for convenience
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use invite::{InviteEvent, InviteManager};
pub use queue::{PermissionRequest, QueueEvent, RequestQueue, REASON_POLICY, REASON_TIMEOUT};
pub use session::{Contact, SessionEvent, SessionManager};

// Re-export commonly used component types
pub use bunker_core::{EventId, EventTemplate, Keys, Message, PublicKey, SignedEvent};
pub use bunker_perms::{Decision, InviteToken, PermissionPolicy, Profile, SessionToken};
pub use bunker_transport::{CipherScheme, LocalSigner, Signer};
