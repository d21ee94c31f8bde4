//! # bunker-core
//!
//! Core primitives for the bunker remote-signing engine:
//!
//! - **Events**: signed transport events with deterministic sha256 ids
//! - **Messages**: the request/accept/reject protocol schema
//! - **Keys**: secp256k1 Schnorr identity and event signing
//! - **Bus**: the typed broadcast bus every component emits over
//!
//! This crate has no opinion about relays, sessions, or policy; those live
//! in the transport and engine crates.

pub mod bus;
pub mod crypto;
pub mod error;
pub mod event;
pub mod message;
pub mod types;

pub use bus::Bus;
pub use crypto::Keys;
pub use error::{CoreError, Result};
pub use event::{
    canonical_bytes, compute_event_id, EventTemplate, SignedEvent, NOSTR_CONNECT_KIND,
};
pub use message::{method, AcceptMessage, Message, RejectMessage, RequestMessage};
pub use types::{EventId, PublicKey};
