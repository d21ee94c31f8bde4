//! # bunker-transport
//!
//! Moving protocol envelopes between identities:
//!
//! - **Signer**: the signing/encryption capability trait, with an in-memory
//!   implementation
//! - **Codec**: sealing messages into signed kind-24133 envelopes and back
//! - **Relay**: the relay pool abstraction and an in-memory network
//! - **Socket**: subscription lifecycle, request/response correlation, and
//!   inline `ping` answering
//!
//! The socket surfaces inbound requests on a channel and leaves deciding
//! what to do with them to the engine crate.

pub mod codec;
pub mod error;
pub mod local;
pub mod relay;
pub mod signer;
pub mod socket;

pub use codec::{unix_now, EnvelopeCodec, Incoming};
pub use error::{Result, TransportError};
pub use local::LocalSigner;
pub use relay::{memory::MemoryRelayNetwork, PublishReceipt, RelayPool, SubscribeFilter};
pub use signer::{CipherScheme, Signer};
pub use socket::{Socket, SocketConfig};
