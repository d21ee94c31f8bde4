//! Error types for the transport crate.

use thiserror::Error;

/// Errors that can occur sealing, opening, or moving envelopes.
///
/// Faults on inbound events are contained at this boundary: the event is
/// bounced (logged and dropped), never retried, and never allowed to crash
/// the engine.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The relay subscription did not report live in time.
    #[error("subscribe timed out")]
    SubscribeTimeout,

    /// No terminal response arrived for an outstanding request.
    #[error("request timed out")]
    RequestTimeout,

    /// The socket has no live subscription yet.
    #[error("transport not ready: no live subscription")]
    NotReady,

    /// Inbound event was authored by the local identity.
    #[error("own event echoed back")]
    Echo,

    /// The signer capability failed to encrypt.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// The ciphertext could not be decrypted.
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Signing capability failure.
    #[error("signing failed: {0}")]
    Signing(String),

    /// Core-level failure (decode, schema, signature).
    #[error(transparent)]
    Core(#[from] bunker_core::CoreError),

    /// Relay pool failure.
    #[error("relay error: {0}")]
    Relay(String),
}

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
