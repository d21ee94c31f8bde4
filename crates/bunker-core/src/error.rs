//! Error types for the core crate.

use thiserror::Error;

/// Errors raised by core primitives.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Payload is not well-formed JSON.
    #[error("malformed payload: {0}")]
    Decode(String),

    /// Payload is valid JSON but not a valid protocol message.
    #[error("invalid message shape: {0}")]
    Schema(String),

    /// Key material could not be parsed.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Event signature does not verify against id and pubkey.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// Hex decoding failed.
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    /// JSON serialization failed.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
