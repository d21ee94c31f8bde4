//! Error types for the perms crate.

use thiserror::Error;

/// Errors raised by policy and URI handling.
///
/// These are local input-validation failures and fail fast at the caller,
/// unlike transport faults which surface as events.
#[derive(Debug, Error)]
pub enum PermsError {
    /// A connection URI must name at least one relay.
    #[error("missing relays: a connection URI requires at least one relay")]
    MissingRelays,

    /// A connection URI must carry a non-empty secret.
    #[error("missing secret: a connection URI requires a non-empty secret")]
    MissingSecret,

    /// The URI could not be parsed at all.
    #[error("invalid URI: {0}")]
    InvalidUri(String),

    /// Core-level failure (bad key material in a URI, for example).
    #[error(transparent)]
    Core(#[from] bunker_core::CoreError),
}

/// Result type for perms operations.
pub type Result<T> = std::result::Result<T, PermsError>;
