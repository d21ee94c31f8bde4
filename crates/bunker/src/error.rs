//! Error types for the engine facade.

use thiserror::Error;

/// Errors surfaced by the engine API.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No queued request with this id.
    #[error("no queued request with id {0}")]
    UnknownRequest(String),

    /// Request parameters do not fit the method.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// Transport-level failure.
    #[error(transparent)]
    Transport(#[from] bunker_transport::TransportError),

    /// Policy or token failure.
    #[error(transparent)]
    Perms(#[from] bunker_perms::PermsError),

    /// Core-level failure.
    #[error(transparent)]
    Core(#[from] bunker_core::CoreError),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
