//! Crate-wide error taxonomy.
//!
//! One typed kind per error surfaced at a component boundary (spec section
//! 6). Nothing here is hidden behind strings where a caller needs to match
//! on it; the `String` payloads are diagnostic context only.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FabricError {
    // --- cluster fabric ---
    #[error("no available nodes")]
    NoAvailableNodes,

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("node already exists: {0}")]
    NodeAlreadyExists(String),

    #[error("node offline: {0}")]
    NodeOffline(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("discovery not available")]
    DiscoveryNotAvailable,

    #[error("registration failed: {0}")]
    RegistrationFailed(String),

    #[error("deregistration failed: {0}")]
    DeregistrationFailed(String),

    #[error("health check timed out")]
    CheckTimeout,

    #[error("health check failed: {0}")]
    CheckFailed(String),

    #[error("circuit open")]
    CircuitOpen,

    #[error("too many requests")]
    TooManyRequests,

    // --- cache tier ---
    #[error("cache entry not found: {0}")]
    CacheNotFound(String),

    #[error("cache entry expired: {0}")]
    CacheExpired(String),

    #[error("cache full")]
    CacheFull,

    // --- quantization codec ---
    #[error("insufficient training data: {0}")]
    InsufficientData(String),

    #[error("invalid dimension: {0}")]
    InvalidDimension(String),

    #[error("invalid bit width: {0}")]
    InvalidBits(String),

    #[error("invalid subspace count M: {0}")]
    InvalidM(String),

    #[error("invalid NBits: {0}")]
    InvalidNBits(String),

    #[error("codec not trained")]
    NotTrained,

    // --- boundary ---
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, FabricError>;
