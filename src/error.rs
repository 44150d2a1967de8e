//! Error types for jrpc-engine.
//!
//! [`EngineError`] covers setup and codec failures that happen outside a
//! call. Failures inside a call are expressed as a
//! [`Fault`](crate::protocol::Fault) and travel in the response envelope.

use thiserror::Error;

/// Main error type for engine setup and codec operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A namespace was registered twice.
    #[error("namespace [{0}] exists")]
    DuplicateNamespace(String),

    /// The configured crypto key cannot be used for AES.
    #[error("crypto key too short: {0} bytes (need at least 16)")]
    InvalidKey(usize),

    /// Ciphertext could not be decoded or decrypted.
    #[error("cipher error: {0}")]
    Cipher(String),
}

/// Result type alias using EngineError.
pub type Result<T> = std::result::Result<T, EngineError>;
