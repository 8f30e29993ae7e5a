//! Error types for ingestion operations.
//!
//! This module defines the error enumeration shared by every stage of the
//! pipeline, from configuration through RPC access, decoding and storage.

use thiserror::Error;

/// Custom error type for ingestion operations.
///
/// Covers every failure mode in the pipeline: configuration issues, RPC and
/// WebSocket failures, database errors, and structural decoding failures.
/// Malformed-but-tolerated payloads (short data, unknown discriminators) are
/// *not* errors; they are logged and skipped where they occur.
#[derive(Debug, Error)]
pub enum IngestorError {
    /// Errors encountered during database operations.
    ///
    /// Wraps `sqlx::Error` through `#[from]` so `?` works directly on queries.
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// A payload matched a known schema but did not fit it, or a transaction
    /// body could not be interpreted at all.
    #[error("Decoding error: {0}")]
    DecodingError(String),

    /// Errors interacting with the Solana RPC.
    #[error("RPC error: {0}")]
    RpcError(String),

    /// Errors from the Solana RPC client.
    #[error("RPC client error: {0}")]
    RpcClientError(Box<solana_client::client_error::ClientError>),

    /// WebSocket connect, subscribe or receive failure.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Missing or invalid configuration values.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Errors from environment variable operations.
    #[error("Environment variable error: {0}")]
    EnvVarError(#[from] std::env::VarError),

    /// Errors during Solana public key parsing.
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(#[from] solana_sdk::pubkey::ParsePubkeyError),

    /// A signature string could not be parsed.
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// JSON (de)serialization of stored transaction bodies or payloads.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// An address lookup table could not be read or is too small for the
    /// indexes a transaction references.
    #[error("Lookup table error: {0}")]
    LookupTableError(String),

    /// All retry attempts were exhausted.
    #[error("Retry exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted {
        /// Total number of attempts made.
        attempts: u32,
        /// String representation of the last error.
        last_error: String,
    },

    /// The fetch queue was closed while a producer was still sending.
    #[error("Fetch queue closed")]
    ChannelClosed,

    /// Shutdown was requested. Not a failure; callers return early on it.
    #[error("Operation cancelled")]
    Cancelled,

    /// Generic errors for operations that don't fit other categories.
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl IngestorError {
    /// Returns `true` when the error only signals a requested shutdown.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, IngestorError::Cancelled)
    }
}

/// Type alias for Results using `IngestorError`.
pub type Result<T> = std::result::Result<T, IngestorError>;

impl From<solana_client::client_error::ClientError> for IngestorError {
    fn from(err: solana_client::client_error::ClientError) -> Self {
        IngestorError::RpcClientError(Box::new(err))
    }
}
