//! Configuration management for the event ingestor.
//!
//! Configuration is assembled with [`IngestorConfigBuilder`] or read from the
//! environment with [`IngestorConfig::from_env`]. Both paths go through the
//! same validation in [`IngestorConfigBuilder::build`].

use crate::utils::error::{IngestorError, Result};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use std::time::Duration;

/// Default number of signatures requested per `getSignaturesForAddress` page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;
/// Default capacity of the fetch queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;
/// Default lifetime of a cached address lookup table.
pub const DEFAULT_LUT_TTL_SECS: u64 = 24 * 60 * 60;

/// Commitment level for RPC requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CommitmentLevel {
    Processed,
    #[default]
    Confirmed,
    Finalized,
}

impl CommitmentLevel {
    /// The name used in JSON-RPC request bodies.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitmentLevel::Processed => "processed",
            CommitmentLevel::Confirmed => "confirmed",
            CommitmentLevel::Finalized => "finalized",
        }
    }
}

impl From<CommitmentLevel> for solana_sdk::commitment_config::CommitmentConfig {
    fn from(level: CommitmentLevel) -> Self {
        match level {
            CommitmentLevel::Processed => {
                solana_sdk::commitment_config::CommitmentConfig::processed()
            }
            CommitmentLevel::Confirmed => {
                solana_sdk::commitment_config::CommitmentConfig::confirmed()
            }
            CommitmentLevel::Finalized => {
                solana_sdk::commitment_config::CommitmentConfig::finalized()
            }
        }
    }
}

/// Retry settings applied to every outbound RPC call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of attempts, including the first (default: 5).
    pub max_attempts: u32,
    /// Constant delay between attempts in milliseconds (default: 1000).
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay_ms: 1000,
        }
    }
}

/// Reconnect settings for per-program log subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Seconds to wait before resubscribing (default: 5).
    pub delay_secs: u64,
    /// Consecutive failures after which a program's listener gives up (default: 10).
    pub max_failures: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay_secs: 5,
            max_failures: 10,
        }
    }
}

impl ReconnectConfig {
    #[must_use]
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }
}

/// Configuration for the ingestor.
///
/// Use [`IngestorConfigBuilder`] to construct instances of this struct.
#[derive(Debug, Clone)]
pub struct IngestorConfig {
    /// Solana JSON-RPC endpoint.
    pub rpc_url: String,

    /// Solana PubSub endpoint. Required when realtime ingestion is enabled.
    pub ws_url: Option<String>,

    /// PostgreSQL connection URL. `None` selects in-memory storage.
    pub database_url: Option<String>,

    /// Programs whose transactions are ingested.
    pub program_ids: Vec<Pubkey>,

    /// Stop backfill pagination at the latest stored signature per program.
    pub resume: bool,

    /// Run the historical backfill at startup (default: true).
    pub enable_backfill: bool,

    /// Subscribe to program logs (default: true).
    pub enable_realtime: bool,

    pub retry: RetryConfig,

    pub reconnect: ReconnectConfig,

    /// Signatures per page (default: 1000)
    pub page_size: usize,

    /// Fetch queue capacity (default: 1000)
    pub queue_capacity: usize,

    /// Lookup-table cache lifetime in seconds (default: 86400)
    pub lut_ttl_secs: u64,
}

impl IngestorConfig {
    /// Reads configuration from the process environment, loading `.env` first.
    ///
    /// | Variable         | Meaning                                  |
    /// |------------------|------------------------------------------|
    /// | `RPC_URL`        | JSON-RPC endpoint (required)             |
    /// | `WS_URL`         | PubSub endpoint                          |
    /// | `DATABASE_URL`   | PostgreSQL URL, in-memory when unset     |
    /// | `PROGRAM_IDS`    | Comma separated program addresses        |
    /// | `RESUME`         | `true`/`1` to resume from stored history |
    /// | `RETRY_ATTEMPTS` | Attempts per RPC call                    |
    /// | `RETRY_DELAY_MS` | Delay between attempts                   |
    ///
    /// # Errors
    ///
    /// Returns [`IngestorError::ConfigError`] for missing or malformed values.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`IngestorConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = IngestorConfigBuilder::new();

        if let Some(url) = lookup("RPC_URL") {
            builder = builder.with_rpc(url);
        }
        match lookup("WS_URL") {
            Some(url) => builder = builder.with_ws(url),
            None => builder = builder.with_realtime(false),
        }
        if let Some(url) = lookup("DATABASE_URL") {
            builder = builder.with_database(url);
        }
        if let Some(ids) = lookup("PROGRAM_IDS") {
            for id in ids.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                builder = builder.program_id(id);
            }
        }
        if let Some(resume) = lookup("RESUME") {
            builder = builder.with_resume(parse_bool("RESUME", &resume)?);
        }

        let mut retry = RetryConfig::default();
        if let Some(attempts) = lookup("RETRY_ATTEMPTS") {
            retry.max_attempts = parse_number("RETRY_ATTEMPTS", &attempts)?;
        }
        if let Some(delay) = lookup("RETRY_DELAY_MS") {
            retry.delay_ms = parse_number("RETRY_DELAY_MS", &delay)?;
        }

        builder.with_retry(retry).build()
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" | "" => Ok(false),
        other => Err(IngestorError::ConfigError(format!(
            "Invalid boolean for {key}: '{other}'"
        ))),
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| IngestorError::ConfigError(format!("Invalid number for {key}: '{value}'")))
}

/// Builder for creating [`IngestorConfig`] instances.
///
/// # Example
///
/// ```no_run
/// # use solana_event_ingestor::IngestorConfigBuilder;
/// let config = IngestorConfigBuilder::new()
///     .with_rpc("http://127.0.0.1:8899")
///     .with_ws("ws://127.0.0.1:8900")
///     .program_id("11111111111111111111111111111111")
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Default)]
pub struct IngestorConfigBuilder {
    rpc_url: Option<String>,
    ws_url: Option<String>,
    database_url: Option<String>,
    program_ids: Vec<String>,
    resume: bool,
    enable_backfill: Option<bool>,
    enable_realtime: Option<bool>,
    retry: Option<RetryConfig>,
    reconnect: Option<ReconnectConfig>,
    page_size: Option<usize>,
    queue_capacity: Option<usize>,
    lut_ttl_secs: Option<u64>,
}

impl IngestorConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the Solana RPC endpoint URL.
    #[must_use]
    pub fn with_rpc(mut self, url: impl Into<String>) -> Self {
        self.rpc_url = Some(url.into());
        self
    }

    /// Sets the PubSub endpoint used for `logsSubscribe`.
    #[must_use]
    pub fn with_ws(mut self, url: impl Into<String>) -> Self {
        self.ws_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_database(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    /// Adds a program to ingest. May be called repeatedly.
    #[must_use]
    pub fn program_id(mut self, id: impl Into<String>) -> Self {
        self.program_ids.push(id.into());
        self
    }

    #[must_use]
    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    #[must_use]
    pub fn with_backfill(mut self, enabled: bool) -> Self {
        self.enable_backfill = Some(enabled);
        self
    }

    #[must_use]
    pub fn with_realtime(mut self, enabled: bool) -> Self {
        self.enable_realtime = Some(enabled);
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = Some(reconnect);
        self
    }

    #[must_use]
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size);
        self
    }

    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    #[must_use]
    pub fn with_lut_ttl_secs(mut self, secs: u64) -> Self {
        self.lut_ttl_secs = Some(secs);
        self
    }

    /// Validates and builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`IngestorError::ConfigError`] if the RPC URL is missing, no
    /// program is configured, a program address is invalid, realtime is
    /// enabled without a WebSocket URL, or a numeric setting is zero.
    pub fn build(self) -> Result<IngestorConfig> {
        let rpc_url = self
            .rpc_url
            .ok_or_else(|| IngestorError::ConfigError("RPC URL is required".to_string()))?;

        if self.program_ids.is_empty() {
            return Err(IngestorError::ConfigError(
                "At least one program ID is required".to_string(),
            ));
        }

        let program_ids = self
            .program_ids
            .iter()
            .map(|id| {
                Pubkey::from_str(id).map_err(|e| {
                    IngestorError::ConfigError(format!("Invalid program ID '{id}': {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let enable_realtime = self.enable_realtime.unwrap_or(true);
        if enable_realtime && self.ws_url.is_none() {
            return Err(IngestorError::ConfigError(
                "WebSocket URL is required when realtime ingestion is enabled".to_string(),
            ));
        }

        let retry = self.retry.unwrap_or_default();
        if retry.max_attempts == 0 {
            return Err(IngestorError::ConfigError(
                "Retry attempts must be at least 1".to_string(),
            ));
        }

        let page_size = self.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        let queue_capacity = self.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY);
        if page_size == 0 || queue_capacity == 0 {
            return Err(IngestorError::ConfigError(
                "Page size and queue capacity must be non-zero".to_string(),
            ));
        }

        Ok(IngestorConfig {
            rpc_url,
            ws_url: self.ws_url,
            database_url: self.database_url,
            program_ids,
            resume: self.resume,
            enable_backfill: self.enable_backfill.unwrap_or(true),
            enable_realtime,
            retry,
            reconnect: self.reconnect.unwrap_or_default(),
            page_size,
            queue_capacity,
            lut_ttl_secs: self.lut_ttl_secs.unwrap_or(DEFAULT_LUT_TTL_SECS),
        })
    }
}
