//! `solana-event-ingestor` - ordered, idempotent ingestion of Solana program events.
//!
//! The ingestor follows a set of programs from two directions at once: a
//! paginated backfill of their signature history over JSON-RPC, and a live
//! `logsSubscribe` stream per program over WebSocket. Both paths feed one
//! bounded fetch queue. A single dispatcher drains it, stores each raw
//! transaction, and parses it into [`Event`]s.
//!
//! # Quick Start
//!
//! ```no_run
//! use solana_event_ingestor::{Ingestor, IngestorConfigBuilder, TelemetryConfig, init_telemetry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_telemetry(TelemetryConfig::default());
//!
//!     let config = IngestorConfigBuilder::new()
//!         .with_rpc("http://127.0.0.1:8899")
//!         .with_ws("ws://127.0.0.1:8900")
//!         .with_database("postgresql://localhost/ingestor")
//!         .program_id("TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA")
//!         .with_resume(true)
//!         .build()?;
//!
//!     let ingestor = Ingestor::new(config).await?;
//!
//!     let cancel = ingestor.cancellation_token();
//!     tokio::spawn(async move {
//!         tokio::signal::ctrl_c().await.ok();
//!         cancel.cancel();
//!     });
//!
//!     let stats = ingestor.run().await?;
//!     println!("ingested {} transactions", stats.ingested);
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! 1. **`HistoricalFetcher`** - Walks `getSignaturesForAddress` pages and records signatures
//! 2. **`RealtimeListener`** - Subscribes to program logs, fills gaps after reconnects
//! 3. **`FetchQueue`** - Bounded FIFO shared by every producer
//! 4. **`Dispatcher`** - Fetches, stores and parses one transaction at a time
//! 5. **`TransactionParser`** - Decodes log events and token inner instructions
//! 6. **`LutCache`** - Resolves address lookup tables for versioned messages
//! 7. **Storage** - PostgreSQL or in-memory, upserts on natural keys
//!
//! # Event ordering
//!
//! Every event is keyed by `(signature, log_index)`. Token inner instructions
//! occupy `100..2000` (`100 * (outer + 1) + inner`) and program data logs
//! occupy `2000..` (`2000 + line`), so re-parsing a transaction always
//! produces the same keys.

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

// Public API exports
pub use crate::config::{
    CommitmentLevel, IngestorConfig, IngestorConfigBuilder, ReconnectConfig, RetryConfig,
};
pub use crate::core::dispatcher::{DispatchOutcome, DispatchStats, Dispatcher, FetchQueue};
pub use crate::core::historical::HistoricalFetcher;
pub use crate::core::ingestor::Ingestor;
pub use crate::core::lut::LutCache;
pub use crate::core::parser::TransactionParser;
pub use crate::core::registry::{DecodeOutcome, DecoderRegistry};
pub use crate::storage::{MemoryStorage, Storage, StorageBackend};
pub use crate::streams::realtime::{ListenerError, RealtimeListener};
pub use crate::streams::websocket::WebSocketSubscriber;
pub use crate::streams::{LogNotification, LogSubscription, LogsSubscriber};
pub use crate::telemetry::{TelemetryConfig, init_telemetry};
pub use crate::types::events::{
    Address, DepositEvent, EventDiscriminator, FeeCollectedEvent, HarvestEvent,
    VaultInitializedEvent, WithdrawEvent, calculate_discriminator,
};
pub use crate::types::models::{Event, FetchTask, SignatureInfo};
pub use crate::utils::error::{IngestorError, Result};
pub use crate::utils::retry::{RetryPolicy, RetryingRpcProvider};
pub use crate::utils::rpc::{DefaultRpcProvider, RpcProvider};

// Module declarations
pub mod config;
pub mod core;
pub mod storage;
pub mod streams;
pub mod telemetry;
pub mod types;
pub mod utils;
