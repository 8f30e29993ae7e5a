//! Push sources of new signatures.
//!
//! A [`LogsSubscriber`] opens one `logsSubscribe` stream per program. The
//! [`realtime::RealtimeListener`] drives those streams, handles reconnects,
//! and feeds the fetch queue.

use crate::utils::error::Result;
use async_trait::async_trait;
use solana_sdk::{pubkey::Pubkey, signature::Signature};

pub mod realtime;
pub mod websocket;

/// A transaction that mentioned a subscribed program.
#[derive(Debug, Clone, PartialEq)]
pub struct LogNotification {
    pub signature: Signature,
    pub slot: u64,
    /// Transaction error, if it failed.
    pub err: Option<serde_json::Value>,
}

/// Opens log subscriptions.
#[async_trait]
pub trait LogsSubscriber: Send + Sync {
    /// Subscribes to transactions mentioning `program`.
    ///
    /// Returns once the provider has confirmed the subscription.
    async fn subscribe(&self, program: &Pubkey) -> Result<Box<dyn LogSubscription>>;
}

/// One live subscription.
#[async_trait]
pub trait LogSubscription: Send {
    /// Waits for the next notification. `Ok(None)` means the stream ended.
    async fn next(&mut self) -> Result<Option<LogNotification>>;

    /// Cancels the subscription and closes the stream.
    async fn unsubscribe(&mut self) -> Result<()>;
}
