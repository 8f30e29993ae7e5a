//! The fetch queue and its single consumer.
//!
//! Producers (backfill, realtime listeners, startup recovery) push
//! [`FetchTask`]s into one bounded FIFO. The [`Dispatcher`] drains it in
//! arrival order and turns each task into a persisted, parsed transaction.

use crate::core::parser::TransactionParser;
use crate::storage::StorageBackend;
use crate::types::models::{Event, FetchTask};
use crate::utils::error::{IngestorError, Result};
use crate::utils::logging::log_transaction;
use crate::utils::rpc::RpcProvider;
use solana_sdk::commitment_config::CommitmentConfig;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Sending half of the fetch queue. Cheap to clone.
#[derive(Clone)]
pub struct FetchQueue {
    tx: mpsc::Sender<FetchTask>,
}

impl FetchQueue {
    /// Creates a queue holding at most `capacity` pending tasks.
    #[must_use]
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<FetchTask>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Waits for space and enqueues `task`.
    ///
    /// # Errors
    ///
    /// Returns [`IngestorError::ChannelClosed`] once the consumer is gone.
    pub async fn enqueue(&self, task: FetchTask) -> Result<()> {
        self.tx
            .send(task)
            .await
            .map_err(|_| IngestorError::ChannelClosed)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// What happened to one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The body was already stored and parsed; only the association was ensured.
    AlreadyIngested,
    /// The body was stored but unparsed; it was parsed from storage.
    Reparsed { events: usize },
    /// The body was fetched, stored and parsed.
    Ingested { events: usize },
}

/// Counters returned when the dispatcher loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub ingested: usize,
    pub reparsed: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct Dispatcher {
    rpc: Arc<dyn RpcProvider>,
    storage: Arc<dyn StorageBackend>,
    parser: Arc<TransactionParser>,
}

impl Dispatcher {
    pub fn new(
        rpc: Arc<dyn RpcProvider>,
        storage: Arc<dyn StorageBackend>,
        parser: Arc<TransactionParser>,
    ) -> Self {
        Self {
            rpc,
            storage,
            parser,
        }
    }

    /// Drains `rx` until it closes or `cancel` fires.
    ///
    /// A failing task is logged and the loop moves on.
    pub async fn run(
        &self,
        mut rx: mpsc::Receiver<FetchTask>,
        cancel: CancellationToken,
    ) -> DispatchStats {
        let mut stats = DispatchStats::default();

        loop {
            let task = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                task = rx.recv() => match task {
                    Some(task) => task,
                    None => break,
                },
            };

            match self.dispatch(&task).await {
                Ok(DispatchOutcome::Ingested { .. }) => stats.ingested += 1,
                Ok(DispatchOutcome::Reparsed { .. }) => stats.reparsed += 1,
                Ok(DispatchOutcome::AlreadyIngested) => stats.skipped += 1,
                Err(e) if e.is_cancelled() => break,
                Err(e) => {
                    stats.failed += 1;
                    tracing::error!(
                        signature = %task.signature,
                        program_id = ?task.program_id.map(|p| p.to_string()),
                        error = %e,
                        "Failed to dispatch transaction"
                    );
                }
            }
        }

        tracing::info!(
            ingested = stats.ingested,
            reparsed = stats.reparsed,
            skipped = stats.skipped,
            failed = stats.failed,
            "Dispatcher stopped"
        );
        stats
    }

    /// Processes one task.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's error. The transaction stays unparsed
    /// and is retried the next time its signature is dispatched.
    #[tracing::instrument(skip_all, fields(signature = %task.signature))]
    pub async fn dispatch(&self, task: &FetchTask) -> Result<DispatchOutcome> {
        let signature = task.signature.to_string();

        if self.storage.is_raw_fetched(&signature).await? {
            self.associate(task, &signature).await?;
            if self.storage.is_parsed(&signature).await? {
                return Ok(DispatchOutcome::AlreadyIngested);
            }
            let events = self.reparse(task, &signature).await?;
            return Ok(DispatchOutcome::Reparsed { events });
        }

        let transaction = self
            .rpc
            .get_transaction(&task.signature, Some(CommitmentConfig::confirmed()))
            .await?;

        self.storage
            .save_transaction(
                &signature,
                transaction.slot,
                transaction.block_time.unwrap_or(0),
            )
            .await?;
        self.associate(task, &signature).await?;

        let raw = serde_json::to_vec(&transaction)?;
        self.storage.update_transaction_raw(&signature, &raw).await?;

        let events = self.parser.parse(&task.signature, &transaction).await?;
        let count = self.store_events(&signature, events).await?;

        log_transaction(&signature, transaction.slot, count);
        Ok(DispatchOutcome::Ingested { events: count })
    }

    async fn reparse(&self, task: &FetchTask, signature: &str) -> Result<usize> {
        let raw = self
            .storage
            .get_transaction_raw(signature)
            .await?
            .ok_or_else(|| {
                IngestorError::InternalError(format!("raw body of {signature} disappeared"))
            })?;
        let events = self.parser.parse_raw(&task.signature, &raw).await?;
        tracing::debug!(events = events.len(), "Re-parsed stored transaction");
        self.store_events(signature, events).await
    }

    async fn associate(&self, task: &FetchTask, signature: &str) -> Result<()> {
        if let Some(program) = task.program_id {
            self.storage
                .associate_transaction_with_program(signature, &program.to_string())
                .await?;
        }
        Ok(())
    }

    async fn store_events(&self, signature: &str, events: Vec<Event>) -> Result<usize> {
        for event in &events {
            self.storage.save_event(event).await?;
        }
        self.storage.mark_parsed(signature).await?;
        Ok(events.len())
    }
}
