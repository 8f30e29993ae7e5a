//! Top-level orchestration.
//!
//! The [`Ingestor`] wires the components together from an
//! [`IngestorConfig`] and runs them under one cancellation token:
//!
//! 1. read each program's resume point before anything else writes;
//! 2. start the dispatcher on a fresh fetch queue;
//! 3. re-queue signatures recorded earlier but never fetched;
//! 4. start the realtime listener and wait until every program is live;
//! 5. run the historical backfill down to the resume points;
//! 6. keep running until cancelled, or until a listener fails for good.

use crate::config::IngestorConfig;
use crate::core::dispatcher::{DispatchStats, Dispatcher, FetchQueue};
use crate::core::historical::HistoricalFetcher;
use crate::core::lut::LutCache;
use crate::core::parser::TransactionParser;
use crate::core::registry::DecoderRegistry;
use crate::storage::{MemoryStorage, Storage, StorageBackend};
use crate::streams::LogsSubscriber;
use crate::streams::realtime::{ListenerError, ListenerHandle, RealtimeListener};
use crate::streams::websocket::WebSocketSubscriber;
use crate::types::models::FetchTask;
use crate::utils::error::{IngestorError, Result};
use crate::utils::logging::{LogLevel, log, log_error, log_startup};
use crate::utils::retry::{RetryPolicy, RetryingRpcProvider};
use crate::utils::rpc::{DefaultRpcProvider, RpcProvider};
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct Ingestor {
    config: IngestorConfig,
    rpc: Arc<dyn RpcProvider>,
    storage: Arc<dyn StorageBackend>,
    subscriber: Option<Arc<dyn LogsSubscriber>>,
    parser: Arc<TransactionParser>,
    cancel: CancellationToken,
}

impl Ingestor {
    /// Builds an ingestor talking to the configured endpoints.
    ///
    /// Connects to PostgreSQL and creates the schema when a database URL is
    /// configured, and uses in-memory storage otherwise.
    ///
    /// # Errors
    ///
    /// Fails if the database cannot be reached or initialised.
    pub async fn new(config: IngestorConfig) -> Result<Self> {
        let storage: Arc<dyn StorageBackend> = match &config.database_url {
            Some(url) => {
                let storage = Storage::new(url).await?;
                storage.initialize().await?;
                Arc::new(storage)
            }
            None => {
                log(
                    LogLevel::Warning,
                    "No database URL configured, using in-memory storage",
                );
                Arc::new(MemoryStorage::new())
            }
        };

        let rpc: Arc<dyn RpcProvider> = Arc::new(DefaultRpcProvider::new_with_commitment(
            &config.rpc_url,
            CommitmentConfig::confirmed(),
        ));

        let subscriber: Option<Arc<dyn LogsSubscriber>> =
            match (&config.ws_url, config.enable_realtime) {
                (Some(url), true) => Some(Arc::new(WebSocketSubscriber::new(url.clone()))),
                _ => None,
            };

        Ok(Self::with_components(
            config,
            rpc,
            storage,
            subscriber,
            CancellationToken::new(),
        ))
    }

    /// Builds an ingestor from explicit components.
    ///
    /// `rpc` is wrapped in the configured retry policy.
    pub fn with_components(
        config: IngestorConfig,
        rpc: Arc<dyn RpcProvider>,
        storage: Arc<dyn StorageBackend>,
        subscriber: Option<Arc<dyn LogsSubscriber>>,
        cancel: CancellationToken,
    ) -> Self {
        let policy = RetryPolicy::from_config(&config.retry).with_cancellation(cancel.clone());
        let rpc: Arc<dyn RpcProvider> = Arc::new(RetryingRpcProvider::new(rpc, policy));

        let registry = Arc::new(DecoderRegistry::with_known_events());
        let luts = Arc::new(LutCache::new(
            rpc.clone(),
            Duration::from_secs(config.lut_ttl_secs),
        ));
        let parser = Arc::new(TransactionParser::new(registry, luts));

        Self {
            config,
            rpc,
            storage,
            subscriber,
            parser,
            cancel,
        }
    }

    /// Token that stops [`Ingestor::run`] when cancelled.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub fn storage(&self) -> Arc<dyn StorageBackend> {
        self.storage.clone()
    }

    /// Re-queues signatures that were recorded but never fetched.
    ///
    /// # Errors
    ///
    /// Propagates storage and queue errors.
    pub async fn recover_pending(&self, queue: &FetchQueue) -> Result<usize> {
        let pending = self.storage.get_ordered_no_raw_signatures().await?;
        let mut recovered = 0;
        for signature in &pending {
            match Signature::from_str(signature) {
                Ok(signature) => {
                    queue.enqueue(FetchTask::recovered(signature)).await?;
                    recovered += 1;
                }
                Err(e) => tracing::warn!(
                    signature = %signature,
                    error = %e,
                    "Skipping malformed stored signature"
                ),
            }
        }
        if recovered > 0 {
            tracing::info!(recovered, "Re-queued unfetched signatures");
        }
        Ok(recovered)
    }

    /// Runs until cancelled, or until the work runs out when realtime
    /// ingestion is disabled.
    ///
    /// # Errors
    ///
    /// Returns the backfill error, or a [`IngestorError::ConnectionError`]
    /// when a program's listener gives up.
    pub async fn run(&self) -> Result<DispatchStats> {
        log_startup(
            &self.config.program_ids,
            &self.config.rpc_url,
            self.subscriber.as_ref().and(self.config.ws_url.as_deref()),
            self.config.resume,
        );

        self.storage.initialize().await?;
        for program in &self.config.program_ids {
            self.storage.save_program(&program.to_string()).await?;
        }

        // Live rows stored by the listener must not become the resume bound.
        let backfill = if self.config.enable_backfill {
            let fetcher = HistoricalFetcher::new(
                self.rpc.clone(),
                self.storage.clone(),
                self.config.page_size,
                self.config.resume,
            );
            let points = fetcher.resume_points(&self.config.program_ids).await?;
            Some((fetcher, points))
        } else {
            None
        };

        let (queue, rx) = FetchQueue::bounded(self.config.queue_capacity);
        let dispatcher = Arc::new(Dispatcher::new(
            self.rpc.clone(),
            self.storage.clone(),
            self.parser.clone(),
        ));
        let dispatcher_cancel = self.cancel.clone();
        let dispatcher_task =
            tokio::spawn(async move { dispatcher.run(rx, dispatcher_cancel).await });

        let mut listener = self.subscriber.as_ref().map(|subscriber| {
            Arc::new(RealtimeListener::new(
                subscriber.clone(),
                self.rpc.clone(),
                self.storage.clone(),
                queue.clone(),
                self.config.reconnect,
                self.config.page_size,
            ))
            .start(&self.config.program_ids, &self.cancel)
        });

        let outcome = self.drive(&queue, listener.as_mut(), backfill).await;

        if outcome.is_err() || self.subscriber.is_some() {
            self.cancel.cancel();
        }
        if let Some(listener) = listener {
            listener.shutdown().await;
        }
        drop(queue);

        let stats = dispatcher_task
            .await
            .map_err(|e| IngestorError::InternalError(format!("dispatcher task failed: {e}")))?;

        match outcome {
            Ok(()) => Ok(stats),
            Err(e) if e.is_cancelled() => Ok(stats),
            Err(e) => {
                log_error("ingestor", &e.to_string());
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        queue: &FetchQueue,
        mut listener: Option<&mut ListenerHandle>,
        backfill: Option<(HistoricalFetcher, Vec<(Pubkey, Option<Signature>)>)>,
    ) -> Result<()> {
        self.cancellable(self.recover_pending(queue)).await?;

        if let Some(listener) = listener.as_deref_mut() {
            let ready = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(IngestorError::Cancelled),
                ready = listener.wait_ready() => ready,
            };
            if !ready {
                return Err(listener_failure(listener).await);
            }
            log(LogLevel::Success, "Realtime ingestion live for all programs");
        }

        if let Some((fetcher, points)) = backfill {
            let backfill = fetcher.backfill_from(&points, queue);

            let enqueued = match listener.as_deref_mut() {
                Some(listener) => tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => return Err(IngestorError::Cancelled),
                    enqueued = backfill => enqueued?,
                    error = listener.next_error() => return Err(listener_error(error)),
                },
                None => self.cancellable(backfill).await?,
            };
            tracing::info!(enqueued, "Backfill complete");
        }

        if let Some(listener) = listener {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {}
                error = listener.next_error() => return Err(listener_error(error)),
            }
        }

        Ok(())
    }

    async fn cancellable<T>(&self, work: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(IngestorError::Cancelled),
            result = work => result,
        }
    }
}

async fn listener_failure(listener: &mut ListenerHandle) -> IngestorError {
    listener_error(listener.next_error().await)
}

fn listener_error(error: Option<ListenerError>) -> IngestorError {
    match error {
        Some(e) => IngestorError::ConnectionError(e.to_string()),
        None => IngestorError::InternalError("all listener tasks stopped".to_string()),
    }
}
