//! Per-program realtime ingestion.
//!
//! Every program gets its own task that subscribes to its logs, fills the gap
//! between the stored history and the live head, and then forwards each
//! notification to the fetch queue. Subscriptions that fail are retried after
//! a fixed delay; after too many consecutive failures the task gives up and
//! reports a [`ListenerError`].

use crate::config::ReconnectConfig;
use crate::core::dispatcher::FetchQueue;
use crate::core::historical::{collect_signatures, enqueue_oldest_first};
use crate::storage::StorageBackend;
use crate::streams::{LogNotification, LogSubscription, LogsSubscriber};
use crate::types::models::FetchTask;
use crate::utils::error::{IngestorError, Result};
use crate::utils::rpc::RpcProvider;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A program's listener stopped for good.
#[derive(Debug, Clone, Error)]
#[error("listener for {program} gave up after {failures} consecutive failures: {last_error}")]
pub struct ListenerError {
    pub program: Pubkey,
    pub failures: u32,
    pub last_error: String,
}

/// Controls the running listener tasks.
pub struct ListenerHandle {
    ready: Vec<oneshot::Receiver<()>>,
    errors: mpsc::UnboundedReceiver<ListenerError>,
    tasks: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl ListenerHandle {
    /// Waits until every program has subscribed and queued its first gap
    /// fill. Returns `false` if any program stopped before getting there.
    pub async fn wait_ready(&mut self) -> bool {
        let mut all_ready = true;
        for ready in self.ready.drain(..) {
            all_ready &= ready.await.is_ok();
        }
        all_ready
    }

    /// Next permanently failed program. `None` once every task has ended.
    pub async fn next_error(&mut self) -> Option<ListenerError> {
        self.errors.recv().await
    }

    /// Cancels every subscription and waits for the tasks to return.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Listener task panicked");
            }
        }
    }
}

/// Turns log subscriptions into fetch tasks.
pub struct RealtimeListener {
    subscriber: Arc<dyn LogsSubscriber>,
    rpc: Arc<dyn RpcProvider>,
    storage: Arc<dyn StorageBackend>,
    queue: FetchQueue,
    reconnect: ReconnectConfig,
    page_size: usize,
}

impl RealtimeListener {
    pub fn new(
        subscriber: Arc<dyn LogsSubscriber>,
        rpc: Arc<dyn RpcProvider>,
        storage: Arc<dyn StorageBackend>,
        queue: FetchQueue,
        reconnect: ReconnectConfig,
        page_size: usize,
    ) -> Self {
        Self {
            subscriber,
            rpc,
            storage,
            queue,
            reconnect,
            page_size,
        }
    }

    /// Spawns one task per program.
    ///
    /// The tasks stop when `cancel` (or the handle's child token) fires.
    pub fn start(
        self: Arc<Self>,
        programs: &[Pubkey],
        cancel: &CancellationToken,
    ) -> ListenerHandle {
        let cancel = cancel.child_token();
        let (error_tx, errors) = mpsc::unbounded_channel();
        let mut ready = Vec::with_capacity(programs.len());
        let mut tasks = Vec::with_capacity(programs.len());

        for program in programs {
            let (ready_tx, ready_rx) = oneshot::channel();
            ready.push(ready_rx);

            let listener = Arc::clone(&self);
            let program = *program;
            let cancel = cancel.clone();
            let error_tx = error_tx.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = listener.run_program(program, ready_tx, &cancel).await {
                    let _ = error_tx.send(e);
                }
            }));
        }

        ListenerHandle {
            ready,
            errors,
            tasks,
            cancel,
        }
    }

    /// Keeps one program subscribed until cancellation or permanent failure.
    ///
    /// # Errors
    ///
    /// Returns a [`ListenerError`] after `max_failures` consecutive failures.
    #[tracing::instrument(skip_all, fields(program_id = %program))]
    pub async fn run_program(
        &self,
        program: Pubkey,
        ready: oneshot::Sender<()>,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), ListenerError> {
        let mut ready = Some(ready);
        let mut failures = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let err = match self.session(&program, &mut ready, &mut failures, cancel).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_cancelled() => return Ok(()),
                Err(IngestorError::ChannelClosed) => {
                    tracing::debug!("Fetch queue closed, stopping listener");
                    return Ok(());
                }
                Err(e) => e,
            };

            failures += 1;
            tracing::warn!(
                attempt = failures,
                max = self.reconnect.max_failures,
                error = %err,
                "Log subscription failed"
            );

            if failures >= self.reconnect.max_failures {
                return Err(ListenerError {
                    program,
                    failures,
                    last_error: err.to_string(),
                });
            }

            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                () = tokio::time::sleep(self.reconnect.delay()) => {}
            }
        }
    }

    /// One subscribe, gap fill and receive cycle. `Ok` only on cancellation.
    async fn session(
        &self,
        program: &Pubkey,
        ready: &mut Option<oneshot::Sender<()>>,
        failures: &mut u32,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut subscription = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            subscription = self.subscriber.subscribe(program) => subscription?,
        };

        let result = self
            .receive(program, subscription.as_mut(), ready, failures, cancel)
            .await;

        if cancel.is_cancelled() {
            if let Err(e) = subscription.unsubscribe().await {
                tracing::warn!(error = %e, "Failed to unsubscribe cleanly");
            }
        }
        result
    }

    async fn receive(
        &self,
        program: &Pubkey,
        subscription: &mut dyn LogSubscription,
        ready: &mut Option<oneshot::Sender<()>>,
        failures: &mut u32,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let filled = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            filled = self.fill_gap(program) => filled?,
        };
        if filled > 0 || *failures > 0 {
            tracing::info!(filled, after_failures = *failures, "Gap fill queued");
        }

        *failures = 0;
        if let Some(ready) = ready.take() {
            let _ = ready.send(());
        }

        loop {
            let notification = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                next = subscription.next() => next?,
            };

            match notification {
                Some(notification) => self.handle_notification(program, notification).await?,
                None => {
                    return Err(IngestorError::ConnectionError(
                        "subscription stream ended".to_string(),
                    ));
                }
            }
        }
    }

    /// Lists signatures between the latest stored one and the provider head,
    /// records them, and enqueues them oldest first.
    ///
    /// Does nothing when no signature is stored yet for the program; the
    /// historical backfill owns that case.
    ///
    /// # Errors
    ///
    /// Propagates provider, storage and queue errors.
    pub async fn fill_gap(&self, program: &Pubkey) -> Result<usize> {
        let Some(latest) = self
            .storage
            .get_latest_saved_signature(&program.to_string())
            .await?
        else {
            return Ok(0);
        };
        let until = Signature::from_str(&latest)
            .map_err(|e| IngestorError::InvalidSignature(format!("{latest}: {e}")))?;

        let signatures = collect_signatures(
            self.rpc.as_ref(),
            self.storage.as_ref(),
            program,
            Some(until),
            self.page_size,
        )
        .await?;

        enqueue_oldest_first(&self.queue, program, &signatures).await?;
        Ok(signatures.len())
    }

    async fn handle_notification(
        &self,
        program: &Pubkey,
        notification: LogNotification,
    ) -> Result<()> {
        let signature = notification.signature.to_string();
        tracing::debug!(
            signature = %signature,
            slot = notification.slot,
            failed = notification.err.is_some(),
            "Log notification"
        );

        self.storage
            .save_transaction(&signature, notification.slot, 0)
            .await?;
        self.storage
            .associate_transaction_with_program(&signature, &program.to_string())
            .await?;
        self.queue
            .enqueue(FetchTask::new(notification.signature, *program))
            .await
    }
}
