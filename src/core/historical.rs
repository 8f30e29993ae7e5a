//! Paginated signature backfill.
//!
//! Signatures are discovered with `getSignaturesForAddress`, newest first,
//! and recorded page by page before any transaction body is fetched. Bodies
//! are fetched later by the dispatcher, so a crash between the two phases
//! leaves the signatures recoverable from storage.

use crate::core::dispatcher::FetchQueue;
use crate::storage::StorageBackend;
use crate::types::models::{FetchTask, SignatureInfo};
use crate::utils::error::{IngestorError, Result};
use crate::utils::rpc::RpcProvider;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use std::str::FromStr;
use std::sync::Arc;

fn parse_signature(signature: &str) -> Result<Signature> {
    Signature::from_str(signature)
        .map_err(|e| IngestorError::InvalidSignature(format!("{signature}: {e}")))
}

/// Cursor over the signature pages of one address.
///
/// Each page starts before the oldest signature of the previous one. The walk
/// ends on the first empty page, and never goes past `until` when it is set.
pub struct SignaturePages<'a> {
    rpc: &'a dyn RpcProvider,
    address: Pubkey,
    until: Option<Signature>,
    page_size: usize,
    before: Option<Signature>,
    done: bool,
}

impl<'a> SignaturePages<'a> {
    pub fn new(
        rpc: &'a dyn RpcProvider,
        address: Pubkey,
        until: Option<Signature>,
        page_size: usize,
    ) -> Self {
        Self {
            rpc,
            address,
            until,
            page_size,
            before: None,
            done: false,
        }
    }

    /// Fetches the next page, or `None` once the history is exhausted.
    ///
    /// # Errors
    ///
    /// Propagates provider errors (already retried by the provider) and
    /// malformed signatures.
    pub async fn next_page(&mut self) -> Result<Option<Vec<SignatureInfo>>> {
        if self.done {
            return Ok(None);
        }

        let page = self
            .rpc
            .get_signatures_for_address(
                &self.address,
                self.before,
                self.until,
                self.page_size,
                Some(CommitmentConfig::confirmed()),
            )
            .await?;

        if page.is_empty() {
            self.done = true;
            return Ok(None);
        }

        let page = page
            .iter()
            .map(|status| {
                Ok(SignatureInfo {
                    signature: parse_signature(&status.signature)?,
                    slot: status.slot,
                    block_time: status.block_time,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        self.before = page.last().map(|info| info.signature);
        Ok(Some(page))
    }
}

/// Records discovered signatures and their association with `program`.
///
/// # Errors
///
/// Propagates storage errors.
pub async fn record_signatures(
    storage: &dyn StorageBackend,
    program: &Pubkey,
    signatures: &[SignatureInfo],
) -> Result<()> {
    let program = program.to_string();
    for info in signatures {
        let signature = info.signature.to_string();
        storage
            .save_transaction(&signature, info.slot, info.block_time.unwrap_or(0))
            .await?;
        storage
            .associate_transaction_with_program(&signature, &program)
            .await?;
    }
    Ok(())
}

/// Walks the history of `program` down to `until`, recording every page.
///
/// Returns the signatures in the order received (newest first).
///
/// # Errors
///
/// Aborts on the first page that fails after retries.
pub async fn collect_signatures(
    rpc: &dyn RpcProvider,
    storage: &dyn StorageBackend,
    program: &Pubkey,
    until: Option<Signature>,
    page_size: usize,
) -> Result<Vec<SignatureInfo>> {
    let mut pages = SignaturePages::new(rpc, *program, until, page_size);
    let mut signatures = Vec::new();

    while let Some(page) = pages.next_page().await? {
        record_signatures(storage, program, &page).await?;
        signatures.extend(page);
    }

    Ok(signatures)
}

/// Enqueues `signatures` (newest first) oldest first.
///
/// # Errors
///
/// Returns [`IngestorError::ChannelClosed`] if the dispatcher is gone.
pub async fn enqueue_oldest_first(
    queue: &FetchQueue,
    program: &Pubkey,
    signatures: &[SignatureInfo],
) -> Result<()> {
    for info in signatures.iter().rev() {
        queue
            .enqueue(FetchTask::new(info.signature, *program))
            .await?;
    }
    Ok(())
}

/// Backfills the signature history of configured programs.
pub struct HistoricalFetcher {
    rpc: Arc<dyn RpcProvider>,
    storage: Arc<dyn StorageBackend>,
    page_size: usize,
    resume: bool,
}

impl HistoricalFetcher {
    pub fn new(
        rpc: Arc<dyn RpcProvider>,
        storage: Arc<dyn StorageBackend>,
        page_size: usize,
        resume: bool,
    ) -> Self {
        Self {
            rpc,
            storage,
            page_size,
            resume,
        }
    }

    /// Where the walk of `program` stops: the latest stored signature in
    /// resume mode, `None` otherwise.
    ///
    /// Take these before any realtime listener starts writing, otherwise a
    /// live signature becomes the bound and hides the older history.
    ///
    /// # Errors
    ///
    /// Propagates storage errors and malformed stored signatures.
    pub async fn resume_point(&self, program: &Pubkey) -> Result<Option<Signature>> {
        if !self.resume {
            return Ok(None);
        }
        match self
            .storage
            .get_latest_saved_signature(&program.to_string())
            .await?
        {
            Some(signature) => Ok(Some(parse_signature(&signature)?)),
            None => Ok(None),
        }
    }

    /// [`Self::resume_point`] for every program, in order.
    ///
    /// # Errors
    ///
    /// Same as [`Self::resume_point`].
    pub async fn resume_points(
        &self,
        programs: &[Pubkey],
    ) -> Result<Vec<(Pubkey, Option<Signature>)>> {
        let mut points = Vec::with_capacity(programs.len());
        for program in programs {
            points.push((*program, self.resume_point(program).await?));
        }
        Ok(points)
    }

    /// Lists and records the history of one program.
    ///
    /// In resume mode the walk stops at the latest signature already stored
    /// for the program.
    ///
    /// # Errors
    ///
    /// Returns the provider error once retries are exhausted. Pages recorded
    /// before the failure stay recorded.
    pub async fn fetch_program(&self, program: &Pubkey) -> Result<Vec<SignatureInfo>> {
        let until = self.resume_point(program).await?;
        self.fetch_program_until(program, until).await
    }

    /// Lists and records the history of one program down to `until`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::fetch_program`].
    #[tracing::instrument(skip_all, fields(program_id = %program))]
    pub async fn fetch_program_until(
        &self,
        program: &Pubkey,
        until: Option<Signature>,
    ) -> Result<Vec<SignatureInfo>> {
        self.storage.save_program(&program.to_string()).await?;

        tracing::info!(
            resume_from = ?until.map(|s| s.to_string()),
            page_size = self.page_size,
            "Starting backfill"
        );

        let signatures = collect_signatures(
            self.rpc.as_ref(),
            self.storage.as_ref(),
            program,
            until,
            self.page_size,
        )
        .await?;

        tracing::info!(discovered = signatures.len(), "Backfill listing complete");
        Ok(signatures)
    }

    /// Backfills every program in turn and enqueues the discovered signatures.
    ///
    /// Returns the number of tasks enqueued.
    ///
    /// # Errors
    ///
    /// Stops at the first program whose listing fails.
    pub async fn backfill(&self, programs: &[Pubkey], queue: &FetchQueue) -> Result<usize> {
        let points = self.resume_points(programs).await?;
        self.backfill_from(&points, queue).await
    }

    /// Like [`Self::backfill`], with resume points taken earlier.
    ///
    /// # Errors
    ///
    /// Stops at the first program whose listing fails.
    pub async fn backfill_from(
        &self,
        points: &[(Pubkey, Option<Signature>)],
        queue: &FetchQueue,
    ) -> Result<usize> {
        let mut enqueued = 0;
        for (program, until) in points {
            let signatures = self.fetch_program_until(program, *until).await?;
            enqueue_oldest_first(queue, program, &signatures).await?;
            enqueued += signatures.len();
        }
        Ok(enqueued)
    }
}
