//! Fixed-count, fixed-delay retry around fallible async operations.
//!
//! This module provides:
//! - [`RetryPolicy`]: the retry strategy object, injectable and cancellation-aware.
//! - [`RetryingRpcProvider`]: decorator that routes every [`RpcProvider`] call
//!   through a [`RetryPolicy`].
//!
//! There is no backoff, no jitter and no error classification. Every error is
//! retried until the attempt budget is spent.

use crate::config::RetryConfig;
use crate::utils::error::{IngestorError, Result};
use crate::utils::rpc::RpcProvider;
use async_trait::async_trait;
use solana_client::rpc_response::RpcConfirmedTransactionStatusWithSignature;
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey, signature::Signature};
use solana_transaction_status::EncodedConfirmedTransactionWithStatusMeta;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Retry strategy: up to `max_attempts` calls with a constant `delay` between them.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
    cancellation: Option<CancellationToken>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Creates a policy. `max_attempts` is clamped to at least one call.
    #[must_use]
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            cancellation: None,
        }
    }

    #[must_use]
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, Duration::from_millis(config.delay_ms))
    }

    /// A policy that retries immediately. Intended for tests.
    #[must_use]
    pub fn no_delay(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    /// Makes the sleeps between attempts end early when `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Runs `op` until it succeeds or the attempt budget is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`IngestorError::RetryExhausted`] carrying the last error after
    /// the final attempt, or [`IngestorError::Cancelled`] if the token fires
    /// while waiting between attempts.
    pub async fn execute<F, Fut, T>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_err: Option<IngestorError> = None;

        for attempt in 1..=self.max_attempts {
            match op().await {
                Ok(val) => return Ok(val),
                Err(err) => {
                    tracing::warn!(
                        attempt,
                        max = self.max_attempts,
                        delay_ms = self.delay.as_millis() as u64,
                        error = %err,
                        "Operation failed"
                    );
                    last_err = Some(err);
                }
            }

            if attempt < self.max_attempts {
                self.pause().await?;
            }
        }

        Err(IngestorError::RetryExhausted {
            attempts: self.max_attempts,
            last_error: last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }

    async fn pause(&self) -> Result<()> {
        if self.delay.is_zero() {
            return Ok(());
        }
        match &self.cancellation {
            Some(token) => {
                tokio::select! {
                    () = token.cancelled() => Err(IngestorError::Cancelled),
                    () = tokio::time::sleep(self.delay) => Ok(()),
                }
            }
            None => {
                tokio::time::sleep(self.delay).await;
                Ok(())
            }
        }
    }
}

/// A decorator that wraps any [`RpcProvider`] with a [`RetryPolicy`].
///
/// This is the single retry chokepoint for signature listing, transaction
/// fetches and account reads.
///
/// # Example
///
/// ```no_run
/// use solana_event_ingestor::utils::retry::{RetryPolicy, RetryingRpcProvider};
/// use solana_event_ingestor::utils::rpc::{DefaultRpcProvider, RpcProvider};
/// use std::sync::Arc;
///
/// let raw = DefaultRpcProvider::new("http://127.0.0.1:8899");
/// let retrying = RetryingRpcProvider::new(raw, RetryPolicy::default());
/// let rpc: Arc<dyn RpcProvider> = Arc::new(retrying);
/// ```
pub struct RetryingRpcProvider<P> {
    inner: P,
    policy: RetryPolicy,
}

impl<P: RpcProvider> RetryingRpcProvider<P> {
    pub fn new(inner: P, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl<P: RpcProvider> RpcProvider for RetryingRpcProvider<P> {
    async fn get_signatures_for_address(
        &self,
        address: &Pubkey,
        before: Option<Signature>,
        until: Option<Signature>,
        limit: usize,
        commitment: Option<CommitmentConfig>,
    ) -> Result<Vec<RpcConfirmedTransactionStatusWithSignature>> {
        self.policy
            .execute(|| {
                self.inner
                    .get_signatures_for_address(address, before, until, limit, commitment)
            })
            .await
    }

    async fn get_transaction(
        &self,
        signature: &Signature,
        commitment: Option<CommitmentConfig>,
    ) -> Result<EncodedConfirmedTransactionWithStatusMeta> {
        self.policy
            .execute(|| self.inner.get_transaction(signature, commitment))
            .await
    }

    async fn get_account_data(
        &self,
        pubkey: &Pubkey,
        commitment: Option<CommitmentConfig>,
    ) -> Result<Vec<u8>> {
        self.policy
            .execute(|| self.inner.get_account_data(pubkey, commitment))
            .await
    }
}
