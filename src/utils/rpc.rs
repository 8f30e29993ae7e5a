use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_response::RpcConfirmedTransactionStatusWithSignature;
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey, signature::Signature};
use solana_transaction_status::{EncodedConfirmedTransactionWithStatusMeta, UiTransactionEncoding};

use crate::utils::error::{IngestorError, Result};

/// The provider calls the pipeline depends on.
///
/// Every outbound call goes through this trait so that retries
/// ([`RetryingRpcProvider`](crate::utils::retry::RetryingRpcProvider)) and
/// test doubles can be layered in without touching the callers.
#[async_trait]
pub trait RpcProvider: Send + Sync {
    /// Lists signatures mentioning `address`, newest first.
    async fn get_signatures_for_address(
        &self,
        address: &Pubkey,
        before: Option<Signature>,
        until: Option<Signature>,
        limit: usize,
        commitment: Option<CommitmentConfig>,
    ) -> Result<Vec<RpcConfirmedTransactionStatusWithSignature>>;

    /// Fetches a full transaction body in base64 encoding, version-aware.
    async fn get_transaction(
        &self,
        signature: &Signature,
        commitment: Option<CommitmentConfig>,
    ) -> Result<EncodedConfirmedTransactionWithStatusMeta>;

    /// Reads the raw data of an account. Missing accounts are an error.
    async fn get_account_data(
        &self,
        pubkey: &Pubkey,
        commitment: Option<CommitmentConfig>,
    ) -> Result<Vec<u8>>;
}

pub struct DefaultRpcProvider {
    client: RpcClient,
}

impl DefaultRpcProvider {
    /// Creates a provider connecting to `rpc_url` with the default commitment level.
    pub fn new(rpc_url: &str) -> Self {
        Self {
            client: RpcClient::new(rpc_url.to_string()),
        }
    }

    /// Creates a provider with a specific commitment configuration.
    pub fn new_with_commitment(rpc_url: &str, commitment: CommitmentConfig) -> Self {
        Self {
            client: RpcClient::new_with_commitment(rpc_url.to_string(), commitment),
        }
    }
}

#[async_trait]
impl RpcProvider for DefaultRpcProvider {
    async fn get_signatures_for_address(
        &self,
        address: &Pubkey,
        before: Option<Signature>,
        until: Option<Signature>,
        limit: usize,
        commitment: Option<CommitmentConfig>,
    ) -> Result<Vec<RpcConfirmedTransactionStatusWithSignature>> {
        let config = solana_client::rpc_client::GetConfirmedSignaturesForAddress2Config {
            before,
            until,
            limit: Some(limit),
            commitment,
        };
        Ok(self
            .client
            .get_signatures_for_address_with_config(address, config)
            .await?)
    }

    async fn get_transaction(
        &self,
        signature: &Signature,
        commitment: Option<CommitmentConfig>,
    ) -> Result<EncodedConfirmedTransactionWithStatusMeta> {
        Ok(self
            .client
            .get_transaction_with_config(
                signature,
                solana_client::rpc_config::RpcTransactionConfig {
                    encoding: Some(UiTransactionEncoding::Base64),
                    commitment,
                    max_supported_transaction_version: Some(0),
                },
            )
            .await?)
    }

    async fn get_account_data(
        &self,
        pubkey: &Pubkey,
        commitment: Option<CommitmentConfig>,
    ) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_account_with_commitment(
                pubkey,
                commitment.unwrap_or_else(CommitmentConfig::finalized),
            )
            .await?;

        response
            .value
            .map(|account| account.data)
            .ok_or_else(|| IngestorError::RpcError(format!("Account {pubkey} not found")))
    }
}

#[async_trait]
impl<T: RpcProvider + ?Sized> RpcProvider for std::sync::Arc<T> {
    async fn get_signatures_for_address(
        &self,
        address: &Pubkey,
        before: Option<Signature>,
        until: Option<Signature>,
        limit: usize,
        commitment: Option<CommitmentConfig>,
    ) -> Result<Vec<RpcConfirmedTransactionStatusWithSignature>> {
        (**self)
            .get_signatures_for_address(address, before, until, limit, commitment)
            .await
    }

    async fn get_transaction(
        &self,
        signature: &Signature,
        commitment: Option<CommitmentConfig>,
    ) -> Result<EncodedConfirmedTransactionWithStatusMeta> {
        (**self).get_transaction(signature, commitment).await
    }

    async fn get_account_data(
        &self,
        pubkey: &Pubkey,
        commitment: Option<CommitmentConfig>,
    ) -> Result<Vec<u8>> {
        (**self).get_account_data(pubkey, commitment).await
    }
}
