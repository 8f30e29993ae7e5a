//! Shared doubles and fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use solana_client::rpc_response::RpcConfirmedTransactionStatusWithSignature;
use solana_event_ingestor::{
    EventDiscriminator, IngestorError, LogNotification, LogSubscription, LogsSubscriber, Result,
    RpcProvider,
};
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_transaction_status::EncodedConfirmedTransactionWithStatusMeta;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::mpsc;

pub fn sig(n: u8) -> Signature {
    Signature::from([n; 64])
}

pub fn token_program() -> Pubkey {
    Pubkey::new_from_array(spl_token::id().to_bytes())
}

/// In-memory RPC with a per-address signature history (newest first),
/// transaction bodies and account data.
#[derive(Default)]
pub struct MockRpc {
    history: Mutex<HashMap<Pubkey, Vec<RpcConfirmedTransactionStatusWithSignature>>>,
    transactions: Mutex<HashMap<Signature, EncodedConfirmedTransactionWithStatusMeta>>,
    accounts: Mutex<HashMap<Pubkey, Vec<u8>>>,
    pub signature_calls: AtomicU32,
    pub transaction_calls: AtomicU32,
    pub account_calls: AtomicU32,
    /// Upcoming `getSignaturesForAddress` calls that fail.
    pub failing_signature_calls: AtomicU32,
    /// `until` argument of every `getSignaturesForAddress` call.
    pub until_seen: Mutex<Vec<Option<Signature>>>,
}

impl MockRpc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `signature` as the newest entry of `address`'s history.
    pub fn push_signature(&self, address: &Pubkey, signature: Signature, slot: u64) {
        let status = RpcConfirmedTransactionStatusWithSignature {
            signature: signature.to_string(),
            slot,
            err: None,
            memo: None,
            block_time: Some(1_700_000_000 + slot as i64),
            confirmation_status: None,
        };
        self.history
            .lock()
            .unwrap()
            .entry(*address)
            .or_default()
            .insert(0, status);
    }

    pub fn insert_transaction(
        &self,
        signature: Signature,
        transaction: EncodedConfirmedTransactionWithStatusMeta,
    ) {
        self.transactions
            .lock()
            .unwrap()
            .insert(signature, transaction);
    }

    pub fn insert_account(&self, pubkey: Pubkey, data: Vec<u8>) {
        self.accounts.lock().unwrap().insert(pubkey, data);
    }

    pub fn fail_signature_calls(&self, calls: u32) {
        self.failing_signature_calls.store(calls, Ordering::SeqCst);
    }

    pub fn signature_calls(&self) -> u32 {
        self.signature_calls.load(Ordering::SeqCst)
    }

    pub fn transaction_calls(&self) -> u32 {
        self.transaction_calls.load(Ordering::SeqCst)
    }

    pub fn account_calls(&self) -> u32 {
        self.account_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RpcProvider for MockRpc {
    async fn get_signatures_for_address(
        &self,
        address: &Pubkey,
        before: Option<Signature>,
        until: Option<Signature>,
        limit: usize,
        _commitment: Option<CommitmentConfig>,
    ) -> Result<Vec<RpcConfirmedTransactionStatusWithSignature>> {
        self.signature_calls.fetch_add(1, Ordering::SeqCst);
        self.until_seen.lock().unwrap().push(until);

        let failing = self.failing_signature_calls.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_signature_calls
                .store(failing - 1, Ordering::SeqCst);
            return Err(IngestorError::RpcError("node is behind".to_string()));
        }

        let history = self.history.lock().unwrap();
        let entries = history.get(address).cloned().unwrap_or_default();

        let start = match before {
            Some(before) => entries
                .iter()
                .position(|s| s.signature == before.to_string())
                .map_or(entries.len(), |i| i + 1),
            None => 0,
        };
        let until = until.map(|s| s.to_string());

        Ok(entries[start..]
            .iter()
            .take_while(|s| Some(&s.signature) != until.as_ref())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_transaction(
        &self,
        signature: &Signature,
        _commitment: Option<CommitmentConfig>,
    ) -> Result<EncodedConfirmedTransactionWithStatusMeta> {
        self.transaction_calls.fetch_add(1, Ordering::SeqCst);
        self.transactions
            .lock()
            .unwrap()
            .get(signature)
            // The upstream type is not `Clone`; copy it via its serde impls.
            .map(|tx| serde_json::from_value(serde_json::to_value(tx).unwrap()).unwrap())
            .ok_or_else(|| IngestorError::RpcError(format!("transaction {signature} not found")))
    }

    async fn get_account_data(
        &self,
        pubkey: &Pubkey,
        _commitment: Option<CommitmentConfig>,
    ) -> Result<Vec<u8>> {
        self.account_calls.fetch_add(1, Ordering::SeqCst);
        self.accounts
            .lock()
            .unwrap()
            .get(pubkey)
            .cloned()
            .ok_or_else(|| IngestorError::RpcError(format!("Account {pubkey} not found")))
    }
}

/// Subscriber whose first `failures` subscribe calls fail.
///
/// Successful subscriptions stay open until the test pushes notifications
/// through [`MockSubscriber::notify`] or the subscriber is dropped.
pub struct MockSubscriber {
    failures: AtomicU32,
    pub subscribe_calls: AtomicU32,
    pub unsubscribe_calls: std::sync::Arc<AtomicU32>,
    senders: Mutex<HashMap<Pubkey, mpsc::UnboundedSender<LogNotification>>>,
    pending: Mutex<HashMap<Pubkey, Vec<LogNotification>>>,
}

impl MockSubscriber {
    pub fn failing(failures: u32) -> Self {
        Self {
            failures: AtomicU32::new(failures),
            subscribe_calls: AtomicU32::new(0),
            unsubscribe_calls: std::sync::Arc::new(AtomicU32::new(0)),
            senders: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Queues a notification delivered as soon as `program` subscribes.
    pub fn with_pending(self, program: &Pubkey, signature: Signature, slot: u64) -> Self {
        self.pending
            .lock()
            .unwrap()
            .entry(*program)
            .or_default()
            .push(LogNotification {
                signature,
                slot,
                err: None,
            });
        self
    }

    pub fn healthy() -> Self {
        Self::failing(0)
    }

    pub fn subscribe_calls(&self) -> u32 {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    /// Delivers a notification on `program`'s live subscription.
    pub fn notify(&self, program: &Pubkey, signature: Signature, slot: u64) -> bool {
        self.senders
            .lock()
            .unwrap()
            .get(program)
            .is_some_and(|tx| {
                tx.send(LogNotification {
                    signature,
                    slot,
                    err: None,
                })
                .is_ok()
            })
    }

    /// Ends `program`'s live subscription as if the server closed it.
    pub fn disconnect(&self, program: &Pubkey) {
        self.senders.lock().unwrap().remove(program);
    }
}

#[async_trait]
impl LogsSubscriber for MockSubscriber {
    async fn subscribe(&self, program: &Pubkey) -> Result<Box<dyn LogSubscription>> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(IngestorError::ConnectionError(
                "connection refused".to_string(),
            ));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        for notification in self.pending.lock().unwrap().remove(program).unwrap_or_default() {
            let _ = tx.send(notification);
        }
        self.senders.lock().unwrap().insert(*program, tx);
        Ok(Box::new(MockSubscription {
            rx,
            unsubscribed: self.unsubscribe_calls.clone(),
        }))
    }
}

struct MockSubscription {
    rx: mpsc::UnboundedReceiver<LogNotification>,
    unsubscribed: std::sync::Arc<AtomicU32>,
}

#[async_trait]
impl LogSubscription for MockSubscription {
    async fn next(&mut self) -> Result<Option<LogNotification>> {
        Ok(self.rx.recv().await)
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        self.unsubscribed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Borsh-encodes `event` behind its discriminator.
pub fn encode_event<T: EventDiscriminator + borsh::BorshSerialize>(event: &T) -> Vec<u8> {
    let mut data = T::discriminator().to_vec();
    data.extend(borsh::to_vec(event).unwrap());
    data
}

pub fn program_data(data: &[u8]) -> String {
    format!("Program data: {}", STANDARD.encode(data))
}

pub fn token_transfer_data(amount: u64) -> Vec<u8> {
    let mut data = vec![3];
    data.extend_from_slice(&amount.to_le_bytes());
    data
}

/// Lookup table account bytes: count at offset 4, addresses from offset 8.
pub fn lookup_table_data(addresses: &[Pubkey]) -> Vec<u8> {
    let mut data = vec![0u8; 8];
    data[4..8].copy_from_slice(&(addresses.len() as u32).to_le_bytes());
    for address in addresses {
        data.extend_from_slice(address.as_ref());
    }
    data
}

pub fn compiled(program_id_index: u8, accounts: &[u8], data: &[u8]) -> Value {
    json!({
        "programIdIndex": program_id_index,
        "accounts": accounts,
        "data": bs58::encode(data).into_string(),
        "stackHeight": null
    })
}

/// Builds a JSON-encoded transaction as `getTransaction` returns it.
pub struct TxFixture {
    signature: Signature,
    slot: u64,
    block_time: Option<i64>,
    account_keys: Vec<Pubkey>,
    lookups: Vec<Value>,
    inner: Vec<Value>,
    logs: Vec<String>,
}

impl TxFixture {
    pub fn new(signature: Signature, slot: u64) -> Self {
        Self {
            signature,
            slot,
            block_time: Some(1_700_000_000),
            account_keys: vec![Pubkey::new_unique()],
            lookups: Vec::new(),
            inner: Vec::new(),
            logs: Vec::new(),
        }
    }

    pub fn block_time(mut self, block_time: Option<i64>) -> Self {
        self.block_time = block_time;
        self
    }

    pub fn keys(mut self, keys: &[Pubkey]) -> Self {
        self.account_keys = keys.to_vec();
        self
    }

    pub fn log(mut self, line: impl Into<String>) -> Self {
        self.logs.push(line.into());
        self
    }

    pub fn lookup(mut self, table: &Pubkey, writable: &[u8], readonly: &[u8]) -> Self {
        self.lookups.push(json!({
            "accountKey": table.to_string(),
            "writableIndexes": writable,
            "readonlyIndexes": readonly
        }));
        self
    }

    pub fn inner(mut self, outer: u8, instructions: Vec<Value>) -> Self {
        self.inner.push(json!({
            "index": outer,
            "instructions": instructions
        }));
        self
    }

    pub fn build(self) -> EncodedConfirmedTransactionWithStatusMeta {
        let keys: Vec<String> = self.account_keys.iter().map(ToString::to_string).collect();
        let balances = vec![0u64; keys.len()];
        let mut message = json!({
            "header": {
                "numRequiredSignatures": 1,
                "numReadonlySignedAccounts": 0,
                "numReadonlyUnsignedAccounts": 0
            },
            "accountKeys": keys,
            "recentBlockhash": "11111111111111111111111111111111",
            "instructions": []
        });
        if !self.lookups.is_empty() {
            message["addressTableLookups"] = Value::Array(self.lookups);
        }

        serde_json::from_value(json!({
            "slot": self.slot,
            "blockTime": self.block_time,
            "version": 0,
            "transaction": {
                "signatures": [self.signature.to_string()],
                "message": message
            },
            "meta": {
                "err": null,
                "status": { "Ok": null },
                "fee": 5000,
                "preBalances": balances,
                "postBalances": balances,
                "innerInstructions": self.inner,
                "logMessages": self.logs,
                "preTokenBalances": [],
                "postTokenBalances": [],
                "rewards": []
            }
        }))
        .unwrap()
    }
}
