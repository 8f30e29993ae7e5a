//! In-process storage with the same upsert semantics as [`Storage`](super::Storage).
//!
//! Used when no database URL is configured, and by the test suites.

use super::{StorageBackend, TransactionRecord};
use crate::types::models::Event;
use crate::utils::error::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::Mutex;

#[derive(Default)]
struct Inner {
    programs: BTreeSet<String>,
    transactions: HashMap<String, TransactionRecord>,
    /// (program_id, signature)
    associations: BTreeSet<(String, String)>,
    events: BTreeMap<(String, i32), Event>,
}

#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn transaction(&self, signature: &str) -> Option<TransactionRecord> {
        self.inner.lock().await.transactions.get(signature).cloned()
    }

    pub async fn transaction_count(&self) -> usize {
        self.inner.lock().await.transactions.len()
    }

    /// Events of one transaction, ordered by `log_index`.
    pub async fn events_for(&self, signature: &str) -> Vec<Event> {
        self.inner
            .lock()
            .await
            .events
            .iter()
            .filter(|((sig, _), _)| sig == signature)
            .map(|(_, event)| event.clone())
            .collect()
    }

    pub async fn event_count(&self) -> usize {
        self.inner.lock().await.events.len()
    }

    pub async fn programs(&self) -> Vec<String> {
        self.inner.lock().await.programs.iter().cloned().collect()
    }

    /// Programs associated with `signature`.
    pub async fn programs_for(&self, signature: &str) -> Vec<String> {
        self.inner
            .lock()
            .await
            .associations
            .iter()
            .filter(|(_, sig)| sig == signature)
            .map(|(program, _)| program.clone())
            .collect()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn save_program(&self, program_id: &str) -> Result<()> {
        self.inner
            .lock()
            .await
            .programs
            .insert(program_id.to_string());
        Ok(())
    }

    async fn save_transaction(&self, signature: &str, slot: u64, block_time: i64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .transactions
            .entry(signature.to_string())
            .and_modify(|record| {
                if slot > 0 {
                    record.slot = slot;
                }
                if block_time != 0 {
                    record.block_time = block_time;
                }
            })
            .or_insert_with(|| TransactionRecord {
                signature: signature.to_string(),
                slot,
                block_time,
                raw: None,
                parsed: false,
            });
        Ok(())
    }

    async fn update_transaction_raw(&self, signature: &str, raw: &[u8]) -> Result<()> {
        if let Some(record) = self.inner.lock().await.transactions.get_mut(signature) {
            record.raw = Some(raw.to_vec());
        }
        Ok(())
    }

    async fn get_transaction_raw(&self, signature: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .inner
            .lock()
            .await
            .transactions
            .get(signature)
            .and_then(|record| record.raw.clone()))
    }

    async fn mark_parsed(&self, signature: &str) -> Result<()> {
        if let Some(record) = self.inner.lock().await.transactions.get_mut(signature) {
            record.parsed = true;
        }
        Ok(())
    }

    async fn is_raw_fetched(&self, signature: &str) -> Result<bool> {
        Ok(self
            .inner
            .lock()
            .await
            .transactions
            .get(signature)
            .is_some_and(|record| record.raw.is_some()))
    }

    async fn is_parsed(&self, signature: &str) -> Result<bool> {
        Ok(self
            .inner
            .lock()
            .await
            .transactions
            .get(signature)
            .is_some_and(|record| record.parsed))
    }

    async fn associate_transaction_with_program(
        &self,
        signature: &str,
        program_id: &str,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.programs.insert(program_id.to_string());
        inner
            .associations
            .insert((program_id.to_string(), signature.to_string()));
        Ok(())
    }

    async fn save_event(&self, event: &Event) -> Result<()> {
        self.inner
            .lock()
            .await
            .events
            .insert((event.signature.clone(), event.log_index), event.clone());
        Ok(())
    }

    async fn get_latest_saved_signature(&self, program_id: &str) -> Result<Option<String>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .associations
            .iter()
            .filter(|(program, _)| program == program_id)
            .filter_map(|(_, sig)| inner.transactions.get(sig))
            .max_by_key(|record| (record.block_time, record.slot))
            .map(|record| record.signature.clone()))
    }

    async fn get_ordered_no_raw_signatures(&self) -> Result<Vec<String>> {
        let inner = self.inner.lock().await;
        let mut pending: Vec<&TransactionRecord> = inner
            .transactions
            .values()
            .filter(|record| record.raw.is_none())
            .collect();
        pending.sort_by(|a, b| a.slot.cmp(&b.slot).then_with(|| a.signature.cmp(&b.signature)));
        Ok(pending.into_iter().map(|r| r.signature.clone()).collect())
    }
}
