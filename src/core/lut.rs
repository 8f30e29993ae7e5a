//! Address lookup table resolution with a shared TTL cache.
//!
//! Versioned transactions reference accounts through lookup tables. Before an
//! inner instruction's account indexes can be dereferenced, every table the
//! message references has to be loaded. Bursts of transactions tend to share
//! tables, so concurrent resolutions of one table collapse into one fetch.

use crate::utils::error::{IngestorError, Result};
use crate::utils::rpc::RpcProvider;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

const COUNT_OFFSET: usize = 4;
const ADDRESSES_OFFSET: usize = 8;
const ADDRESS_LEN: usize = 32;

/// Parses lookup table account data.
///
/// The address count is a little-endian `u32` at byte 4 and addresses follow
/// from byte 8. When the count claims more addresses than the data holds, the
/// list is truncated to what is present.
///
/// # Errors
///
/// Returns [`IngestorError::LookupTableError`] if fewer than eight bytes are given.
pub fn parse_lookup_table(data: &[u8]) -> Result<Vec<Pubkey>> {
    if data.len() < ADDRESSES_OFFSET {
        return Err(IngestorError::LookupTableError(format!(
            "lookup table data too short: {} bytes",
            data.len()
        )));
    }

    let mut count_bytes = [0u8; 4];
    count_bytes.copy_from_slice(&data[COUNT_OFFSET..ADDRESSES_OFFSET]);
    let claimed = u32::from_le_bytes(count_bytes) as usize;

    let available = (data.len() - ADDRESSES_OFFSET) / ADDRESS_LEN;
    if claimed > available {
        tracing::warn!(claimed, available, "Lookup table truncated");
    }

    Ok(data[ADDRESSES_OFFSET..]
        .chunks_exact(ADDRESS_LEN)
        .take(claimed.min(available))
        .map(|chunk| {
            let mut bytes = [0u8; ADDRESS_LEN];
            bytes.copy_from_slice(chunk);
            Pubkey::new_from_array(bytes)
        })
        .collect())
}

/// One lookup-table reference of a versioned message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLookup {
    pub table: Pubkey,
    pub writable_indexes: Vec<u8>,
    pub readonly_indexes: Vec<u8>,
}

impl TableLookup {
    fn max_index(&self) -> Option<usize> {
        self.writable_indexes
            .iter()
            .chain(&self.readonly_indexes)
            .max()
            .map(|&i| i as usize)
    }
}

/// Addresses loaded from lookup tables, in message order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedAddresses {
    pub writable: Vec<Pubkey>,
    pub readonly: Vec<Pubkey>,
}

struct CachedTable {
    addresses: Arc<Vec<Pubkey>>,
    fetched_at: Instant,
}

impl CachedTable {
    fn covers(&self, required_max_index: usize, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl && required_max_index < self.addresses.len()
    }
}

/// Cache of lookup table contents keyed by table address.
pub struct LutCache {
    rpc: Arc<dyn RpcProvider>,
    ttl: Duration,
    tables: RwLock<HashMap<Pubkey, CachedTable>>,
    fetch_lock: Mutex<()>,
}

impl LutCache {
    pub fn new(rpc: Arc<dyn RpcProvider>, ttl: Duration) -> Self {
        Self {
            rpc,
            ttl,
            tables: RwLock::new(HashMap::new()),
            fetch_lock: Mutex::new(()),
        }
    }

    /// Returns the addresses of `table`, fetching them when the cached copy is
    /// expired or does not reach `required_max_index`.
    ///
    /// # Errors
    ///
    /// Propagates the account read error, or a parse error for malformed data.
    pub async fn resolve(
        &self,
        table: &Pubkey,
        required_max_index: usize,
    ) -> Result<Arc<Vec<Pubkey>>> {
        if let Some(hit) = self.cached(table, required_max_index).await {
            return Ok(hit);
        }

        let _guard = self.fetch_lock.lock().await;

        // Another caller may have fetched while we waited for the lock.
        if let Some(hit) = self.cached(table, required_max_index).await {
            return Ok(hit);
        }

        let data = self
            .rpc
            .get_account_data(table, Some(CommitmentConfig::finalized()))
            .await?;
        let addresses = Arc::new(parse_lookup_table(&data)?);

        tracing::debug!(
            table = %table,
            count = addresses.len(),
            "Fetched lookup table"
        );

        self.tables.write().await.insert(
            *table,
            CachedTable {
                addresses: addresses.clone(),
                fetched_at: Instant::now(),
            },
        );

        Ok(addresses)
    }

    async fn cached(&self, table: &Pubkey, required_max_index: usize) -> Option<Arc<Vec<Pubkey>>> {
        let tables = self.tables.read().await;
        tables
            .get(table)
            .filter(|entry| entry.covers(required_max_index, self.ttl))
            .map(|entry| entry.addresses.clone())
    }

    /// Resolves every lookup of a message into its loaded writable and
    /// readonly addresses.
    ///
    /// # Errors
    ///
    /// Fails if a table cannot be fetched or parsed, or if an index points
    /// past the end of its table.
    pub async fn resolve_lookups(&self, lookups: &[TableLookup]) -> Result<LoadedAddresses> {
        let mut loaded = LoadedAddresses::default();

        for lookup in lookups {
            let Some(max_index) = lookup.max_index() else {
                continue;
            };
            let addresses = self.resolve(&lookup.table, max_index).await?;

            let pick = |index: &u8| {
                addresses.get(*index as usize).copied().ok_or_else(|| {
                    IngestorError::LookupTableError(format!(
                        "index {index} out of range for table {} with {} addresses",
                        lookup.table,
                        addresses.len()
                    ))
                })
            };

            for index in &lookup.writable_indexes {
                loaded.writable.push(pick(index)?);
            }
            for index in &lookup.readonly_indexes {
                loaded.readonly.push(pick(index)?);
            }
        }

        Ok(loaded)
    }

    /// Number of cached tables.
    pub async fn len(&self) -> usize {
        self.tables.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tables.read().await.is_empty()
    }
}
