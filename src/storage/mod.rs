//! Storage boundary for ingested transactions and events.
//!
//! Every write is an upsert on a natural key, so the backfill and realtime
//! paths can observe the same signature without creating duplicates.

pub mod memory;

use crate::types::models::Event;
use crate::utils::error::Result;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::time::Duration;

pub use memory::MemoryStorage;

/// A stored transaction row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub signature: String,
    pub slot: u64,
    pub block_time: i64,
    pub raw: Option<Vec<u8>>,
    pub parsed: bool,
}

/// Abstract interface for storage operations.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Creates the schema if it does not exist.
    async fn initialize(&self) -> Result<()>;

    async fn save_program(&self, program_id: &str) -> Result<()>;

    /// Records a transaction. Re-saving keeps the stored slot and block time
    /// unless the new values are non-zero.
    async fn save_transaction(&self, signature: &str, slot: u64, block_time: i64) -> Result<()>;

    async fn update_transaction_raw(&self, signature: &str, raw: &[u8]) -> Result<()>;

    async fn get_transaction_raw(&self, signature: &str) -> Result<Option<Vec<u8>>>;

    async fn mark_parsed(&self, signature: &str) -> Result<()>;

    async fn is_raw_fetched(&self, signature: &str) -> Result<bool>;

    async fn is_parsed(&self, signature: &str) -> Result<bool>;

    async fn associate_transaction_with_program(
        &self,
        signature: &str,
        program_id: &str,
    ) -> Result<()>;

    /// Upserts on `(signature, log_index)`.
    async fn save_event(&self, event: &Event) -> Result<()>;

    /// Most recent signature associated with `program_id`, by block time.
    async fn get_latest_saved_signature(&self, program_id: &str) -> Result<Option<String>>;

    /// Signatures recorded without a raw body, oldest slot first.
    async fn get_ordered_no_raw_signatures(&self) -> Result<Vec<String>>;
}

fn to_db_slot(slot: u64) -> i64 {
    i64::try_from(slot).unwrap_or(i64::MAX)
}

/// PostgreSQL storage.
///
/// # Example
///
/// ```no_run
/// use solana_event_ingestor::storage::{Storage, StorageBackend};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let storage = Storage::new("postgresql://localhost/ingest").await?;
/// storage.initialize().await?;
/// # Ok(())
/// # }
/// ```
pub struct Storage {
    pool: PgPool,
}

impl Storage {
    /// Connects a pool to `database_url`.
    ///
    /// # Errors
    ///
    /// Returns `IngestorError::DatabaseError` if connection fails.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const SCHEMA: [&str; 6] = [
    r"
    CREATE TABLE IF NOT EXISTS programs (
        id TEXT PRIMARY KEY,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS transactions (
        signature TEXT PRIMARY KEY,
        slot BIGINT NOT NULL,
        block_time BIGINT NOT NULL DEFAULT 0,
        raw BYTEA,
        parsed BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS program_transactions (
        program_id TEXT NOT NULL REFERENCES programs(id),
        signature TEXT NOT NULL REFERENCES transactions(signature),
        PRIMARY KEY (program_id, signature)
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS events (
        signature TEXT NOT NULL REFERENCES transactions(signature),
        log_index INTEGER NOT NULL,
        slot BIGINT NOT NULL,
        block_time BIGINT NOT NULL,
        name TEXT NOT NULL,
        payload JSONB NOT NULL,
        PRIMARY KEY (signature, log_index)
    )
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_transactions_no_raw
    ON transactions(slot) WHERE raw IS NULL
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_program_transactions_signature
    ON program_transactions(signature)
    ",
];

#[async_trait]
impl StorageBackend for Storage {
    async fn initialize(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn save_program(&self, program_id: &str) -> Result<()> {
        sqlx::query("INSERT INTO programs (id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(program_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_transaction(&self, signature: &str, slot: u64, block_time: i64) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO transactions (signature, slot, block_time)
            VALUES ($1, $2, $3)
            ON CONFLICT (signature) DO UPDATE SET
                slot = CASE WHEN EXCLUDED.slot > 0 THEN EXCLUDED.slot ELSE transactions.slot END,
                block_time = CASE WHEN EXCLUDED.block_time <> 0
                    THEN EXCLUDED.block_time ELSE transactions.block_time END
            ",
        )
        .bind(signature)
        .bind(to_db_slot(slot))
        .bind(block_time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_transaction_raw(&self, signature: &str, raw: &[u8]) -> Result<()> {
        sqlx::query("UPDATE transactions SET raw = $2 WHERE signature = $1")
            .bind(signature)
            .bind(raw)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_transaction_raw(&self, signature: &str) -> Result<Option<Vec<u8>>> {
        let raw = sqlx::query_scalar::<_, Option<Vec<u8>>>(
            "SELECT raw FROM transactions WHERE signature = $1",
        )
        .bind(signature)
        .fetch_optional(&self.pool)
        .await?;
        Ok(raw.flatten())
    }

    async fn mark_parsed(&self, signature: &str) -> Result<()> {
        sqlx::query("UPDATE transactions SET parsed = TRUE WHERE signature = $1")
            .bind(signature)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn is_raw_fetched(&self, signature: &str) -> Result<bool> {
        let result = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM transactions WHERE signature = $1 AND raw IS NOT NULL)",
        )
        .bind(signature)
        .fetch_one(&self.pool)
        .await?;
        Ok(result)
    }

    async fn is_parsed(&self, signature: &str) -> Result<bool> {
        let result = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM transactions WHERE signature = $1 AND parsed)",
        )
        .bind(signature)
        .fetch_one(&self.pool)
        .await?;
        Ok(result)
    }

    async fn associate_transaction_with_program(
        &self,
        signature: &str,
        program_id: &str,
    ) -> Result<()> {
        self.save_program(program_id).await?;
        sqlx::query(
            "INSERT INTO program_transactions (program_id, signature) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(program_id)
        .bind(signature)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_event(&self, event: &Event) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO events (signature, log_index, slot, block_time, name, payload)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (signature, log_index) DO UPDATE SET
                slot = EXCLUDED.slot,
                block_time = EXCLUDED.block_time,
                name = EXCLUDED.name,
                payload = EXCLUDED.payload
            ",
        )
        .bind(&event.signature)
        .bind(event.log_index)
        .bind(to_db_slot(event.slot))
        .bind(event.block_time)
        .bind(&event.name)
        .bind(Json(&event.payload))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_latest_saved_signature(&self, program_id: &str) -> Result<Option<String>> {
        let signature = sqlx::query_scalar::<_, String>(
            r"
            SELECT t.signature FROM transactions t
            JOIN program_transactions pt ON pt.signature = t.signature
            WHERE pt.program_id = $1
            ORDER BY t.block_time DESC, t.slot DESC
            LIMIT 1
            ",
        )
        .bind(program_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(signature)
    }

    async fn get_ordered_no_raw_signatures(&self) -> Result<Vec<String>> {
        let signatures = sqlx::query_scalar::<_, String>(
            "SELECT signature FROM transactions WHERE raw IS NULL ORDER BY slot ASC, signature ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(signatures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_url() -> String {
        std::env::var("TEST_DATABASE_URL")
            .unwrap_or_else(|_| "postgresql://localhost/test".to_string())
    }

    #[tokio::test]
    #[ignore = "Requires database connection"]
    async fn test_storage_initialize_is_idempotent() {
        if let Ok(storage) = Storage::new(&db_url()).await {
            assert!(storage.initialize().await.is_ok());
            assert!(storage.initialize().await.is_ok());
        }
    }

    #[tokio::test]
    #[ignore = "Requires database connection"]
    async fn test_transaction_lifecycle() {
        if let Ok(storage) = Storage::new(&db_url()).await {
            storage.initialize().await.unwrap();

            let signature = "pg_lifecycle_signature";
            storage.save_program("pg_program").await.unwrap();
            storage.save_transaction(signature, 10, 0).await.unwrap();
            storage
                .associate_transaction_with_program(signature, "pg_program")
                .await
                .unwrap();
            assert!(!storage.is_raw_fetched(signature).await.unwrap());

            storage.save_transaction(signature, 10, 1_700).await.unwrap();
            storage.update_transaction_raw(signature, b"{}").await.unwrap();
            assert!(storage.is_raw_fetched(signature).await.unwrap());
            assert!(!storage.is_parsed(signature).await.unwrap());

            storage.mark_parsed(signature).await.unwrap();
            assert!(storage.is_parsed(signature).await.unwrap());
            assert_eq!(
                storage.get_latest_saved_signature("pg_program").await.unwrap(),
                Some(signature.to_string())
            );
        }
    }
}
