//! Ingested record persistence
//!
//! [`SqliteRecordStore`] is the record sink ingestion tasks write into. The
//! sink interface is synchronous because ingestion runs on a blocking
//! thread; each batch is committed in its own transaction on the runtime
//! captured at construction.

use serde::Serialize;
use sqlx::SqlitePool;
use tokio::runtime::Handle;

use crate::error::Result;
use crate::processing::{DataRecord, RecordSink};

/// Record row as stored
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StoredRecord {
    pub id: i64,
    pub task_id: String,
    pub row_number: i64,
    pub payload: String,
    pub created_at: String,
}

/// Record repository backed by SQLite
#[derive(Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
    runtime: Handle,
}

impl SqliteRecordStore {
    /// Create a store bound to the current tokio runtime
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            runtime: Handle::current(),
        }
    }

    /// Insert records in a single transaction
    pub async fn insert_batch(&self, records: &[DataRecord]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for record in records {
            let result = sqlx::query(
                r#"
                INSERT INTO data_records (task_id, row_number, payload)
                VALUES (?, ?, ?)
                "#,
            )
            .bind(&record.task_id)
            .bind(record.row_number)
            .bind(&record.payload)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// List records in insertion order, optionally for one task
    pub async fn list(&self, task_id: Option<&str>) -> Result<Vec<StoredRecord>> {
        let records = sqlx::query_as::<_, StoredRecord>(
            r#"
            SELECT id, task_id, row_number, payload, created_at
            FROM data_records
            WHERE ? IS NULL OR task_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(task_id)
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    pub async fn count(&self, task_id: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM data_records WHERE task_id = ?")
            .bind(task_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

impl RecordSink for SqliteRecordStore {
    fn write_batch(&self, records: &[DataRecord]) -> std::result::Result<(), String> {
        self.runtime
            .block_on(self.insert_batch(records))
            .map(|inserted| {
                tracing::trace!(rows = inserted, "Committed record batch");
            })
            .map_err(|e| e.to_string())
    }
}
