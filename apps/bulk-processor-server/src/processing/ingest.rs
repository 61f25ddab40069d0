//! Row ingestion pipeline
//!
//! Two passes over the source: the first counts rows so `total` is known up
//! front, the second streams records into a [`RecordSink`] in batches of
//! [`INGEST_BATCH_SIZE`]. Up to `INGEST_BATCH_SIZE - 1` records may be lost if
//! the process dies between flushes; re-running on the same file duplicates
//! whatever was already committed unless the caller discards it first.

use std::path::Path;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::rows::RowSource;
use super::{Checkpoint, ProcessingError, Result};

/// Records per committed batch
pub const INGEST_BATCH_SIZE: usize = 100;

/// One ingested row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRecord {
    pub task_id: String,
    /// 1-based position in the source file
    pub row_number: i64,
    /// Cells joined with `,`
    pub payload: String,
}

/// Destination of ingested rows.
///
/// `write_batch` appends the records and commits them as one unit.
pub trait RecordSink: Send + Sync {
    fn write_batch(&self, records: &[DataRecord]) -> std::result::Result<(), String>;
}

/// Sink keeping committed batches in memory
#[derive(Default)]
pub struct MemoryRecordSink {
    batches: Mutex<Vec<Vec<DataRecord>>>,
}

impl MemoryRecordSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sizes of the committed batches, in commit order
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().iter().map(Vec::len).collect()
    }

    pub fn records(&self) -> Vec<DataRecord> {
        self.batches.lock().iter().flatten().cloned().collect()
    }
}

impl RecordSink for MemoryRecordSink {
    fn write_batch(&self, records: &[DataRecord]) -> std::result::Result<(), String> {
        self.batches.lock().push(records.to_vec());
        Ok(())
    }
}

/// Result of an ingestion run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestSummary {
    pub rows_written: u64,
    pub total: u64,
}

/// Stream every row of `path` into `sink`, tagging records with `task_id`
pub fn ingest(
    path: &Path,
    task_id: Uuid,
    sink: &dyn RecordSink,
    checkpoint: &dyn Checkpoint,
) -> Result<IngestSummary> {
    let source = RowSource::open(path)?;
    let total = source.count()?;

    if total == 0 {
        return Ok(IngestSummary {
            rows_written: 0,
            total: 0,
        });
    }

    let task_id = task_id.to_string();
    let mut batch = Vec::with_capacity(INGEST_BATCH_SIZE);
    let mut rows_written = 0u64;

    source.for_each_row(|index, row| {
        let row_number = index + 1;
        batch.push(DataRecord {
            task_id: task_id.clone(),
            row_number: row_number as i64,
            payload: row.join(","),
        });

        if batch.len() == INGEST_BATCH_SIZE {
            flush(sink, &mut batch, &mut rows_written)?;
        }

        checkpoint.checkpoint(row_number, total, "Processing row")
    })?;

    flush(sink, &mut batch, &mut rows_written)?;

    tracing::debug!(task_id = %task_id, rows = rows_written, "Ingestion finished");

    Ok(IngestSummary {
        rows_written,
        total,
    })
}

fn flush(sink: &dyn RecordSink, batch: &mut Vec<DataRecord>, written: &mut u64) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }
    sink.write_batch(batch).map_err(ProcessingError::Sink)?;
    *written += batch.len() as u64;
    batch.clear();
    Ok(())
}
