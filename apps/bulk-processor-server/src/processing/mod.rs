//! Processing algorithms run inside tasks
//!
//! - `ingest`: stream rows into a record sink in batches
//! - `masking` / `mask_file`: column classification and PII masking
//! - `split`: size-bounded splitting with archive packaging
//!
//! Algorithms are synchronous and report through a [`Checkpoint`], which is
//! where progress is published and cancellation is observed.

pub mod ingest;
pub mod mask_file;
pub mod masking;
pub mod rows;
pub mod split;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use uuid::Uuid;

use crate::tasks::{TaskKind, TaskOutcome, TaskProcessor};

pub use ingest::{DataRecord, IngestSummary, MemoryRecordSink, RecordSink, INGEST_BATCH_SIZE};
pub use masking::{ColumnRules, MaskKind};
pub use rows::RowSource;
pub use split::{SplitOutput, SplitSource};

/// Progress is reported every this many units, and on the final one
pub const PROGRESS_INTERVAL: u64 = 10;

/// Errors raised inside a processing algorithm
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("input is empty: {0}")]
    EmptyInput(String),

    #[error("invalid size limit: {0} bytes")]
    InvalidLimit(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(String),

    #[error("PDF error: {0}")]
    Pdf(String),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Record sink error: {0}")]
    Sink(String),

    #[error("task cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, ProcessingError>;

/// Hook an algorithm calls after every processed unit
pub trait Checkpoint: Send + Sync {
    /// Report that `current` of `total` units are done.
    ///
    /// Implementations decide whether this unit is a reporting point (see
    /// [`is_checkpoint`]) and return `Err(ProcessingError::Cancelled)` when
    /// the task should stop there.
    fn checkpoint(&self, current: u64, total: u64, label: &str) -> Result<()>;
}

/// Checkpoint that never reports and never cancels, for direct calls
pub struct NoopCheckpoint;

impl Checkpoint for NoopCheckpoint {
    fn checkpoint(&self, _current: u64, _total: u64, _label: &str) -> Result<()> {
        Ok(())
    }
}

/// Whether unit `current` of `total` is a progress/cancellation point
pub fn is_checkpoint(current: u64, total: u64) -> bool {
    current == total || current % PROGRESS_INTERVAL == 0
}

/// Lower-cased suffix of a path, with the leading dot
pub(crate) fn suffix_of(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

pub(crate) fn ensure_exists(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(ProcessingError::FileNotFound(path.display().to_string()))
    }
}

// ============================================================================
// File Processor
// ============================================================================

/// Runs the three processing kinds against files on local disk
pub struct FileProcessor {
    output_dir: PathBuf,
    split_part_size: u64,
    sink: Arc<dyn RecordSink>,
}

impl FileProcessor {
    pub fn new(output_dir: PathBuf, split_part_size: u64, sink: Arc<dyn RecordSink>) -> Self {
        Self {
            output_dir,
            split_part_size,
            sink,
        }
    }
}

impl TaskProcessor for FileProcessor {
    fn run(
        &self,
        task_id: Uuid,
        kind: TaskKind,
        path: &Path,
        checkpoint: &dyn Checkpoint,
    ) -> Result<TaskOutcome> {
        match kind {
            TaskKind::Ingest => {
                let summary = ingest::ingest(path, task_id, self.sink.as_ref(), checkpoint)?;
                if summary.total == 0 {
                    return Ok(TaskOutcome::no_rows());
                }
                Ok(TaskOutcome {
                    current: summary.rows_written,
                    total: summary.total,
                    message: "completed".to_string(),
                    output_file: None,
                })
            }
            TaskKind::Mask => mask_file::mask_file(path, &self.output_dir, task_id, checkpoint),
            TaskKind::Split => {
                let output = split::split_file_and_build_zip(
                    path,
                    &self.output_dir,
                    &task_id.to_string(),
                    self.split_part_size,
                    checkpoint,
                )?;
                let parts = output.part_paths.len() as u64;
                let archive_name = output
                    .archive_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned());
                Ok(TaskOutcome::completed(parts, archive_name))
            }
        }
    }
}
