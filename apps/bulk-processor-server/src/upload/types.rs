//! Upload types for the resumable chunked upload protocol

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tasks::TaskKind;

// ============================================================================
// Constants
// ============================================================================

/// Piece size used when streaming a direct (non-chunked) upload to disk: 1MB
pub const STREAM_BUFFER_SIZE: usize = 1024 * 1024;

/// Largest accepted chunk request body, multipart framing included: 16MB
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

// ============================================================================
// Protocol Types
// ============================================================================

/// Request to open a chunked upload session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitRequest {
    /// Original file name, its suffix selects the accepted formats
    pub filename: String,
}

/// Response to a session init request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitResponse {
    pub upload_id: String,
}

/// Response after appending a chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkResponse {
    pub upload_id: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    /// Bytes received in this chunk
    pub received_bytes: u64,
}

/// Request to finish a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteRequest {
    pub upload_id: String,
}

// ============================================================================
// Session Types
// ============================================================================

/// Upload session state
///
/// `next_chunk_index` equals the number of chunks durably appended so far.
/// `total_chunks` is recorded by the first chunk and never changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSession {
    /// Unique session ID
    pub id: Uuid,

    /// Original file name as declared at init
    pub declared_filename: String,

    /// Lower-cased suffix including the dot, e.g. `.pdf`
    pub suffix: String,

    /// Processing the finished upload is destined for
    pub kind: TaskKind,

    pub next_chunk_index: u32,

    pub total_chunks: Option<u32>,

    /// Bytes appended so far
    pub received_bytes: u64,

    pub created_at: DateTime<Utc>,
}

impl UploadSession {
    /// Create a new, empty session
    pub fn new(declared_filename: String, suffix: String, kind: TaskKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            declared_filename,
            suffix,
            kind,
            next_chunk_index: 0,
            total_chunks: None,
            received_bytes: 0,
            created_at: Utc::now(),
        }
    }

    /// Check that a chunk may be appended, without changing anything
    pub fn validate_chunk(&self, chunk_index: u32, total_chunks: u32) -> Result<(), UploadError> {
        if total_chunks == 0 {
            return Err(UploadError::InvalidChunkIndex(
                "total_chunks must be at least 1".to_string(),
            ));
        }

        if chunk_index != self.next_chunk_index {
            return Err(UploadError::OutOfOrderChunk {
                expected: self.next_chunk_index,
                actual: chunk_index,
            });
        }

        if let Some(recorded) = self.total_chunks {
            if recorded != total_chunks {
                return Err(UploadError::TotalChunksMismatch {
                    recorded,
                    declared: total_chunks,
                });
            }
        }

        if chunk_index >= total_chunks {
            return Err(UploadError::InvalidChunkIndex(format!(
                "chunk index {} is outside 0..{}",
                chunk_index, total_chunks
            )));
        }

        Ok(())
    }

    /// Record an appended chunk
    pub fn advance(&mut self, total_chunks: u32, len: u64) {
        self.total_chunks.get_or_insert(total_chunks);
        self.next_chunk_index += 1;
        self.received_bytes += len;
    }

    /// Check if all declared chunks have been received
    pub fn is_complete(&self) -> bool {
        matches!(self.total_chunks, Some(total) if self.next_chunk_index == total)
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Upload error types
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Invalid file name: {0}")]
    InvalidFileName(String),

    #[error("Unsupported file type '{suffix}', expected one of: {allowed}")]
    UnsupportedFileType { suffix: String, allowed: String },

    #[error("Upload session not found: {0}")]
    SessionNotFound(String),

    #[error("Chunk out of order: expected {expected}, got {actual}")]
    OutOfOrderChunk { expected: u32, actual: u32 },

    #[error("total_chunks mismatch: session has {recorded}, chunk declared {declared}")]
    TotalChunksMismatch { recorded: u32, declared: u32 },

    #[error("Invalid chunk index: {0}")]
    InvalidChunkIndex(String),

    #[error("Upload is not complete: received {received} of {expected} chunks")]
    IncompleteUpload { received: u32, expected: String },

    #[error("Upload session belongs to '{session}', not '{requested}'")]
    KindMismatch { session: TaskKind, requested: TaskKind },

    #[error("Corrupt session metadata for {id}: {reason}")]
    CorruptSession { id: String, reason: String },

    #[error("Storage error: {0}")]
    StorageError(String),
}

impl UploadError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::InvalidFileName(_) => StatusCode::BAD_REQUEST,
            Self::UnsupportedFileType { .. } => StatusCode::BAD_REQUEST,
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::OutOfOrderChunk { .. } => StatusCode::CONFLICT,
            Self::TotalChunksMismatch { .. } => StatusCode::BAD_REQUEST,
            Self::InvalidChunkIndex(_) => StatusCode::BAD_REQUEST,
            Self::IncompleteUpload { .. } => StatusCode::BAD_REQUEST,
            Self::KindMismatch { .. } => StatusCode::BAD_REQUEST,
            Self::CorruptSession { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::StorageError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidFileName(_) => "INVALID_FILE_NAME",
            Self::UnsupportedFileType { .. } => "UNSUPPORTED_FILE_TYPE",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::OutOfOrderChunk { .. } => "OUT_OF_ORDER_CHUNK",
            Self::TotalChunksMismatch { .. } => "TOTAL_CHUNKS_MISMATCH",
            Self::InvalidChunkIndex(_) => "INVALID_CHUNK_INDEX",
            Self::IncompleteUpload { .. } => "INCOMPLETE_UPLOAD",
            Self::KindMismatch { .. } => "KIND_MISMATCH",
            Self::CorruptSession { .. } => "CORRUPT_SESSION",
            Self::StorageError(_) => "STORAGE_ERROR",
        }
    }
}

impl From<std::io::Error> for UploadError {
    fn from(err: std::io::Error) -> Self {
        UploadError::StorageError(err.to_string())
    }
}

// ============================================================================
// File Name Validation
// ============================================================================

/// Validate a client-supplied file name and return its lower-cased suffix.
///
/// Rejects empty names, path separators and traversal components, and suffixes
/// the target processing kind does not accept.
pub fn validate_filename(filename: &str, kind: TaskKind) -> Result<String, UploadError> {
    let trimmed = filename.trim();
    if trimmed.is_empty() {
        return Err(UploadError::InvalidFileName("missing filename".to_string()));
    }

    if trimmed.contains(['/', '\\', '\0']) || trimmed == "." || trimmed.starts_with("..") {
        return Err(UploadError::InvalidFileName(filename.to_string()));
    }

    let suffix = match trimmed.rfind('.') {
        Some(pos) if pos > 0 => trimmed[pos..].to_lowercase(),
        _ => String::new(),
    };

    if !kind.accepted_suffixes().contains(&suffix.as_str()) {
        return Err(UploadError::UnsupportedFileType {
            suffix,
            allowed: kind.accepted_suffixes().join(", "),
        });
    }

    Ok(suffix)
}

// ============================================================================
// Stored File Names
// ============================================================================

/// Name a finished upload is stored under: `<32 hex>_<original name>`
pub fn stored_file_name(id: Uuid, filename: &str) -> String {
    format!("{}_{}", id.simple(), filename)
}

/// Recover the original name from a stored upload name. Names that do not
/// carry the upload prefix are returned unchanged.
pub fn original_file_name(stored: &str) -> &str {
    match stored.split_once('_') {
        Some((prefix, rest))
            if prefix.len() == 32 && prefix.bytes().all(|b| b.is_ascii_hexdigit()) && !rest.is_empty() =>
        {
            rest
        }
        _ => stored,
    }
}
