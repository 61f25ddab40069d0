//! Chunked Upload Module
//!
//! Implements resumable large file uploads with:
//! - Strictly ordered chunk appends into one blob per session
//! - Session state persisted next to the blob
//! - Atomic promotion of the finished blob to a permanent path
//!
//! Protocol Flow:
//! 1. Client opens a session with the file name
//! 2. Client sends chunks 0..total_chunks in order, retrying the exact next
//!    chunk on failure
//! 3. Client completes the session and receives a task ID for processing

pub mod chunk_store;
pub mod session;
pub mod types;

pub use chunk_store::{ChunkStorage, ChunkStore};
pub use session::SessionManager;
pub use types::*;
