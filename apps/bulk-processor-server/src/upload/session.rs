//! Upload Session Manager
//!
//! Owns the resumable upload protocol:
//! - Strict in-order chunk delivery, no reordering buffer
//! - `total_chunks` fixed by the first chunk
//! - Completion moves the blob to its permanent path and forgets the session
//!
//! Sessions live in memory with their state mirrored to the chunk store, so a
//! lookup miss falls back to the persisted sidecar. Abandoned sessions are
//! never collected here; cleanup is left to an external policy.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::chunk_store::ChunkStore;
use super::types::{validate_filename, UploadError, UploadSession};
use crate::tasks::TaskKind;

// ============================================================================
// Session Manager
// ============================================================================

type SessionSlot = Arc<Mutex<Option<UploadSession>>>;

/// Manages upload sessions
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionManagerInner>,
}

struct SessionManagerInner {
    /// Active sessions indexed by ID. The map lock is only held for lookup;
    /// each session is serialized by its own mutex.
    sessions: RwLock<HashMap<Uuid, SessionSlot>>,

    chunk_store: ChunkStore,
}

impl SessionManager {
    /// Create a new session manager on top of a chunk store
    pub fn new(chunk_store: ChunkStore) -> Self {
        Self {
            inner: Arc::new(SessionManagerInner {
                sessions: RwLock::new(HashMap::new()),
                chunk_store,
            }),
        }
    }

    // ========================================================================
    // Session Lifecycle
    // ========================================================================

    /// Open a new session for a file destined for `kind`
    pub async fn init(&self, filename: &str, kind: TaskKind) -> Result<UploadSession, UploadError> {
        let suffix = validate_filename(filename, kind)?;
        let session = UploadSession::new(filename.trim().to_string(), suffix, kind);

        self.inner.chunk_store.create_blob(session.id).await?;
        self.inner.chunk_store.save_session(&session).await?;

        {
            let mut sessions = self.inner.sessions.write().await;
            sessions.insert(session.id, Arc::new(Mutex::new(Some(session.clone()))));
        }

        tracing::info!(
            session_id = %session.id,
            file_name = %session.declared_filename,
            kind = %kind,
            "Created upload session"
        );

        Ok(session)
    }

    /// Append the next chunk of a session.
    ///
    /// Returns the number of bytes received in this chunk. On any error the
    /// session state is left untouched.
    pub async fn append_chunk(
        &self,
        session_id: Uuid,
        chunk_index: u32,
        total_chunks: u32,
        data: &[u8],
    ) -> Result<u64, UploadError> {
        let slot = self.slot(session_id).await?;
        let mut guard = slot.lock().await;
        let session = guard
            .as_mut()
            .ok_or_else(|| UploadError::SessionNotFound(session_id.to_string()))?;

        session.validate_chunk(chunk_index, total_chunks)?;

        let received = self
            .inner
            .chunk_store
            .append(session_id, session.received_bytes, data)
            .await?;

        let mut updated = session.clone();
        updated.advance(total_chunks, received);
        self.inner.chunk_store.save_session(&updated).await?;
        *session = updated;

        tracing::debug!(
            session_id = %session_id,
            chunk_index = chunk_index,
            total_chunks = total_chunks,
            received_bytes = received,
            "Chunk appended"
        );

        Ok(received)
    }

    /// Finish a session and return the permanent path of the uploaded file.
    ///
    /// A second call for the same ID fails with `SessionNotFound`.
    pub async fn complete(&self, session_id: Uuid) -> Result<(UploadSession, PathBuf), UploadError> {
        let slot = self.slot(session_id).await?;
        let mut guard = slot.lock().await;
        let session = guard
            .as_ref()
            .ok_or_else(|| UploadError::SessionNotFound(session_id.to_string()))?;

        if !session.is_complete() {
            return Err(UploadError::IncompleteUpload {
                received: session.next_chunk_index,
                expected: session
                    .total_chunks
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
            });
        }

        let path = self.inner.chunk_store.promote(session).await?;
        let finished = guard.take().ok_or_else(|| {
            UploadError::SessionNotFound(session_id.to_string())
        })?;
        drop(guard);

        {
            let mut sessions = self.inner.sessions.write().await;
            sessions.remove(&session_id);
        }

        tracing::info!(
            session_id = %session_id,
            file_name = %finished.declared_filename,
            size = finished.received_bytes,
            path = %path.display(),
            "Upload session completed"
        );

        Ok((finished, path))
    }

    /// Abandon a session on client request, deleting its blob and state
    pub async fn abort(&self, session_id: Uuid) -> Result<(), UploadError> {
        let slot = self.slot(session_id).await?;
        let mut guard = slot.lock().await;
        if guard.is_none() {
            return Err(UploadError::SessionNotFound(session_id.to_string()));
        }

        self.inner.chunk_store.discard(session_id).await?;
        *guard = None;
        drop(guard);

        {
            let mut sessions = self.inner.sessions.write().await;
            sessions.remove(&session_id);
        }

        tracing::info!(session_id = %session_id, "Upload session aborted");
        Ok(())
    }

    /// Get a snapshot of a session
    pub async fn get(&self, session_id: Uuid) -> Result<UploadSession, UploadError> {
        let slot = self.slot(session_id).await?;
        let guard = slot.lock().await;
        guard
            .clone()
            .ok_or_else(|| UploadError::SessionNotFound(session_id.to_string()))
    }

    /// Parse a client-supplied session ID
    pub fn parse_id(id: &str) -> Result<Uuid, UploadError> {
        Uuid::parse_str(id.trim()).map_err(|_| UploadError::SessionNotFound(id.to_string()))
    }

    /// Get session count
    pub async fn session_count(&self) -> usize {
        let sessions = self.inner.sessions.read().await;
        sessions.len()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Find the slot of a session, recovering it from the chunk store if this
    /// process has not seen it yet
    async fn slot(&self, session_id: Uuid) -> Result<SessionSlot, UploadError> {
        {
            let sessions = self.inner.sessions.read().await;
            if let Some(slot) = sessions.get(&session_id) {
                return Ok(slot.clone());
            }
        }

        let recovered = self
            .inner
            .chunk_store
            .load_session(session_id)
            .await?
            .ok_or_else(|| UploadError::SessionNotFound(session_id.to_string()))?;

        tracing::info!(session_id = %session_id, "Recovered upload session from disk");

        let mut sessions = self.inner.sessions.write().await;
        let slot = sessions
            .entry(session_id)
            .or_insert_with(|| Arc::new(Mutex::new(Some(recovered))));
        Ok(slot.clone())
    }
}

// ============================================================================
// Tests
// ============================================================================
