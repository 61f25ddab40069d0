//! Chunk Store
//!
//! Durable scratch storage for in-flight uploads. Each session owns exactly one
//! append-only blob plus a JSON sidecar with its protocol state, so a session
//! survives a server restart.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use uuid::Uuid;

use super::types::{stored_file_name, UploadError, UploadSession};

// ============================================================================
// Chunk Storage Trait
// ============================================================================

/// Trait for chunk storage backends
#[async_trait::async_trait]
pub trait ChunkStorage: Send + Sync {
    /// Allocate an empty blob for a new session
    async fn create_blob(&self, session_id: Uuid) -> Result<(), UploadError>;

    /// Append bytes to a session blob.
    ///
    /// `offset` is the number of bytes already accounted for by the session;
    /// anything past it (left over from a failed attempt) is discarded first.
    async fn append(&self, session_id: Uuid, offset: u64, data: &[u8]) -> Result<u64, UploadError>;

    /// Persist session protocol state
    async fn save_session(&self, session: &UploadSession) -> Result<(), UploadError>;

    /// Load persisted session state, `None` if the session is unknown
    async fn load_session(&self, session_id: Uuid) -> Result<Option<UploadSession>, UploadError>;

    /// Move the finished blob to its permanent path and drop the session state
    async fn promote(&self, session: &UploadSession) -> Result<PathBuf, UploadError>;

    /// Delete the blob and state of a session
    async fn discard(&self, session_id: Uuid) -> Result<(), UploadError>;
}

// ============================================================================
// Chunk Store
// ============================================================================

/// Chunk store handle shared across request handlers
#[derive(Clone)]
pub struct ChunkStore {
    backend: Arc<dyn ChunkStorage>,
}

impl ChunkStore {
    /// Create with local filesystem storage rooted at the upload directory
    pub fn with_local_storage(base_path: PathBuf) -> Self {
        Self {
            backend: Arc::new(LocalChunkStorage::new(base_path)),
        }
    }

    pub async fn create_blob(&self, session_id: Uuid) -> Result<(), UploadError> {
        self.backend.create_blob(session_id).await
    }

    pub async fn append(&self, session_id: Uuid, offset: u64, data: &[u8]) -> Result<u64, UploadError> {
        self.backend.append(session_id, offset, data).await
    }

    pub async fn save_session(&self, session: &UploadSession) -> Result<(), UploadError> {
        self.backend.save_session(session).await
    }

    pub async fn load_session(&self, session_id: Uuid) -> Result<Option<UploadSession>, UploadError> {
        self.backend.load_session(session_id).await
    }

    pub async fn promote(&self, session: &UploadSession) -> Result<PathBuf, UploadError> {
        self.backend.promote(session).await
    }

    pub async fn discard(&self, session_id: Uuid) -> Result<(), UploadError> {
        self.backend.discard(session_id).await
    }
}

// ============================================================================
// Local Filesystem Storage
// ============================================================================

/// Local filesystem chunk storage
struct LocalChunkStorage {
    base_path: PathBuf,
}

impl LocalChunkStorage {
    fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn sessions_dir(&self) -> PathBuf {
        self.base_path.join(".sessions")
    }

    fn blob_path(&self, session_id: Uuid) -> PathBuf {
        self.sessions_dir().join(format!("{}.part", session_id))
    }

    fn meta_path(&self, session_id: Uuid) -> PathBuf {
        self.sessions_dir().join(format!("{}.json", session_id))
    }

    fn final_path(&self, session: &UploadSession) -> PathBuf {
        self.base_path
            .join(stored_file_name(session.id, &session.declared_filename))
    }
}

#[async_trait::async_trait]
impl ChunkStorage for LocalChunkStorage {
    async fn create_blob(&self, session_id: Uuid) -> Result<(), UploadError> {
        fs::create_dir_all(self.sessions_dir()).await?;
        fs::File::create(self.blob_path(session_id)).await?;
        Ok(())
    }

    async fn append(&self, session_id: Uuid, offset: u64, data: &[u8]) -> Result<u64, UploadError> {
        let path = self.blob_path(session_id);
        let mut file = OpenOptions::new()
            .write(true)
            .open(&path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => UploadError::CorruptSession {
                    id: session_id.to_string(),
                    reason: "session blob is missing".to_string(),
                },
                _ => UploadError::from(e),
            })?;

        file.set_len(offset).await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.sync_data().await?;

        Ok(data.len() as u64)
    }

    async fn save_session(&self, session: &UploadSession) -> Result<(), UploadError> {
        let json = serde_json::to_vec(session)
            .map_err(|e| UploadError::StorageError(e.to_string()))?;

        // Write-then-rename so a crash never leaves a half-written sidecar
        let meta_path = self.meta_path(session.id);
        let tmp_path = meta_path.with_extension("json.tmp");
        fs::write(&tmp_path, json).await?;
        fs::rename(&tmp_path, &meta_path).await?;
        Ok(())
    }

    async fn load_session(&self, session_id: Uuid) -> Result<Option<UploadSession>, UploadError> {
        let raw = match fs::read(self.meta_path(session_id)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let session: UploadSession =
            serde_json::from_slice(&raw).map_err(|e| UploadError::CorruptSession {
                id: session_id.to_string(),
                reason: e.to_string(),
            })?;

        if session.id != session_id {
            return Err(UploadError::CorruptSession {
                id: session_id.to_string(),
                reason: format!("sidecar describes session {}", session.id),
            });
        }

        Ok(Some(session))
    }

    async fn promote(&self, session: &UploadSession) -> Result<PathBuf, UploadError> {
        let final_path = self.final_path(session);
        fs::rename(self.blob_path(session.id), &final_path).await?;
        remove_if_exists(&self.meta_path(session.id)).await?;
        Ok(final_path)
    }

    async fn discard(&self, session_id: Uuid) -> Result<(), UploadError> {
        remove_if_exists(&self.blob_path(session_id)).await?;
        remove_if_exists(&self.meta_path(session_id)).await?;
        Ok(())
    }
}

async fn remove_if_exists(path: &Path) -> Result<(), UploadError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::TaskKind;
    use tempfile::TempDir;

    fn session() -> UploadSession {
        UploadSession::new("large.txt".to_string(), ".txt".to_string(), TaskKind::Split)
    }

    #[tokio::test]
    async fn test_append_and_promote() {
        let temp_dir = TempDir::new().unwrap();
        let store = ChunkStore::with_local_storage(temp_dir.path().to_path_buf());
        let session = session();

        store.create_blob(session.id).await.unwrap();
        assert_eq!(store.append(session.id, 0, b"Hello, ").await.unwrap(), 7);
        assert_eq!(store.append(session.id, 7, b"World!").await.unwrap(), 6);

        let path = store.promote(&session).await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"Hello, World!");
        assert_eq!(path.parent().unwrap(), temp_dir.path());
        assert!(path.to_string_lossy().ends_with("_large.txt"));
    }

    #[tokio::test]
    async fn test_append_discards_stale_tail() {
        let temp_dir = TempDir::new().unwrap();
        let store = ChunkStore::with_local_storage(temp_dir.path().to_path_buf());
        let session = session();

        store.create_blob(session.id).await.unwrap();
        store.append(session.id, 0, b"abc").await.unwrap();
        // a retried chunk lands on the same offset
        store.append(session.id, 3, b"dXX").await.unwrap();
        store.append(session.id, 3, b"def").await.unwrap();

        let path = store.promote(&session).await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn test_session_sidecar_roundtrip_and_corruption() {
        let temp_dir = TempDir::new().unwrap();
        let store = ChunkStore::with_local_storage(temp_dir.path().to_path_buf());
        let mut session = session();
        store.create_blob(session.id).await.unwrap();

        assert!(store.load_session(session.id).await.unwrap().is_none());

        session.advance(4, 10);
        store.save_session(&session).await.unwrap();
        assert_eq!(store.load_session(session.id).await.unwrap(), Some(session.clone()));

        let meta = temp_dir.path().join(".sessions").join(format!("{}.json", session.id));
        tokio::fs::write(&meta, b"{not json").await.unwrap();
        assert!(matches!(
            store.load_session(session.id).await,
            Err(UploadError::CorruptSession { .. })
        ));

        store.discard(session.id).await.unwrap();
        assert!(store.load_session(session.id).await.unwrap().is_none());
    }
}
