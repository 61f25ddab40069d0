//! Application state management

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::Config;
use crate::db::SqliteRecordStore;
use crate::processing::FileProcessor;
use crate::tasks::{ProgressChannel, TaskEngine};
use crate::upload::{ChunkStore, SessionManager};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    sessions: SessionManager,
    engine: TaskEngine,
    records: SqliteRecordStore,
}

impl AppState {
    /// Create a new application state.
    ///
    /// Must be called from within a tokio runtime; the record store binds to
    /// it for writes issued from blocking task threads.
    pub fn new(config: Config, db: SqlitePool) -> Self {
        let records = SqliteRecordStore::new(db);
        let chunk_store = ChunkStore::with_local_storage(config.storage.upload_dir.clone());

        let processor = FileProcessor::new(
            config.storage.output_dir.clone(),
            config.processing.split_part_size,
            Arc::new(records.clone()),
        );
        let engine = TaskEngine::new(
            Arc::new(processor),
            ProgressChannel::new(),
            config.processing.max_concurrent_tasks,
        );

        Self {
            inner: Arc::new(AppStateInner {
                config,
                sessions: SessionManager::new(chunk_store),
                engine,
                records,
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the upload session manager
    pub fn sessions(&self) -> &SessionManager {
        &self.inner.sessions
    }

    /// Get the task engine
    pub fn engine(&self) -> &TaskEngine {
        &self.inner.engine
    }

    /// Get the ingested record store
    pub fn records(&self) -> &SqliteRecordStore {
        &self.inner.records
    }
}
