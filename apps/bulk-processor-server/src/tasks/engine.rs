//! Task Engine
//!
//! Runs processing algorithms as background tasks. Each submitted task gets
//! a record in the [`TaskStore`], a cancel flag and a topic on the
//! [`ProgressChannel`].
//!
//! Flow for one task:
//! 1. `submit` inserts a PENDING record and spawns a tokio task
//! 2. The tokio task waits for a concurrency permit, moves the record to
//!    PROGRESS and hands the algorithm to a blocking thread
//! 3. The algorithm calls [`Checkpoint::checkpoint`] after every unit; on
//!    reporting units the context updates the record, publishes the event
//!    and observes the cancel flag
//! 4. The result is written as SUCCESS/FAILURE, a final event is published
//!    and the topic is closed
//!
//! `cancel` revokes the record immediately. The algorithm notices at its next
//! checkpoint; anything it writes to the record afterwards is dropped by the
//! store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, Semaphore};
use uuid::Uuid;

use super::progress::ProgressChannel;
use super::store::TaskStore;
use super::types::{ProgressEvent, TaskKind, TaskOutcome, TaskRecord, TaskState, TaskStatus};
use crate::processing::{self, is_checkpoint, Checkpoint, ProcessingError};

/// Interval between task record cleanup sweeps
const CLEANUP_INTERVAL_SECS: u64 = 600;

/// Executes one processing kind against a file
pub trait TaskProcessor: Send + Sync + 'static {
    fn run(
        &self,
        task_id: Uuid,
        kind: TaskKind,
        path: &Path,
        checkpoint: &dyn Checkpoint,
    ) -> processing::Result<TaskOutcome>;
}

// ============================================================================
// Engine
// ============================================================================

/// Background task runner, cheap to clone
#[derive(Clone)]
pub struct TaskEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    store: TaskStore,
    channel: ProgressChannel,
    cancel_flags: Mutex<HashMap<Uuid, Arc<AtomicBool>>>,
    permits: Arc<Semaphore>,
    processor: Arc<dyn TaskProcessor>,
}

impl TaskEngine {
    pub fn new(
        processor: Arc<dyn TaskProcessor>,
        channel: ProgressChannel,
        max_concurrent_tasks: usize,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                store: TaskStore::new(),
                channel,
                cancel_flags: Mutex::new(HashMap::new()),
                permits: Arc::new(Semaphore::new(max_concurrent_tasks.max(1))),
                processor,
            }),
        }
    }

    /// Queue `path` for processing and return the new task ID.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, kind: TaskKind, path: PathBuf) -> Uuid {
        let task_id = Uuid::new_v4();
        let cancelled = Arc::new(AtomicBool::new(false));

        self.inner.store.insert(TaskRecord::new(task_id, kind));
        self.inner
            .cancel_flags
            .lock()
            .insert(task_id, cancelled.clone());

        tracing::info!(
            task_id = %task_id,
            kind = %kind,
            path = %path.display(),
            "Task submitted"
        );

        let engine = self.clone();
        tokio::spawn(async move {
            engine.execute(task_id, kind, path, cancelled).await;
        });

        task_id
    }

    /// Request cancellation of a task.
    ///
    /// Returns `true` when the task was moved to REVOKED. Unknown and
    /// already-terminal tasks return `false` without any other effect.
    pub fn cancel(&self, task_id: Uuid) -> bool {
        if let Some(flag) = self.inner.cancel_flags.lock().get(&task_id) {
            flag.store(true, Ordering::Release);
        }

        if !self.inner.store.revoke(task_id) {
            tracing::debug!(task_id = %task_id, "Cancel ignored for unknown or finished task");
            return false;
        }

        let (current, total) = self.last_position(task_id);
        self.inner
            .channel
            .publish(task_id, ProgressEvent::new(current, total, "revoked"));
        self.inner.channel.close(task_id);

        tracing::info!(task_id = %task_id, "Task revoked");
        true
    }

    pub fn status(&self, task_id: Uuid) -> Option<TaskStatus> {
        self.inner.store.get(task_id).map(|record| TaskStatus::from(&record))
    }

    pub fn record(&self, task_id: Uuid) -> Option<TaskRecord> {
        self.inner.store.get(task_id)
    }

    /// Subscribe to progress events published for `task_id` from now on
    pub fn subscribe(&self, task_id: Uuid) -> broadcast::Receiver<ProgressEvent> {
        self.inner.channel.subscribe(task_id)
    }

    /// Number of tasks currently holding a concurrency permit or waiting
    pub fn active_count(&self) -> usize {
        self.inner.cancel_flags.lock().len()
    }

    /// Remove finished task records older than `retention_hours`
    pub fn cleanup_finished(&self, retention_hours: i64) -> usize {
        let cutoff = chrono::Utc::now() - chrono::Duration::hours(retention_hours);
        let removed = self.inner.store.purge_finished_before(cutoff);
        let idle = self.inner.channel.prune_idle();

        if removed > 0 || idle > 0 {
            tracing::debug!(
                removed_tasks = removed,
                idle_topics = idle,
                "Task cleanup complete"
            );
        }
        removed
    }

    /// Start background cleanup task
    pub fn start_cleanup_task(self, retention_hours: i64) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(CLEANUP_INTERVAL_SECS));

            loop {
                interval.tick().await;
                self.cleanup_finished(retention_hours);
            }
        })
    }

    async fn execute(&self, task_id: Uuid, kind: TaskKind, path: PathBuf, cancelled: Arc<AtomicBool>) {
        let permit = match self.inner.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                tracing::error!(task_id = %task_id, "Task engine shut down before task started");
                self.inner.store.revoke(task_id);
                self.inner.channel.close(task_id);
                self.forget(task_id);
                return;
            }
        };

        let started = self.inner.store.transition(task_id, TaskState::Progress, |record| {
            record.progress = Some(ProgressEvent::new(0, 0, "started"));
        });
        if !started {
            tracing::debug!(task_id = %task_id, "Task revoked before it started");
            self.forget(task_id);
            return;
        }

        tracing::debug!(task_id = %task_id, kind = %kind, "Task started");

        let context = TaskContext {
            task_id,
            store: self.inner.store.clone(),
            channel: self.inner.channel.clone(),
            cancelled,
        };
        let processor = self.inner.processor.clone();

        let joined = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            processor.run(task_id, kind, &path, &context)
        })
        .await;

        match joined {
            Ok(Ok(outcome)) => self.finish_succeeded(task_id, outcome),
            Ok(Err(ProcessingError::Cancelled)) => {
                tracing::info!(task_id = %task_id, "Task stopped at checkpoint after cancel");
            }
            Ok(Err(e)) => self.finish_failed(task_id, e.to_string()),
            Err(e) => {
                let reason = if e.is_panic() {
                    "task panicked".to_string()
                } else {
                    format!("task aborted: {}", e)
                };
                self.finish_failed(task_id, reason);
            }
        }

        self.forget(task_id);
    }

    fn finish_succeeded(&self, task_id: Uuid, outcome: TaskOutcome) {
        let event = ProgressEvent::new(outcome.current, outcome.total, outcome.message.clone());
        let output_file = outcome.output_file.clone();

        if self.inner.store.succeed(task_id, outcome) {
            self.inner.channel.publish(task_id, event);
            self.inner.channel.close(task_id);
            tracing::info!(
                task_id = %task_id,
                output_file = ?output_file,
                "Task completed"
            );
        }
    }

    fn finish_failed(&self, task_id: Uuid, error: String) {
        let (current, total) = self.last_position(task_id);

        if self.inner.store.fail(task_id, error.clone()) {
            self.inner
                .channel
                .publish(task_id, ProgressEvent::new(current, total, error.clone()));
            self.inner.channel.close(task_id);
            tracing::warn!(task_id = %task_id, error = %error, "Task failed");
        }
    }

    fn last_position(&self, task_id: Uuid) -> (u64, u64) {
        self.inner
            .store
            .get(task_id)
            .and_then(|record| record.progress)
            .map(|p| (p.current, p.total))
            .unwrap_or((0, 0))
    }

    fn forget(&self, task_id: Uuid) {
        self.inner.cancel_flags.lock().remove(&task_id);
    }
}

// ============================================================================
// Checkpoint Context
// ============================================================================

/// Per-task checkpoint handed to the running algorithm
struct TaskContext {
    task_id: Uuid,
    store: TaskStore,
    channel: ProgressChannel,
    cancelled: Arc<AtomicBool>,
}

impl Checkpoint for TaskContext {
    fn checkpoint(&self, current: u64, total: u64, label: &str) -> processing::Result<()> {
        if !is_checkpoint(current, total) {
            return Ok(());
        }

        let event = ProgressEvent::new(current, total, format!("{} {}/{}", label, current, total));
        if self.store.set_progress(self.task_id, event.clone()) {
            self.channel.publish(self.task_id, event);
        }

        if self.cancelled.load(Ordering::Acquire) {
            return Err(ProcessingError::Cancelled);
        }
        Ok(())
    }
}
