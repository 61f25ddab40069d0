//! Task state store
//!
//! Holds one `TaskRecord` per submitted task. Every write goes through
//! [`TaskStore::transition`], which enforces the state machine: once a record
//! is terminal, later writes are dropped. That is what makes a late progress
//! update from a revoked worker harmless.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use super::types::{ProgressEvent, TaskOutcome, TaskRecord, TaskState};

/// Shared task record store
#[derive(Clone, Default)]
pub struct TaskStore {
    records: Arc<RwLock<HashMap<Uuid, TaskRecord>>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: TaskRecord) {
        self.records.write().insert(record.id, record);
    }

    /// Snapshot of a task record
    pub fn get(&self, id: Uuid) -> Option<TaskRecord> {
        self.records.read().get(&id).cloned()
    }

    pub fn state(&self, id: Uuid) -> Option<TaskState> {
        self.records.read().get(&id).map(|r| r.state)
    }

    /// Move a task to `next`, applying `update` to the record.
    ///
    /// Returns `false` (and changes nothing) when the task is unknown or the
    /// transition is not allowed from its current state.
    pub fn transition<F>(&self, id: Uuid, next: TaskState, update: F) -> bool
    where
        F: FnOnce(&mut TaskRecord),
    {
        let mut records = self.records.write();
        let Some(record) = records.get_mut(&id) else {
            return false;
        };

        if !record.state.can_transition_to(next) {
            tracing::trace!(
                task_id = %id,
                from = %record.state,
                to = %next,
                "Dropped task state write"
            );
            return false;
        }

        record.state = next;
        update(record);
        record.updated_at = Utc::now();
        true
    }

    pub fn set_progress(&self, id: Uuid, event: ProgressEvent) -> bool {
        self.transition(id, TaskState::Progress, |record| {
            record.progress = Some(event);
        })
    }

    pub fn succeed(&self, id: Uuid, outcome: TaskOutcome) -> bool {
        self.transition(id, TaskState::Success, |record| {
            record.progress = Some(ProgressEvent::new(
                outcome.current,
                outcome.total,
                outcome.message,
            ));
            record.output_file = outcome.output_file;
        })
    }

    pub fn fail(&self, id: Uuid, error: String) -> bool {
        self.transition(id, TaskState::Failure, |record| {
            record.error = Some(error);
        })
    }

    pub fn revoke(&self, id: Uuid) -> bool {
        self.transition(id, TaskState::Revoked, |_| {})
    }

    /// Drop terminal records last updated before `cutoff`.
    ///
    /// Returns the number of records removed.
    pub fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|_, r| !(r.state.is_terminal() && r.updated_at < cutoff));
        before - records.len()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}
