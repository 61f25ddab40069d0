//! Progress Channel
//!
//! Fan-out publish/subscribe of [`ProgressEvent`]s keyed by task ID, built on
//! `tokio::sync::broadcast`. Delivery is best-effort and at most once: there
//! is no replay, so a subscriber only sees events published after it
//! subscribed. Publishing never blocks and never fails the caller.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::types::ProgressEvent;

/// Per-task buffer; a subscriber lagging further than this skips ahead
const CHANNEL_CAPACITY: usize = 64;

/// Process-scoped progress channel, cloned into every component that
/// publishes or subscribes
#[derive(Clone, Default)]
pub struct ProgressChannel {
    topics: Arc<RwLock<HashMap<Uuid, broadcast::Sender<ProgressEvent>>>>,
}

impl ProgressChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Broadcast an event to the current subscribers of `task_id`.
    ///
    /// Returns the number of subscribers reached. Having none is not an error.
    pub fn publish(&self, task_id: Uuid, event: ProgressEvent) -> usize {
        let topics = self.topics.read();
        match topics.get(&task_id) {
            Some(sender) => sender.send(event).unwrap_or(0),
            None => 0,
        }
    }

    /// Subscribe to events for `task_id` published from now on
    pub fn subscribe(&self, task_id: Uuid) -> broadcast::Receiver<ProgressEvent> {
        if let Some(sender) = self.topics.read().get(&task_id) {
            return sender.subscribe();
        }

        let mut topics = self.topics.write();
        topics
            .entry(task_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Drop the topic for a finished task; open subscriptions then end after
    /// draining what was already published
    pub fn close(&self, task_id: Uuid) {
        self.topics.write().remove(&task_id);
    }

    /// Drop topics nobody is listening to.
    ///
    /// Returns the number of topics removed.
    pub fn prune_idle(&self) -> usize {
        let mut topics = self.topics.write();
        let before = topics.len();
        topics.retain(|_, sender| sender.receiver_count() > 0);
        before - topics.len()
    }

    pub fn topic_count(&self) -> usize {
        self.topics.read().len()
    }
}
