//! Optimistic action queue.
//!
//! The board controller applies a mutation to its visible state first, then
//! hands the queue an [`OptimisticAction`] describing it together with a
//! [`Rollback`] that can restore the state it replaced. The queue never
//! touches board state itself: it tracks each action until the server
//! confirms it or the save fails, and on failure applies the rollback.
//!
//! ## Lifecycle
//!
//! ```text
//! enqueue ──> Pending ──confirm──> Confirmed ──(grace)──> removed
//!                │
//!                └─────fail─────> Failed ─────(grace)──> removed
//!                                  (rollback applied)
//! ```
//!
//! `confirm` and `fail` are idempotent: calling either on an id that is
//! unknown or already settled is a no-op, so duplicate acknowledgements from
//! an at-least-once transport are harmless.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use crate::config::QueueSection;
use crate::errors::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Create,
    Update,
    Delete,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// What an action changed. The kind of the action follows from the variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionPayload {
    Create {
        entity: Value,
    },
    Update {
        entity_id: String,
        field: String,
        value: Value,
    },
    Delete {
        entity_id: String,
    },
}

impl ActionPayload {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Create { .. } => ActionKind::Create,
            Self::Update { .. } => ActionKind::Update,
            Self::Delete { .. } => ActionKind::Delete,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Confirmed,
    Failed,
}

/// An owned snapshot of prior state plus the operation that puts it back.
///
/// The snapshot is moved in at construction, so later mutations of the live
/// state cannot leak into it. Applying consumes it; a rollback runs at most
/// once.
pub struct Rollback {
    apply: Option<Box<dyn FnOnce() + Send>>,
}

impl Rollback {
    pub fn new<S, F>(snapshot: S, apply: F) -> Self
    where
        S: Send + 'static,
        F: FnOnce(S) + Send + 'static,
    {
        Self {
            apply: Some(Box::new(move || apply(snapshot))),
        }
    }

    /// A rollback with nothing to restore.
    pub fn noop() -> Self {
        Self { apply: None }
    }

    /// Apply the snapshot. Returns `false` if it was already applied.
    fn apply(&mut self) -> bool {
        match self.apply.take() {
            Some(apply) => {
                apply();
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for Rollback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rollback")
            .field("armed", &self.apply.is_some())
            .finish()
    }
}

#[derive(Debug)]
pub struct OptimisticAction {
    pub id: String,
    pub payload: ActionPayload,
    rollback: Rollback,
    status: ActionStatus,
    created_at: Instant,
    settled_at: Option<Instant>,
    final_payload: Option<Value>,
}

impl OptimisticAction {
    pub fn new(id: impl Into<String>, payload: ActionPayload, rollback: Rollback) -> Self {
        Self {
            id: id.into(),
            payload,
            rollback,
            status: ActionStatus::Pending,
            created_at: Instant::now(),
            settled_at: None,
            final_payload: None,
        }
    }

    pub fn kind(&self) -> ActionKind {
        self.payload.kind()
    }

    pub fn status(&self) -> ActionStatus {
        self.status
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn final_payload(&self) -> Option<&Value> {
        self.final_payload.as_ref()
    }
}

/// Generates action ids from entity, field and a logical clock, so that
/// repeated edits of the same cell never collide.
#[derive(Debug, Default)]
pub struct ActionIds {
    clock: AtomicU64,
}

impl ActionIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self, kind: ActionKind, entity_id: &str, field: Option<&str>) -> String {
        let tick = self.clock.fetch_add(1, Ordering::Relaxed) + 1;
        match field {
            Some(field) => format!("{}-{}-{}-{}", kind.as_str(), entity_id, field, tick),
            None => format!("{}-{}-{}", kind.as_str(), entity_id, tick),
        }
    }
}

pub struct OptimisticQueue {
    entries: Vec<OptimisticAction>,
    confirmed_grace: Duration,
    failed_grace: Duration,
    saving_tx: watch::Sender<bool>,
}

impl Default for OptimisticQueue {
    fn default() -> Self {
        Self::from_config(&QueueSection::default())
    }
}

impl OptimisticQueue {
    pub fn new(confirmed_grace: Duration, failed_grace: Duration) -> Self {
        let (saving_tx, _) = watch::channel(false);
        Self {
            entries: Vec::new(),
            confirmed_grace,
            failed_grace,
            saving_tx,
        }
    }

    pub fn from_config(config: &QueueSection) -> Self {
        Self::new(config.confirmed_grace(), config.failed_grace())
    }

    /// Start tracking an action whose mutation is already applied.
    ///
    /// # Errors
    ///
    /// [`SyncError::DuplicateAction`] if an entry with the same id is still
    /// in the queue (pending, or settled but within its grace period).
    pub fn enqueue(&mut self, action: OptimisticAction) -> Result<(), SyncError> {
        self.prune(Instant::now());
        if self.entries.iter().any(|a| a.id == action.id) {
            return Err(SyncError::DuplicateAction { id: action.id });
        }
        debug!(action_id = %action.id, kind = action.kind().as_str(), "Queued optimistic action");
        self.entries.push(action);
        self.publish_saving();
        Ok(())
    }

    /// Mark a pending action confirmed, recording any server-assigned data.
    /// Returns `false` (and does nothing) for unknown or settled ids.
    pub fn confirm(&mut self, id: &str, final_payload: Option<Value>) -> bool {
        let now = Instant::now();
        self.prune(now);
        let Some(action) = self.pending_mut(id) else {
            debug!(action_id = %id, "Ignoring stale confirmation");
            return false;
        };
        action.status = ActionStatus::Confirmed;
        action.settled_at = Some(now);
        action.final_payload = final_payload;
        debug!(action_id = %id, "Confirmed optimistic action");
        self.publish_saving();
        true
    }

    /// Mark a pending action failed and apply its rollback before returning.
    /// Returns `false` (and does nothing) for unknown or settled ids.
    pub fn fail(&mut self, id: &str) -> bool {
        let now = Instant::now();
        self.prune(now);
        let Some(action) = self.pending_mut(id) else {
            debug!(action_id = %id, "Ignoring stale failure");
            return false;
        };
        action.status = ActionStatus::Failed;
        action.settled_at = Some(now);
        action.rollback.apply();
        debug!(action_id = %id, "Rolled back optimistic action");
        self.publish_saving();
        true
    }

    pub fn has_pending(&self) -> bool {
        self.entries
            .iter()
            .any(|a| a.status == ActionStatus::Pending)
    }

    /// Ids of pending actions, in enqueue order.
    pub fn pending_ids(&self) -> Vec<String> {
        self.ids_with(ActionStatus::Pending)
    }

    /// Ids of failed actions still within their grace period.
    pub fn failed_ids(&self) -> Vec<String> {
        self.ids_with(ActionStatus::Failed)
    }

    pub fn get(&self, id: &str) -> Option<&OptimisticAction> {
        self.entries.iter().find(|a| a.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove settled actions whose grace period has elapsed at `now`.
    /// Returns how many were removed.
    pub fn prune(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        let (confirmed_grace, failed_grace) = (self.confirmed_grace, self.failed_grace);
        self.entries.retain(|a| match (a.status, a.settled_at) {
            (ActionStatus::Confirmed, Some(at)) => now.duration_since(at) < confirmed_grace,
            (ActionStatus::Failed, Some(at)) => now.duration_since(at) < failed_grace,
            _ => true,
        });
        before - self.entries.len()
    }

    /// Watch the "saving…" indicator: `true` while any action is pending.
    pub fn subscribe_saving(&self) -> watch::Receiver<bool> {
        self.saving_tx.subscribe()
    }

    fn pending_mut(&mut self, id: &str) -> Option<&mut OptimisticAction> {
        self.entries
            .iter_mut()
            .find(|a| a.id == id && a.status == ActionStatus::Pending)
    }

    fn ids_with(&self, status: ActionStatus) -> Vec<String> {
        self.entries
            .iter()
            .filter(|a| a.status == status)
            .map(|a| a.id.clone())
            .collect()
    }

    fn publish_saving(&self) {
        let pending = self.has_pending();
        self.saving_tx.send_if_modified(|current| {
            if *current == pending {
                false
            } else {
                *current = pending;
                true
            }
        });
    }
}
