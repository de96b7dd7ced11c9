//! Board session: the controller that owns visible board state for one
//! project and drives the gate, queue, autosave and realtime channel.
//!
//! Every mutation follows the same path:
//!
//! ```text
//! authorize ─> snapshot prior state ─> mutate board ─> enqueue (with rollback)
//!           ─> mark unsent ─> schedule autosave
//! ```
//!
//! A save drains the unsent action ids into one `update_project` request.
//! Its acknowledgement settles the whole batch: accepted actions are
//! confirmed, rejected or unacknowledged ones are rolled back newest first.
//! Columns or items carried in an accepted reply replace local ones.
//! Saves that fail because the channel is offline put their batch back; the
//! next successful connect schedules a fresh save of the full board.
//!
//! Lock order: queue before board. The board lock is taken inside
//! [`OptimisticQueue::fail`] by rollbacks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use boardsync_common::{
    Action, BoardSnapshot, Column, ColumnRemoval, ColumnType, Item, Project, Role, authorize,
};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::autosave::{AutoSaveScheduler, Persist, SaveOutcome};
use crate::config::SyncConfig;
use crate::errors::SyncError;
use crate::queue::{ActionIds, ActionPayload, OptimisticAction, OptimisticQueue, Rollback};
use crate::realtime::protocol::{self, ProjectUpdated, UpdateProject};
use crate::realtime::{ChannelConfig, ChannelStatus, Connector, RealtimeChannel};
use crate::util::lock;

const NOTICE_CAPACITY: usize = 64;

/// Transient, user-visible messages raised by the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    AuthorizationDenied { role: Role, action: Action },
    /// A save was rejected or went unacknowledged; these actions were rolled back.
    ActionFailed { ids: Vec<String>, reason: String },
    ConnectionLost,
    ReconnectExhausted { attempts: u32 },
    Reconnected,
    /// Another session's committed change replaced local state.
    RemoteUpdate { project_id: String },
}

/// Board, queue and unsent ids, shared with the persister.
struct SyncState {
    board: Arc<Mutex<BoardSnapshot>>,
    queue: Mutex<OptimisticQueue>,
    unsent: Mutex<Vec<String>>,
}

struct Inner {
    project_id: String,
    state: Arc<SyncState>,
    channel: Arc<RealtimeChannel>,
    autosave: Mutex<Option<AutoSaveScheduler<BoardSnapshot>>>,
    notices: broadcast::Sender<Notice>,
    ids: ActionIds,
    connected_before: AtomicBool,
}

impl Inner {
    fn notify(&self, notice: Notice) {
        // No subscribers is fine.
        let _ = self.notices.send(notice);
    }

    fn schedule_save(&self) {
        let snapshot = lock(&self.state.board).clone();
        match lock(&self.autosave).as_ref() {
            Some(autosave) => autosave.schedule(snapshot),
            None => debug!(project_id = %self.project_id, "Session shut down; save not scheduled"),
        }
    }
}

pub struct BoardSession {
    inner: Arc<Inner>,
}

impl BoardSession {
    /// Build a session for `project`. Must be called inside a tokio runtime;
    /// nothing connects until [`BoardSession::start`].
    pub fn new(project: Project, connector: Arc<dyn Connector>, config: &SyncConfig) -> Self {
        let Project { id, name, board, .. } = project;
        debug!(project_id = %id, name = %name, "Opening board session");

        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let state = Arc::new(SyncState {
            board: Arc::new(Mutex::new(board)),
            queue: Mutex::new(OptimisticQueue::from_config(&config.queue)),
            unsent: Mutex::new(Vec::new()),
        });
        let channel = Arc::new(RealtimeChannel::new(
            connector,
            ChannelConfig::from(&config.realtime),
        ));

        let persister: Arc<dyn Persist<BoardSnapshot>> = Arc::new(BoardPersister {
            project_id: id.clone(),
            state: Arc::clone(&state),
            channel: Arc::clone(&channel),
            notices: notices.clone(),
        });
        let (autosave, outcomes) = AutoSaveScheduler::new(config.autosave.debounce(), persister);
        tokio::spawn(log_outcomes(id.clone(), outcomes));

        Self {
            inner: Arc::new(Inner {
                project_id: id,
                state,
                channel,
                autosave: Mutex::new(Some(autosave)),
                notices,
                ids: ActionIds::new(),
                connected_before: AtomicBool::new(false),
            }),
        }
    }

    /// Register channel handlers and start connecting.
    pub fn start(&self) {
        let channel = &self.inner.channel;

        let weak = Arc::downgrade(&self.inner);
        channel.on(protocol::CONNECT, move |_| {
            if let Some(inner) = weak.upgrade() {
                on_connect(&inner);
            }
        });

        let weak = Arc::downgrade(&self.inner);
        channel.on(protocol::DISCONNECT, move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.notify(Notice::ConnectionLost);
            }
        });

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        channel.on(protocol::CONNECT_ERROR, move |_| {
            let Some(inner) = weak.upgrade() else { return };
            let status = inner.channel.status();
            if status.exhausted {
                inner.notify(Notice::ReconnectExhausted {
                    attempts: status.attempts,
                });
            }
        });

        let weak = Arc::downgrade(&self.inner);
        channel.on_project_updated(move |update| {
            if let Some(inner) = weak.upgrade() {
                apply_remote(&inner, update);
            }
        });

        channel.connect();
    }

    /// Retry connecting after the attempt budget was spent.
    pub fn reconnect(&self) {
        self.inner.channel.connect();
    }

    /// Persist any pending save, then disconnect.
    pub async fn shutdown(&self) {
        let autosave = lock(&self.inner.autosave).take();
        if let Some(autosave) = autosave {
            autosave.shutdown().await;
        }
        self.inner.channel.disconnect().await;
        info!(project_id = %self.inner.project_id, "Board session closed");
    }

    pub fn project_id(&self) -> &str {
        &self.inner.project_id
    }

    /// A copy of the visible board.
    pub fn board(&self) -> BoardSnapshot {
        lock(&self.inner.state.board).clone()
    }

    pub fn has_pending(&self) -> bool {
        lock(&self.inner.state.queue).has_pending()
    }

    pub fn pending_ids(&self) -> Vec<String> {
        lock(&self.inner.state.queue).pending_ids()
    }

    pub fn connection_status(&self) -> ChannelStatus {
        self.inner.channel.status()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ChannelStatus> {
        self.inner.channel.subscribe_status()
    }

    pub fn subscribe_saving(&self) -> watch::Receiver<bool> {
        lock(&self.inner.state.queue).subscribe_saving()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.inner.notices.subscribe()
    }

    // ── Mutations ────────────────────────────────────────────────────

    /// Set one cell. Returns the action id.
    pub fn update_item(
        &self,
        role: Role,
        item_id: &str,
        column_id: &str,
        value: Value,
    ) -> Result<String, SyncError> {
        self.mutate(
            role,
            Action::Edit,
            |board| {
                let previous = board.set_cell(item_id, column_id, Some(value.clone()))?;
                let payload = ActionPayload::Update {
                    entity_id: item_id.to_string(),
                    field: column_id.to_string(),
                    value,
                };
                Ok(((item_id.to_string(), column_id.to_string(), previous), payload))
            },
            |board, (item_id, column_id, previous): (String, String, Option<Value>)| {
                if board.set_cell(&item_id, &column_id, previous).is_err() {
                    debug!(item_id = %item_id, "Item gone; nothing to restore");
                }
            },
        )
    }

    /// Append a new item titled after its position.
    pub fn add_item(&self, role: Role) -> Result<String, SyncError> {
        self.mutate(
            role,
            Action::Edit,
            |board| {
                let item = board.next_item();
                let entity = serde_json::to_value(&item)?;
                let id = item.id.clone();
                board.insert_item(board.items.len(), item);
                Ok((id, ActionPayload::Create { entity }))
            },
            |board, id: String| {
                let _ = board.remove_item(&id);
            },
        )
    }

    pub fn delete_item(&self, role: Role, item_id: &str) -> Result<String, SyncError> {
        self.mutate(
            role,
            Action::Delete,
            |board| {
                let removed = board.remove_item(item_id)?;
                let payload = ActionPayload::Delete {
                    entity_id: item_id.to_string(),
                };
                Ok((removed, payload))
            },
            |board, (index, item): (usize, Item)| board.insert_item(index, item),
        )
    }

    pub fn add_column(
        &self,
        role: Role,
        name: &str,
        column_type: ColumnType,
    ) -> Result<String, SyncError> {
        self.mutate(
            role,
            Action::CreateColumns,
            |board| {
                let column = Column::new(name, column_type);
                let entity = serde_json::to_value(&column)?;
                let id = column.id.clone();
                board.insert_column(board.columns.len(), column);
                Ok((id, ActionPayload::Create { entity }))
            },
            |board, id: String| {
                let _ = board.remove_column(&id);
            },
        )
    }

    pub fn rename_column(&self, role: Role, column_id: &str, name: &str) -> Result<String, SyncError> {
        self.mutate(
            role,
            Action::Edit,
            |board| {
                let previous = board.rename_column(column_id, name)?;
                let payload = ActionPayload::Update {
                    entity_id: column_id.to_string(),
                    field: "name".to_string(),
                    value: Value::String(name.to_string()),
                };
                Ok(((column_id.to_string(), previous), payload))
            },
            |board, (column_id, previous): (String, String)| {
                let _ = board.rename_column(&column_id, &previous);
            },
        )
    }

    pub fn delete_column(&self, role: Role, column_id: &str) -> Result<String, SyncError> {
        self.mutate(
            role,
            Action::DeleteColumns,
            |board| {
                let removal = board.remove_column(column_id)?;
                let payload = ActionPayload::Delete {
                    entity_id: column_id.to_string(),
                };
                Ok((removal, payload))
            },
            |board, removal: ColumnRemoval| board.restore_column(removal),
        )
    }

    /// Authorize, apply `apply` to the board, and queue the action with a
    /// rollback that hands the captured prior state to `restore`.
    fn mutate<S, M, R>(&self, role: Role, action: Action, apply: M, restore: R) -> Result<String, SyncError>
    where
        S: Clone + Send + 'static,
        M: FnOnce(&mut BoardSnapshot) -> Result<(S, ActionPayload), SyncError>,
        R: Fn(&mut BoardSnapshot, S) + Clone + Send + 'static,
    {
        let inner = &self.inner;
        if !authorize(role, action) {
            warn!(role = %role, action = %action, "Mutation denied");
            inner.notify(Notice::AuthorizationDenied { role, action });
            return Err(SyncError::AuthorizationDenied { role, action });
        }

        let (prior, payload) = apply(&mut *lock(&inner.state.board))?;
        let id = action_id(&inner.ids, &payload);

        let rollback = {
            let board = Arc::clone(&inner.state.board);
            let restore = restore.clone();
            Rollback::new(prior.clone(), move |prior| restore(&mut *lock(&board), prior))
        };
        let queued = lock(&inner.state.queue).enqueue(OptimisticAction::new(id.clone(), payload, rollback));
        if let Err(e) = queued {
            restore(&mut *lock(&inner.state.board), prior);
            return Err(e);
        }

        lock(&inner.state.unsent).push(id.clone());
        inner.schedule_save();
        debug!(project_id = %inner.project_id, action_id = %id, "Applied optimistic mutation");
        Ok(id)
    }
}

fn action_id(ids: &ActionIds, payload: &ActionPayload) -> String {
    match payload {
        ActionPayload::Create { entity } => {
            let entity_id = entity.get("id").and_then(Value::as_str).unwrap_or("new");
            ids.next(payload.kind(), entity_id, None)
        }
        ActionPayload::Update {
            entity_id, field, ..
        } => ids.next(payload.kind(), entity_id, Some(field)),
        ActionPayload::Delete { entity_id } => ids.next(payload.kind(), entity_id, None),
    }
}

fn on_connect(inner: &Inner) {
    if inner.connected_before.swap(true, Ordering::SeqCst) {
        inner.notify(Notice::Reconnected);
    }
    let unsent = lock(&inner.state.unsent).len();
    if unsent > 0 {
        info!(project_id = %inner.project_id, unsent, "Connected with unsent changes; scheduling save");
        inner.schedule_save();
    }
}

/// Last-writer-wins replace of whatever the broadcast carries.
fn apply_remote(inner: &Inner, update: ProjectUpdated) {
    if update.project_id != inner.project_id {
        debug!(project_id = %update.project_id, "Ignoring update for another project");
        return;
    }
    replace_board(&inner.state.board, update.columns, update.items);
    info!(project_id = %inner.project_id, "Applied remote update");
    inner.notify(Notice::RemoteUpdate {
        project_id: update.project_id,
    });
}

fn replace_board(board: &Mutex<BoardSnapshot>, columns: Option<Vec<Column>>, items: Option<Vec<Item>>) {
    let mut board = lock(board);
    if let Some(columns) = columns {
        board.columns = columns;
    }
    if let Some(items) = items {
        board.items = items;
    }
}

/// Board fields an ack reply may carry back.
#[derive(Deserialize)]
struct CommittedBoard {
    #[serde(default)]
    columns: Option<Vec<Column>>,
    #[serde(default)]
    items: Option<Vec<Item>>,
}

/// Sends full-board saves over the channel and settles the actions they carry.
struct BoardPersister {
    project_id: String,
    state: Arc<SyncState>,
    channel: Arc<RealtimeChannel>,
    notices: broadcast::Sender<Notice>,
}

impl BoardPersister {
    fn settle_failed(&self, batch: &[String], error: &SyncError) -> SyncError {
        {
            let mut queue = lock(&self.state.queue);
            for id in batch.iter().rev() {
                queue.fail(id);
            }
        }
        warn!(project_id = %self.project_id, actions = batch.len(), error = %error, "Save failed; rolled back");
        let _ = self.notices.send(Notice::ActionFailed {
            ids: batch.to_vec(),
            reason: error.to_string(),
        });
        SyncError::ActionFailed {
            id: batch.join(", "),
            reason: error.to_string(),
        }
    }

    /// Apply server-assigned columns or items from an ack reply.
    fn reconcile(&self, final_payload: Option<&Value>) {
        let Some(data) = final_payload else { return };
        match CommittedBoard::deserialize(data) {
            Ok(CommittedBoard { columns, items }) => {
                if columns.is_some() || items.is_some() {
                    debug!(project_id = %self.project_id, "Reconciling server-assigned state");
                    replace_board(&self.state.board, columns, items);
                }
            }
            Err(e) => debug!(project_id = %self.project_id, error = %e, "Ack payload carries no board"),
        }
    }

    fn requeue(&self, batch: Vec<String>) {
        let mut unsent = lock(&self.state.unsent);
        let newer = std::mem::replace(&mut *unsent, batch);
        unsent.extend(newer);
    }
}

#[async_trait]
impl Persist<BoardSnapshot> for BoardPersister {
    /// Saves the board as it is now, not as it was when the save was
    /// scheduled: rollbacks and remote updates may have changed it since.
    async fn persist(&self, _scheduled: BoardSnapshot) -> Result<(), SyncError> {
        // Every drained id has already been applied to the board.
        let batch = std::mem::take(&mut *lock(&self.state.unsent));
        let snapshot = lock(&self.state.board).clone();
        let request = UpdateProject::full(self.project_id.clone(), snapshot, batch.clone());

        let result = match serde_json::to_value(&request) {
            Ok(data) => self.channel.emit_with_ack(protocol::UPDATE_PROJECT, data).await,
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(final_payload) => {
                self.reconcile(final_payload.as_ref());
                let mut queue = lock(&self.state.queue);
                for id in &batch {
                    queue.confirm(id, final_payload.clone());
                }
                info!(project_id = %self.project_id, actions = batch.len(), "Board saved");
                Ok(())
            }
            Err(e) if e.is_offline() => {
                debug!(project_id = %self.project_id, actions = batch.len(), "Offline; keeping actions pending");
                self.requeue(batch);
                Err(e)
            }
            Err(e) => Err(self.settle_failed(&batch, &e)),
        }
    }
}

async fn log_outcomes(project_id: String, mut outcomes: mpsc::UnboundedReceiver<SaveOutcome<BoardSnapshot>>) {
    while let Some(outcome) = outcomes.recv().await {
        match outcome {
            SaveOutcome::Saved => debug!(project_id = %project_id, "Autosave complete"),
            SaveOutcome::Failed { error, .. } if error.is_offline() => {
                info!(project_id = %project_id, "Save deferred until reconnect");
            }
            SaveOutcome::Failed { error, .. } => {
                debug!(project_id = %project_id, error = %error, "Autosave failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::mock::{MockConnector, MockPeer};
    use crate::realtime::{AckReply, ConnectionState, Frame};
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::Instant;

    fn project() -> Project {
        let mut status = Column::new("Status", ColumnType::Status);
        status.id = "status".into();
        let mut name = Column::new("Name", ColumnType::Text);
        name.id = "name".into();
        Project {
            id: "p1".into(),
            name: "Launch".into(),
            description: None,
            board: BoardSnapshot::new(
                vec![name, status],
                vec![
                    Item::new("41").with_value("name", json!("Spec")),
                    Item::new("42")
                        .with_value("name", json!("Build"))
                        .with_value("status", json!("Working on it")),
                ],
            ),
        }
    }

    async fn connected(
        script: impl IntoIterator<Item = bool>,
    ) -> (BoardSession, tokio::sync::mpsc::UnboundedReceiver<MockPeer>) {
        let (connector, peers) = MockConnector::new(script, true);
        let session = BoardSession::new(project(), connector, &SyncConfig::default());
        session.start();
        (session, peers)
    }

    async fn wait_connected(session: &BoardSession) {
        session
            .subscribe_status()
            .wait_for(|s| s.state == ConnectionState::Connected)
            .await
            .unwrap();
    }

    async fn next_save(peer: &mut MockPeer) -> (u64, UpdateProject) {
        let frame = peer.next_outbound().await.unwrap();
        assert_eq!(frame.event, protocol::UPDATE_PROJECT);
        (frame.ack.unwrap(), frame.decode().unwrap())
    }

    fn reply(peer: &MockPeer, ack: u64, reply: AckReply) {
        peer.send(Frame::new(protocol::ACK, serde_json::to_value(reply).unwrap()).with_ack(ack));
    }

    async fn settled(session: &BoardSession) {
        session
            .subscribe_saving()
            .wait_for(|saving| !*saving)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_viewer_edits_change_nothing() {
        let (session, _peers) = connected([true]).await;
        let mut notices = session.subscribe_notices();
        let before = session.board();

        let err = session
            .update_item(Role::Viewer, "42", "status", json!("Done"))
            .unwrap_err();
        assert!(matches!(err, SyncError::AuthorizationDenied { .. }));
        assert!(session.add_item(Role::Viewer).is_err());
        assert!(session.delete_item(Role::Viewer, "42").is_err());

        assert_eq!(session.board(), before);
        assert!(!session.has_pending());
        assert_eq!(
            notices.recv().await.unwrap(),
            Notice::AuthorizationDenied {
                role: Role::Viewer,
                action: Action::Edit
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_editor_cannot_delete_columns() {
        let (session, _peers) = connected([true]).await;
        let err = session.delete_column(Role::Editor, "status").unwrap_err();
        assert!(matches!(
            err,
            SyncError::AuthorizationDenied {
                action: Action::DeleteColumns,
                ..
            }
        ));
        assert!(session.board().column("status").is_some());
        assert!(session.delete_column(Role::Admin, "status").is_ok());
        assert!(session.board().column("status").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_item_is_rejected_without_queueing() {
        let (session, _peers) = connected([true]).await;
        let err = session
            .update_item(Role::Editor, "404", "status", json!("Done"))
            .unwrap_err();
        assert!(matches!(err, SyncError::Board(_)));
        assert!(!session.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_edits_is_one_acked_save() {
        let (session, mut peers) = connected([true]).await;
        let mut peer = peers.recv().await.unwrap();
        wait_connected(&session).await;
        let start = Instant::now();

        let first = session
            .update_item(Role::Editor, "42", "status", json!("Stuck"))
            .unwrap();
        let second = session
            .update_item(Role::Editor, "42", "status", json!("Done"))
            .unwrap();
        assert_ne!(first, second);
        assert!(second.starts_with("update-42-status-"));
        assert!(session.has_pending());

        let (ack, save) = next_save(&mut peer).await;
        assert_eq!(start.elapsed(), Duration::from_millis(1500));
        assert_eq!(save.project_id, "p1");
        assert_eq!(save.actions, vec![first.clone(), second.clone()]);
        let items = save.items.unwrap();
        assert_eq!(items[1].value("status"), Some(&json!("Done")));

        reply(&peer, ack, AckReply::accepted(None));
        settled(&session).await;
        assert!(session.pending_ids().is_empty());
        assert_eq!(
            session.board().item("42").unwrap().value("status"),
            Some(&json!("Done"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_save_rolls_back_whole_batch() {
        let (session, mut peers) = connected([true]).await;
        let mut peer = peers.recv().await.unwrap();
        wait_connected(&session).await;
        let mut notices = session.subscribe_notices();
        let before = session.board();

        session
            .update_item(Role::Editor, "42", "status", json!("Stuck"))
            .unwrap();
        session
            .update_item(Role::Editor, "42", "status", json!("Done"))
            .unwrap();
        session.rename_column(Role::Editor, "name", "Task").unwrap();
        session.delete_item(Role::Admin, "41").unwrap();
        session.add_column(Role::Editor, "Due", ColumnType::Date).unwrap();

        let (ack, save) = next_save(&mut peer).await;
        assert_eq!(save.actions.len(), 5);
        reply(&peer, ack, AckReply::rejected("stale revision"));
        settled(&session).await;

        assert_eq!(session.board(), before);
        match notices.recv().await.unwrap() {
            Notice::ActionFailed { ids, reason } => {
                assert_eq!(ids, save.actions);
                assert!(reason.contains("stale revision"));
            }
            other => panic!("Expected ActionFailed, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_during_rejected_save_does_not_resend_rolled_back_state() {
        let (session, mut peers) = connected([true]).await;
        let mut peer = peers.recv().await.unwrap();
        wait_connected(&session).await;

        let first = session
            .update_item(Role::Editor, "42", "status", json!("Stuck"))
            .unwrap();
        let (ack, save) = next_save(&mut peer).await;
        assert_eq!(save.actions, vec![first]);

        // Edited while the first save waits for its ack.
        let second = session
            .update_item(Role::Editor, "41", "name", json!("Spec v2"))
            .unwrap();
        reply(&peer, ack, AckReply::rejected("stale revision"));

        let (ack, save) = next_save(&mut peer).await;
        assert_eq!(save.actions, vec![second]);
        let items = save.items.unwrap();
        let item_42 = items.iter().find(|i| i.id == "42").unwrap();
        let item_41 = items.iter().find(|i| i.id == "41").unwrap();
        assert_eq!(item_42.value("status"), Some(&json!("Working on it")));
        assert_eq!(item_41.value("name"), Some(&json!("Spec v2")));

        reply(&peer, ack, AckReply::accepted(None));
        settled(&session).await;
        let board = session.board();
        assert_eq!(
            board.item("42").unwrap().value("status"),
            Some(&json!("Working on it"))
        );
        assert_eq!(board.item("41").unwrap().value("name"), Some(&json!("Spec v2")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_sends_board_as_of_persist_time() {
        let (session, mut peers) = connected([true]).await;
        let mut peer = peers.recv().await.unwrap();
        wait_connected(&session).await;

        session.add_item(Role::Editor).unwrap();
        // A broadcast lands inside the debounce window.
        peer.send(Frame::new(
            protocol::PROJECT_UPDATED,
            json!({"projectId": "p1", "columns": []}),
        ));

        let (_ack, save) = next_save(&mut peer).await;
        assert_eq!(save.columns, Some(vec![]));
        assert_eq!(save.items.unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_payload_reconciles_board() {
        let (session, mut peers) = connected([true]).await;
        let mut peer = peers.recv().await.unwrap();
        wait_connected(&session).await;

        session.add_item(Role::Editor).unwrap();
        let local_id = session.board().items[2].id.clone();
        let (ack, save) = next_save(&mut peer).await;

        let mut items = save.items.unwrap();
        items[2].id = "srv-7".into();
        reply(&peer, ack, AckReply::accepted(Some(json!({"items": items}))));
        settled(&session).await;

        let board = session.board();
        assert!(board.item("srv-7").is_some());
        assert!(board.item(&local_id).is_none());
        assert_eq!(board.columns.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacknowledged_save_rolls_back() {
        let (session, mut peers) = connected([true]).await;
        let mut peer = peers.recv().await.unwrap();
        wait_connected(&session).await;

        let id = session.add_item(Role::Editor).unwrap();
        assert_eq!(session.board().items.len(), 3);
        let (_ack, save) = next_save(&mut peer).await;
        assert_eq!(save.actions, vec![id]);

        // No reply: the ack timeout fails the batch.
        settled(&session).await;
        assert_eq!(session.board().items.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_edits_stay_pending_and_save_on_reconnect() {
        let (session, mut peers) = connected([false, false, true]).await;
        let start = Instant::now();

        let id = session
            .update_item(Role::Editor, "42", "status", json!("Done"))
            .unwrap();

        // The debounced save at 1500ms finds the channel offline.
        tokio::time::sleep(Duration::from_millis(1800)).await;
        assert!(session.has_pending());
        assert_eq!(
            session.board().item("42").unwrap().value("status"),
            Some(&json!("Done"))
        );

        let mut peer = peers.recv().await.unwrap();
        let (ack, save) = next_save(&mut peer).await;
        // Connected at 2000ms, saved one debounce window later.
        assert_eq!(start.elapsed(), Duration::from_millis(3500));
        assert_eq!(save.actions, vec![id]);

        reply(&peer, ack, AckReply::accepted(Some(json!({"revision": 9}))));
        settled(&session).await;
        assert!(!session.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_update_replaces_matching_project_only() {
        let (session, mut peers) = connected([true]).await;
        let peer = peers.recv().await.unwrap();
        wait_connected(&session).await;
        let mut notices = session.subscribe_notices();

        peer.send(Frame::new(
            protocol::PROJECT_UPDATED,
            json!({"projectId": "other", "items": []}),
        ));
        peer.send(Frame::new(
            protocol::PROJECT_UPDATED,
            json!({"projectId": "p1", "items": [{"id": "99", "name": "Remote"}]}),
        ));

        assert_eq!(
            notices.recv().await.unwrap(),
            Notice::RemoteUpdate {
                project_id: "p1".into()
            }
        );
        let board = session.board();
        assert_eq!(board.items.len(), 1);
        assert_eq!(board.items[0].id, "99");
        assert_eq!(board.columns.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_notices() {
        let (session, mut peers) = connected([true, true]).await;
        let mut notices = session.subscribe_notices();

        let first = peers.recv().await.unwrap();
        wait_connected(&session).await;
        drop(first);

        assert_eq!(notices.recv().await.unwrap(), Notice::ConnectionLost);
        let _second = peers.recv().await.unwrap();
        assert_eq!(notices.recv().await.unwrap(), Notice::Reconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_reconnect_is_reported() {
        let (connector, _peers) = MockConnector::new([], false);
        let session = BoardSession::new(project(), connector, &SyncConfig::default());
        let mut notices = session.subscribe_notices();
        session.start();

        assert_eq!(
            notices.recv().await.unwrap(),
            Notice::ReconnectExhausted { attempts: 5 }
        );
        assert_eq!(
            session.connection_status().state,
            ConnectionState::Disconnected
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_reconnect_after_exhaustion() {
        let (connector, mut peers) =
            MockConnector::new([true, false, false, false, false, false, true], false);
        let session = BoardSession::new(project(), connector.clone(), &SyncConfig::default());
        let mut notices = session.subscribe_notices();
        session.start();

        let first = peers.recv().await.unwrap();
        wait_connected(&session).await;
        drop(first);

        assert_eq!(notices.recv().await.unwrap(), Notice::ConnectionLost);
        assert_eq!(
            notices.recv().await.unwrap(),
            Notice::ReconnectExhausted { attempts: 5 }
        );
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.attempt_times().len(), 6);

        session.reconnect();
        let _peer = peers.recv().await.unwrap();
        assert_eq!(notices.recv().await.unwrap(), Notice::Reconnected);
        assert_eq!(connector.attempt_times().len(), 7);
        assert_eq!(session.connection_status().state, ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_pending_save() {
        let (session, mut peers) = connected([true]).await;
        let mut peer = peers.recv().await.unwrap();
        wait_connected(&session).await;

        let id = session.add_column(Role::Admin, "Owner", ColumnType::Person).unwrap();
        let responder = tokio::spawn(async move {
            let (ack, save) = next_save(&mut peer).await;
            reply(&peer, ack, AckReply::accepted(None));
            save
        });

        session.shutdown().await;
        let save = responder.await.unwrap();
        assert_eq!(save.actions, vec![id]);
        assert_eq!(save.columns.unwrap().len(), 3);
        assert!(!session.has_pending());
        assert_eq!(session.connection_status().state, ConnectionState::Disconnected);
    }
}
