//! Debounced autosave.
//!
//! [`AutoSaveScheduler`] coalesces bursts of edits into one persist call. It
//! owns a single worker task holding one pending snapshot and one deadline:
//! every [`AutoSaveScheduler::schedule`] replaces the snapshot and pushes the
//! deadline to `debounce` after that call. When the deadline passes with no
//! further calls, the latest snapshot is persisted exactly once and the
//! intermediate ones are dropped.
//!
//! Saves never overlap: the worker awaits each persist before handling the
//! next command. Failed saves are reported as [`SaveOutcome::Failed`] and are
//! not retried here.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::errors::SyncError;

/// Destination of debounced saves.
#[async_trait]
pub trait Persist<S: Send + 'static>: Send + Sync {
    async fn persist(&self, snapshot: S) -> Result<(), SyncError>;
}

/// Result of one persist call, delivered in order.
#[derive(Debug)]
pub enum SaveOutcome<S> {
    Saved,
    /// The snapshot that failed to save, returned so the caller can decide
    /// whether to schedule it again.
    Failed { snapshot: S, error: SyncError },
}

enum Command<S> {
    Schedule(S, Instant),
    Flush,
    Cancel,
}

pub struct AutoSaveScheduler<S> {
    tx: mpsc::UnboundedSender<Command<S>>,
    worker: JoinHandle<()>,
}

impl<S> AutoSaveScheduler<S>
where
    S: Clone + Send + 'static,
{
    /// Spawn the scheduler worker. Must be called inside a tokio runtime.
    ///
    /// Returns the scheduler and the stream of save outcomes.
    pub fn new(
        debounce: Duration,
        persist: Arc<dyn Persist<S>>,
    ) -> (Self, mpsc::UnboundedReceiver<SaveOutcome<S>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(debounce, persist, rx, outcome_tx));
        (Self { tx, worker }, outcome_rx)
    }

    /// Replace the pending snapshot and restart the debounce window.
    pub fn schedule(&self, snapshot: S) {
        self.send(Command::Schedule(snapshot, Instant::now()));
    }

    /// Persist the pending snapshot now, if there is one.
    pub fn flush(&self) {
        self.send(Command::Flush);
    }

    /// Drop the pending snapshot without persisting it.
    pub fn cancel(&self) {
        self.send(Command::Cancel);
    }

    /// Stop the worker, persisting any pending snapshot first.
    pub async fn shutdown(self) {
        let Self { tx, worker } = self;
        drop(tx);
        if let Err(e) = worker.await {
            warn!(error = %e, "Autosave worker ended abnormally");
        }
    }

    fn send(&self, command: Command<S>) {
        if self.tx.send(command).is_err() {
            warn!("Autosave worker is gone; dropping command");
        }
    }
}

async fn run_worker<S>(
    debounce: Duration,
    persist: Arc<dyn Persist<S>>,
    mut rx: mpsc::UnboundedReceiver<Command<S>>,
    outcomes: mpsc::UnboundedSender<SaveOutcome<S>>,
) where
    S: Clone + Send + 'static,
{
    let mut pending: Option<S> = None;
    let deadline = tokio::time::sleep(debounce);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(Command::Schedule(snapshot, at)) => {
                    if pending.replace(snapshot).is_some() {
                        debug!("Superseded pending autosave snapshot");
                    }
                    deadline.as_mut().reset(at + debounce);
                }
                Some(Command::Flush) => {
                    if let Some(snapshot) = pending.take() {
                        save(persist.as_ref(), snapshot, &outcomes).await;
                    }
                }
                Some(Command::Cancel) => {
                    if pending.take().is_some() {
                        debug!("Cancelled pending autosave");
                    }
                }
                None => {
                    if let Some(snapshot) = pending.take() {
                        save(persist.as_ref(), snapshot, &outcomes).await;
                    }
                    break;
                }
            },
            _ = &mut deadline, if pending.is_some() => {
                if let Some(snapshot) = pending.take() {
                    save(persist.as_ref(), snapshot, &outcomes).await;
                }
            }
        }
    }
}

async fn save<S>(
    persist: &dyn Persist<S>,
    snapshot: S,
    outcomes: &mpsc::UnboundedSender<SaveOutcome<S>>,
) where
    S: Clone + Send + 'static,
{
    let outcome = match persist.persist(snapshot.clone()).await {
        Ok(()) => {
            debug!("Autosave persisted");
            SaveOutcome::Saved
        }
        Err(error) => {
            warn!(error = %error, "Autosave failed");
            SaveOutcome::Failed { snapshot, error }
        }
    };
    // Nobody listening is fine.
    let _ = outcomes.send(outcome);
}
