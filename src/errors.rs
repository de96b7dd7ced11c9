//! Typed error hierarchy for the synchronization core.
//!
//! One enum covers the three subsystems, grouped below:
//! - mutation gate and queue (`AuthorizationDenied`, `ActionFailed`, `DuplicateAction`)
//! - realtime channel (`NotConnected`, `ConnectionLost`, `ReconnectExhausted`, ...)
//! - board state (`Board`)
//!
//! Stale acknowledgements (confirm/fail on an unknown or settled action) are
//! absorbed by the queue and never surface as an error.

use boardsync_common::{Action, BoardError, Role};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Role '{role}' is not allowed to {action}")]
    AuthorizationDenied { role: Role, action: Action },

    #[error("Action {id} failed: {reason}")]
    ActionFailed { id: String, reason: String },

    #[error("Action {id} is already queued")]
    DuplicateAction { id: String },

    #[error("Realtime channel is not connected")]
    NotConnected,

    #[error("Realtime connection lost")]
    ConnectionLost,

    #[error("Gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("Handshake timed out after {millis}ms")]
    HandshakeTimeout { millis: u64 },

    #[error("No acknowledgement for '{event}' within {millis}ms")]
    AckTimeout { event: String, millis: u64 },

    #[error("Server rejected request: {0}")]
    Rejected(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Failed to encode or decode frame: {0}")]
    Codec(#[from] serde_json::Error),

    #[error(transparent)]
    Board(#[from] BoardError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SyncError {
    /// Failures caused by being offline. Work affected by these stays queued
    /// instead of being rolled back.
    pub fn is_offline(&self) -> bool {
        matches!(
            self,
            SyncError::NotConnected | SyncError::ConnectionLost | SyncError::ReconnectExhausted { .. }
        )
    }
}
