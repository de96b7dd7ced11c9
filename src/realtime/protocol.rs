//! Wire format: event names, the JSON frame and typed payloads.

use boardsync_common::{BoardSnapshot, Column, Item};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::SyncError;

// ── Event names ──────────────────────────────────────────────────────

/// Handshake succeeded (lifecycle, raised locally).
pub const CONNECT: &str = "connect";
/// Transport lost (lifecycle, raised locally).
pub const DISCONNECT: &str = "disconnect";
/// Handshake failed; payload is the error text (lifecycle, raised locally).
pub const CONNECT_ERROR: &str = "connect_error";
/// Outbound persist request.
pub const UPDATE_PROJECT: &str = "update_project";
/// Inbound broadcast of a committed change.
pub const PROJECT_UPDATED: &str = "project_updated";
/// Inbound reply to a frame that carried an ack id.
pub const ACK: &str = "ack";

// ── Frames ───────────────────────────────────────────────────────────

/// One JSON text message on the socket.
///
/// ```json
/// {"event": "update_project", "data": {...}, "ack": 7}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<u64>,
}

impl Frame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
            ack: None,
        }
    }

    pub fn with_ack(mut self, ack: u64) -> Self {
        self.ack = Some(ack);
        self
    }

    /// Decode the payload into a typed message.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, SyncError> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

// ── Payloads ─────────────────────────────────────────────────────────

/// Persist request for one project. Absent `columns`/`items` are left
/// unchanged by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateProject {
    #[serde(rename = "projectId")]
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<Column>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<Item>>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic action ids carried by this save.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,
}

impl UpdateProject {
    /// A full-board save stamped with the current time.
    pub fn full(project_id: impl Into<String>, board: BoardSnapshot, actions: Vec<String>) -> Self {
        Self {
            project_id: project_id.into(),
            columns: Some(board.columns),
            items: Some(board.items),
            updated_at: Utc::now(),
            actions,
        }
    }
}

/// Broadcast of a committed change, from this or another session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectUpdated {
    #[serde(rename = "projectId")]
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<Column>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<Item>>,
}

/// Server reply to an acked frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckReply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AckReply {
    pub fn accepted(data: Option<Value>) -> Self {
        Self {
            ok: true,
            data,
            error: None,
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error.into()),
        }
    }

    /// `Ok(data)` for accepted requests, [`SyncError::Rejected`] otherwise.
    pub fn into_result(self) -> Result<Option<Value>, SyncError> {
        if self.ok {
            Ok(self.data)
        } else {
            Err(SyncError::Rejected(
                self.error.unwrap_or_else(|| "no reason given".to_string()),
            ))
        }
    }
}
