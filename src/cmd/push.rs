//! One-shot acknowledged save: `boardsync push`.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use boardsync::errors::SyncError;
use boardsync::realtime::{
    ChannelConfig, ConnectionState, RealtimeChannel, UpdateProject, WsConnector, protocol,
};
use boardsync_common::BoardSnapshot;
use tracing::info;

use super::load_config;
use crate::Cli;

pub async fn cmd_push(cli: &Cli, project: &str, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read board file: {}", file.display()))?;
    let board: BoardSnapshot = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse board file: {}", file.display()))?;

    let config = load_config(cli)?;
    let channel = RealtimeChannel::new(
        Arc::new(WsConnector::new(config.realtime.url.clone())),
        ChannelConfig::from(&config.realtime),
    );
    channel.connect();

    let status = *channel
        .subscribe_status()
        .wait_for(|s| s.state == ConnectionState::Connected || s.exhausted)
        .await
        .context("Realtime channel closed")?;
    if status.exhausted {
        channel.disconnect().await;
        return Err(SyncError::ReconnectExhausted {
            attempts: status.attempts,
        })
        .with_context(|| format!("Could not reach {}", config.realtime.url));
    }

    let (columns, items) = (board.columns.len(), board.items.len());
    let request = UpdateProject::full(project, board, Vec::new());
    let result = channel
        .emit_with_ack(protocol::UPDATE_PROJECT, serde_json::to_value(&request)?)
        .await;
    channel.disconnect().await;

    match result {
        Ok(reply) => {
            info!(project_id = %project, columns, items, "Board saved");
            if let Some(reply) = reply {
                println!("{}", serde_json::to_string_pretty(&reply)?);
            }
            Ok(())
        }
        Err(SyncError::Rejected(reason)) => bail!("Save rejected: {}", reason),
        Err(e) => Err(e).context("Save failed"),
    }
}
