//! Live view of a realtime endpoint: `boardsync watch`.

use std::sync::Arc;

use anyhow::Result;
use boardsync::errors::SyncError;
use boardsync::realtime::{
    ChannelConfig, ConnectionState, RealtimeChannel, WsConnector, protocol,
};
use tracing::{info, warn};

use super::load_config;
use crate::Cli;

pub async fn cmd_watch(cli: &Cli, project: Option<&str>) -> Result<()> {
    let config = load_config(cli)?;
    info!(url = %config.realtime.url, "Watching realtime endpoint");

    let channel = RealtimeChannel::new(
        Arc::new(WsConnector::new(config.realtime.url.clone())),
        ChannelConfig::from(&config.realtime),
    );

    channel.on(protocol::CONNECT_ERROR, |error| {
        warn!(error = %error, "Connection attempt failed");
    });
    let filter = project.map(str::to_string);
    channel.on_project_updated(move |update| {
        if filter.as_deref().is_some_and(|id| id != update.project_id) {
            return;
        }
        info!(
            project_id = %update.project_id,
            columns = update.columns.as_ref().map(Vec::len),
            items = update.items.as_ref().map(Vec::len),
            "Project updated"
        );
    });

    channel.connect();
    let mut status = channel.subscribe_status();

    let result = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break Ok(());
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let current = *status.borrow_and_update();
                match current.state {
                    ConnectionState::Connected => info!("Connected"),
                    ConnectionState::Connecting => {
                        info!(attempt = current.attempts, "Connecting")
                    }
                    ConnectionState::Disconnected if current.exhausted => {
                        break Err(SyncError::ReconnectExhausted {
                            attempts: current.attempts,
                        });
                    }
                    ConnectionState::Disconnected => info!("Disconnected"),
                }
            }
        }
    };

    channel.disconnect().await;
    Ok(result?)
}
