//! The connection seam of the realtime channel.
//!
//! A [`Connector`] performs one handshake and yields a [`Connection`]: a
//! sink for outbound frames and a stream of inbound ones. The stream ending
//! (or yielding a transport error) means the connection is gone.
//!
//! [`WsConnector`] is the production implementation: JSON text frames over a
//! WebSocket. Tests substitute their own connectors.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, Stream};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use super::protocol::Frame;
use crate::errors::SyncError;

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = SyncError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, SyncError>> + Send>>;

/// An established connection, split into its two directions.
pub struct Connection {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Connection, SyncError>;
}

/// Connects to a WebSocket endpoint and speaks JSON [`Frame`]s.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Connection, SyncError> {
        let (socket, response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        debug!(url = %self.url, status = %response.status(), "WebSocket handshake complete");

        let (write, read) = socket.split();

        let sink = write
            .sink_map_err(|e| SyncError::Transport(e.to_string()))
            .with(|frame: Frame| async move {
                let text = serde_json::to_string(&frame)?;
                Ok::<_, SyncError>(Message::text(text))
            });

        let stream = read.filter_map(|message| async move {
            match message {
                Ok(Message::Text(text)) => {
                    Some(serde_json::from_str::<Frame>(text.as_str()).map_err(SyncError::from))
                }
                // Control frames are answered by tungstenite itself; binary
                // frames are not part of the protocol.
                Ok(_) => None,
                Err(e) => Some(Err(SyncError::Transport(e.to_string()))),
            }
        });

        Ok(Connection {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}
