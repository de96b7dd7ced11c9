//! In-memory connector for channel and session tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::protocol::Frame;
use super::transport::{Connection, Connector};
use crate::errors::SyncError;
use crate::util::lock;

/// The server side of one accepted mock connection. Dropping it drops the
/// connection.
pub struct MockPeer {
    inbound: fmpsc::UnboundedSender<Result<Frame, SyncError>>,
    outbound: fmpsc::UnboundedReceiver<Frame>,
}

impl MockPeer {
    /// Deliver a frame to the client.
    pub fn send(&self, frame: Frame) {
        let _ = self.inbound.unbounded_send(Ok(frame));
    }

    /// Next frame the client sent, `None` once the client closed its side.
    pub async fn next_outbound(&mut self) -> Option<Frame> {
        self.outbound.next().await
    }
}

enum Mode {
    Scripted { script: VecDeque<bool>, fallback: bool },
    Hanging,
}

/// Accepts or refuses handshakes from a script, recording when each
/// attempt happened. Accepted connections are handed to the test as
/// [`MockPeer`]s.
pub struct MockConnector {
    mode: Mutex<Mode>,
    attempts: Mutex<Vec<Instant>>,
    peers: mpsc::UnboundedSender<MockPeer>,
}

impl MockConnector {
    /// `script` decides the first attempts in order; `fallback` decides
    /// every attempt after it.
    pub fn new(
        script: impl IntoIterator<Item = bool>,
        fallback: bool,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<MockPeer>) {
        Self::with_mode(Mode::Scripted {
            script: script.into_iter().collect(),
            fallback,
        })
    }

    /// Every handshake hangs forever.
    pub fn hanging() -> (Arc<Self>, mpsc::UnboundedReceiver<MockPeer>) {
        Self::with_mode(Mode::Hanging)
    }

    fn with_mode(mode: Mode) -> (Arc<Self>, mpsc::UnboundedReceiver<MockPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            mode: Mutex::new(mode),
            attempts: Mutex::new(Vec::new()),
            peers,
        });
        (connector, rx)
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        lock(&self.attempts).clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Connection, SyncError> {
        lock(&self.attempts).push(Instant::now());

        let accept = match &mut *lock(&self.mode) {
            Mode::Scripted { script, fallback } => Some(script.pop_front().unwrap_or(*fallback)),
            Mode::Hanging => None,
        };
        let Some(accept) = accept else {
            return std::future::pending().await;
        };
        if !accept {
            return Err(SyncError::Transport("connection refused".into()));
        }

        let (inbound_tx, inbound_rx) = fmpsc::unbounded();
        let (outbound_tx, outbound_rx) = fmpsc::unbounded();
        let _ = self.peers.send(MockPeer {
            inbound: inbound_tx,
            outbound: outbound_rx,
        });

        Ok(Connection {
            sink: Box::pin(outbound_tx.sink_map_err(|_| SyncError::ConnectionLost)),
            stream: Box::pin(inbound_rx),
        })
    }
}
