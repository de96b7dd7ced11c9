//! Realtime channel: one persistent connection with automatic reconnection.
//!
//! ## States
//!
//! ```text
//!               connect()                 handshake ok
//! Disconnected ──────────> Connecting ─────────────────> Connected
//!      ^  ^                    │                             │
//!      │  └── retry timer ─────┤ handshake failed            │ transport lost
//!      │      (fixed delay)    v                             v
//!      └──────────────── Disconnected <──────────────── (reconnect with
//!        budget spent:      (exhausted)                   fresh budget)
//!        manual connect()
//! ```
//!
//! A supervisor task owns the transport. It makes at most
//! `max_attempts` handshake attempts in a row, `reconnect_delay` apart,
//! then stays disconnected (`exhausted`) until [`RealtimeChannel::connect`]
//! is called again. [`RealtimeChannel::disconnect`] stops the supervisor and
//! closes the transport; nothing reconnects after it.
//!
//! Inbound frames are dispatched to the single handler registered for their
//! event name. The channel never interprets payloads beyond ack matching.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::protocol::{self, AckReply, Frame, ProjectUpdated};
use super::transport::{Connection, Connector};
use crate::config::RealtimeSection;
use crate::errors::SyncError;
use crate::util::lock;

/// Callback for one inbound event name.
pub type Handler = Arc<dyn Fn(Value) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// What a status indicator needs to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelStatus {
    pub state: ConnectionState,
    /// Handshake attempts in the current run (0 while connected)
    pub attempts: u32,
    /// The attempt budget is spent; only a manual connect retries
    pub exhausted: bool,
}

impl ChannelStatus {
    fn disconnected() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempts: 0,
            exhausted: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub reconnect_delay: Duration,
    pub max_attempts: u32,
    pub handshake_timeout: Duration,
    pub ack_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::from(&RealtimeSection::default())
    }
}

impl From<&RealtimeSection> for ChannelConfig {
    fn from(section: &RealtimeSection) -> Self {
        Self {
            reconnect_delay: section.reconnect_delay(),
            max_attempts: section.max_reconnect_attempts,
            handshake_timeout: section.handshake_timeout(),
            ack_timeout: section.ack_timeout(),
        }
    }
}

type AckSender = oneshot::Sender<Result<AckReply, SyncError>>;

/// State shared between the channel handle and its supervisor task.
struct Shared {
    status: watch::Sender<ChannelStatus>,
    handlers: Mutex<HashMap<String, Handler>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    pending_acks: Mutex<HashMap<u64, AckSender>>,
    next_ack: AtomicU64,
}

impl Shared {
    fn publish(&self, status: ChannelStatus) {
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    fn dispatch(&self, event: &str, data: Value) {
        let handler = lock(&self.handlers).get(event).cloned();
        match handler {
            Some(handler) => handler(data),
            None => debug!(event, "No handler registered"),
        }
    }

    fn handle_inbound(&self, frame: Frame) {
        if frame.event != protocol::ACK {
            self.dispatch(&frame.event, frame.data);
            return;
        }
        let Some(id) = frame.ack else {
            debug!("Ack frame without id");
            return;
        };
        let Some(waiter) = lock(&self.pending_acks).remove(&id) else {
            debug!(ack = id, "Ignoring ack for unknown request");
            return;
        };
        let reply = serde_json::from_value::<AckReply>(frame.data).map_err(SyncError::from);
        // The requester may have stopped waiting.
        let _ = waiter.send(reply);
    }

    fn send(&self, frame: Frame) -> Result<(), SyncError> {
        let outbound = lock(&self.outbound);
        let tx = outbound.as_ref().ok_or(SyncError::NotConnected)?;
        tx.send(frame).map_err(|_| SyncError::NotConnected)
    }

    /// Resolve every outstanding ack with `ConnectionLost`.
    fn abandon_acks(&self) {
        let waiters: Vec<AckSender> = lock(&self.pending_acks).drain().map(|(_, w)| w).collect();
        for waiter in waiters {
            let _ = waiter.send(Err(SyncError::ConnectionLost));
        }
    }
}

struct Supervisor {
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct RealtimeChannel {
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    config: ChannelConfig,
    supervisor: Mutex<Option<Supervisor>>,
}

impl RealtimeChannel {
    pub fn new(connector: Arc<dyn Connector>, config: ChannelConfig) -> Self {
        let (status, _) = watch::channel(ChannelStatus::disconnected());
        Self {
            shared: Arc::new(Shared {
                status,
                handlers: Mutex::new(HashMap::new()),
                outbound: Mutex::new(None),
                pending_acks: Mutex::new(HashMap::new()),
                next_ack: AtomicU64::new(0),
            }),
            connector,
            config,
            supervisor: Mutex::new(None),
        }
    }

    /// Start connecting. No-op while a connection or attempt is active.
    /// After the attempt budget was spent, this starts a fresh budget.
    ///
    /// Must be called inside a tokio runtime.
    pub fn connect(&self) {
        let mut supervisor = lock(&self.supervisor);
        // An exhausted supervisor publishes nothing further, even while it
        // is still dispatching `connect_error`.
        let active = supervisor.as_ref().is_some_and(|s| !s.task.is_finished())
            && !self.status().exhausted;
        if active {
            debug!("Connect requested while already active");
            return;
        }

        self.shared.publish(ChannelStatus {
            state: ConnectionState::Connecting,
            attempts: 0,
            exhausted: false,
        });
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(supervise(
            Arc::clone(&self.shared),
            Arc::clone(&self.connector),
            self.config.clone(),
            shutdown_rx,
        ));
        *supervisor = Some(Supervisor { shutdown_tx, task });
    }

    /// Close the connection and stop reconnecting. Idempotent.
    pub async fn disconnect(&self) {
        let supervisor = lock(&self.supervisor).take();
        if let Some(Supervisor { shutdown_tx, task }) = supervisor {
            let _ = shutdown_tx.send(());
            if let Err(e) = task.await {
                warn!(error = %e, "Realtime supervisor ended abnormally");
            }
            info!("Realtime channel disconnected");
        }
        lock(&self.shared.outbound).take();
        self.shared.abandon_acks();
        self.shared.publish(ChannelStatus::disconnected());
    }

    pub fn status(&self) -> ChannelStatus {
        *self.shared.status.borrow()
    }

    pub fn state(&self) -> ConnectionState {
        self.status().state
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ChannelStatus> {
        self.shared.status.subscribe()
    }

    /// Register the handler for `event`, replacing any previous one.
    pub fn on<F>(&self, event: &str, handler: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        if lock(&self.shared.handlers)
            .insert(event.to_string(), Arc::new(handler))
            .is_some()
        {
            debug!(event, "Replaced event handler");
        }
    }

    /// Remove the handler for `event`, if any.
    pub fn off(&self, event: &str) {
        lock(&self.shared.handlers).remove(event);
    }

    /// Register a typed handler for `project_updated` broadcasts. Malformed
    /// payloads are logged and dropped.
    pub fn on_project_updated<F>(&self, handler: F)
    where
        F: Fn(ProjectUpdated) + Send + Sync + 'static,
    {
        self.on(protocol::PROJECT_UPDATED, move |data| {
            match serde_json::from_value::<ProjectUpdated>(data) {
                Ok(update) => handler(update),
                Err(e) => warn!(error = %e, "Dropping malformed project_updated payload"),
            }
        });
    }

    /// Fire-and-forget send. Nothing is buffered while disconnected.
    ///
    /// # Errors
    ///
    /// [`SyncError::NotConnected`] unless a connection is established.
    pub fn emit(&self, event: &str, data: Value) -> Result<(), SyncError> {
        self.shared.send(Frame::new(event, data))
    }

    /// Send a frame carrying an ack id and wait for the matching reply.
    ///
    /// # Errors
    ///
    /// - [`SyncError::NotConnected`] if no connection is established
    /// - [`SyncError::ConnectionLost`] if the connection drops first
    /// - [`SyncError::AckTimeout`] if no reply arrives in time
    /// - [`SyncError::Rejected`] if the server refused the request
    pub async fn emit_with_ack(&self, event: &str, data: Value) -> Result<Option<Value>, SyncError> {
        let id = self.shared.next_ack.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        lock(&self.shared.pending_acks).insert(id, tx);

        if let Err(e) = self.shared.send(Frame::new(event, data).with_ack(id)) {
            lock(&self.shared.pending_acks).remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.config.ack_timeout, rx).await {
            Ok(Ok(reply)) => reply?.into_result(),
            Ok(Err(_)) => Err(SyncError::ConnectionLost),
            Err(_) => {
                lock(&self.shared.pending_acks).remove(&id);
                Err(SyncError::AckTimeout {
                    event: event.to_string(),
                    millis: self.config.ack_timeout.as_millis() as u64,
                })
            }
        }
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        if let Some(supervisor) = lock(&self.supervisor).take() {
            supervisor.task.abort();
        }
    }
}

enum SessionEnd {
    Shutdown,
    Lost,
}

/// Connect, run the session, and reconnect until shut down or out of attempts.
async fn supervise(
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    config: ChannelConfig,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let max_attempts = config.max_attempts.max(1);
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        shared.publish(ChannelStatus {
            state: ConnectionState::Connecting,
            attempts,
            exhausted: false,
        });
        info!(attempt = attempts, max_attempts, "Connecting realtime channel");

        let handshake = tokio::time::timeout(config.handshake_timeout, connector.connect());
        let result = tokio::select! {
            _ = &mut shutdown_rx => return,
            result = handshake => result,
        };

        let error = match result {
            Ok(Ok(connection)) => {
                attempts = 0;
                match run_session(&shared, connection, &mut shutdown_rx).await {
                    SessionEnd::Shutdown => return,
                    SessionEnd::Lost => {
                        warn!("Realtime connection lost");
                        shared.publish(ChannelStatus::disconnected());
                        shared.dispatch(protocol::DISCONNECT, Value::Null);
                    }
                }
                None
            }
            Ok(Err(e)) => Some(e),
            Err(_) => Some(SyncError::HandshakeTimeout {
                millis: config.handshake_timeout.as_millis() as u64,
            }),
        };

        if let Some(error) = error {
            let exhausted = attempts >= max_attempts;
            warn!(attempt = attempts, error = %error, "Realtime handshake failed");
            shared.publish(ChannelStatus {
                state: ConnectionState::Disconnected,
                attempts,
                exhausted,
            });
            shared.dispatch(protocol::CONNECT_ERROR, Value::String(error.to_string()));
            if exhausted {
                warn!(attempts, "{}", SyncError::ReconnectExhausted { attempts });
                return;
            }
        }

        tokio::select! {
            _ = &mut shutdown_rx => return,
            _ = tokio::time::sleep(config.reconnect_delay) => {}
        }
    }
}

/// Pump frames in both directions until the transport ends or shutdown.
async fn run_session(
    shared: &Shared,
    connection: Connection,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> SessionEnd {
    let Connection {
        mut sink,
        mut stream,
    } = connection;
    let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();
    *lock(&shared.outbound) = Some(tx);

    shared.publish(ChannelStatus {
        state: ConnectionState::Connected,
        attempts: 0,
        exhausted: false,
    });
    info!("Realtime channel connected");
    shared.dispatch(protocol::CONNECT, Value::Null);

    let end = loop {
        tokio::select! {
            _ = &mut *shutdown_rx => break SessionEnd::Shutdown,

            outbound = rx.recv() => {
                let Some(frame) = outbound else { break SessionEnd::Lost };
                if let Err(e) = sink.send(frame).await {
                    warn!(error = %e, "Failed to send frame");
                    break SessionEnd::Lost;
                }
            }

            inbound = stream.next() => match inbound {
                Some(Ok(frame)) => shared.handle_inbound(frame),
                Some(Err(SyncError::Codec(e))) => {
                    warn!(error = %e, "Dropping undecodable frame");
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Transport error");
                    break SessionEnd::Lost;
                }
                None => break SessionEnd::Lost,
            },
        }
    };

    lock(&shared.outbound).take();
    shared.abandon_acks();
    // Best-effort close; the transport is released either way.
    let _ = sink.close().await;
    end
}
