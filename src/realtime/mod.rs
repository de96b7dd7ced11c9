//! Realtime synchronization over a persistent socket.
//!
//! | Module      | Contents                                              |
//! |-------------|-------------------------------------------------------|
//! | `protocol`  | Event names, the JSON frame, typed payloads            |
//! | `transport` | `Connector` seam and the WebSocket implementation      |
//! | `channel`   | Connection state machine, reconnection, dispatch, acks |

pub mod channel;
pub mod protocol;
pub mod transport;

#[cfg(test)]
pub(crate) mod mock;

pub use channel::{ChannelConfig, ChannelStatus, ConnectionState, Handler, RealtimeChannel};
pub use protocol::{AckReply, Frame, ProjectUpdated, UpdateProject};
pub use transport::{Connection, Connector, WsConnector};
