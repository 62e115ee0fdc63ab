//! Curve Event Stream Adapter
//!
//! Implements the push-feed client:
//!
//! - **Codec**: JSON text frames ([`messages`], [`codec`])
//! - **Connection**: supervised WebSocket with heartbeat and reconnect
//!   ([`session`], [`heartbeat`], [`reconnect`], [`websocket`])
//! - **Routing**: dispatcher, pending acknowledgments, consumer queue
//!   ([`dispatcher`], [`pending`], [`queue`])
//! - **Resumption**: last event id watermark and its file ([`last_id`])
//! - **Facade**: the blocking [`CurveEventClient`]

pub mod client;
pub mod codec;
pub mod dispatcher;
pub mod heartbeat;
pub mod last_id;
pub mod messages;
pub mod pending;
pub mod queue;
pub mod reconnect;
pub mod session;
pub mod websocket;

pub use client::{
    ClientError, ConnectError, ConnectOptions, CurveEventClient, Events, SubscribeError,
};
pub use codec::{CodecError, JsonCodec};
pub use heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatMonitor, HeartbeatState};
pub use last_id::{LastIdError, LastIdRecord, LastIdTracker};
pub use messages::{ClientMessage, ServerMessage};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use session::ConnectionState;
pub use websocket::WebSocketTransport;
