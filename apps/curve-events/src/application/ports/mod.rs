//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters and callers implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`Transport`] / [`Connection`]: message-framed bidirectional stream
//! - [`DataLoader`]: REST surface returning the data behind a curve event
//!
//! ## Callback Ports (invoked from the dispatcher)
//!
//! - [`MessageHandler`], [`ErrorHandler`], [`SubscribeCallback`]

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::event::Instance;
use crate::domain::subscription::SubscribeAck;

// =============================================================================
// Transport
// =============================================================================

/// A single frame on the stream connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 payload carrying a codec message.
    Text(String),
    /// Liveness probe.
    Ping(Vec<u8>),
    /// Liveness answer.
    Pong(Vec<u8>),
    /// Peer is closing the connection.
    Close {
        /// Close code, if the peer sent one.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },
}

/// Transport-level failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Could not establish the connection.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Writing a frame failed.
    #[error("send failed: {0}")]
    Send(String),

    /// Reading a frame failed.
    #[error("receive failed: {0}")]
    Receive(String),

    /// The connection is already closed.
    #[error("connection closed")]
    Closed,
}

/// Factory for stream connections.
///
/// Called once by `connect` and again for every reconnection attempt.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a new connection to the event endpoint.
    async fn open(&self) -> Result<Box<dyn Connection>, TransportError>;
}

/// One open, bidirectional, message-framed connection.
///
/// `recv` must be cancel-safe: the session drops pending `recv` futures when
/// another branch of its `select!` wins.
#[async_trait]
pub trait Connection: Send {
    /// Write one frame.
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Read the next frame; `None` once the peer has gone away.
    async fn recv(&mut self) -> Option<Result<Frame, TransportError>>;

    /// Send a close frame and shut the connection down.
    async fn close(&mut self) -> Result<(), TransportError>;
}

// =============================================================================
// Data Loader
// =============================================================================

/// Data range a curve event refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRequest {
    /// Curve name.
    pub curve: String,
    /// Forecast instance, for instance-based curves.
    pub instance: Option<Instance>,
    /// Start (inclusive).
    pub begin: Option<DateTime<Utc>>,
    /// End (exclusive).
    pub end: Option<DateTime<Utc>>,
}

/// Loads the values behind a curve event from the REST surface.
///
/// The event client never interprets the returned data.
pub trait DataLoader {
    /// Loaded series type.
    type Data;
    /// Loader failure type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fetch `request.curve` over `[begin, end)`.
    ///
    /// # Errors
    ///
    /// Whatever the underlying REST client reports.
    fn load(&self, request: &DataRequest) -> Result<Self::Data, Self::Error>;
}

// =============================================================================
// Callbacks
// =============================================================================

/// Receives informational server messages.
pub trait MessageHandler: Send + Sync {
    /// Handle one message. Must not block indefinitely.
    fn on_message(&self, message: &str);
}

/// Receives server and decoding errors.
pub trait ErrorHandler: Send + Sync {
    /// Handle one error. Must not block indefinitely.
    fn on_error(&self, error: &str);
}

/// Receives the acknowledgment of a non-blocking `subscribe`.
pub trait SubscribeCallback: Send + Sync {
    /// Handle the acknowledgment, successful or not.
    fn on_ack(&self, ack: &SubscribeAck);
}

impl<F> MessageHandler for F
where
    F: Fn(&str) + Send + Sync,
{
    fn on_message(&self, message: &str) {
        self(message);
    }
}

impl<F> ErrorHandler for F
where
    F: Fn(&str) + Send + Sync,
{
    fn on_error(&self, error: &str) {
        self(error);
    }
}

impl<F> SubscribeCallback for F
where
    F: Fn(&SubscribeAck) + Send + Sync,
{
    fn on_ack(&self, ack: &SubscribeAck) {
        self(ack);
    }
}
