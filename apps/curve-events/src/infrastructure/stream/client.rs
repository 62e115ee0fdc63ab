//! Curve Event Client
//!
//! Blocking facade over the supervised stream. The client owns a small tokio
//! runtime; every public method blocks the calling thread and must not be
//! called from inside an async context.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use curve_events::domain::event::Event;
//! use curve_events::domain::filter::AttributeFilter;
//! use curve_events::{ClientConfig, ConnectOptions, CurveEventClient};
//!
//! # fn main() -> anyhow::Result<()> {
//! let client = CurveEventClient::new(ClientConfig::new("wss://events.example.com/stream"))?;
//! client.connect(ConnectOptions::default().with_last_id_file("state/last_id.json"))?;
//! client.subscribe(vec![AttributeFilter::new().with_areas(["DE"]).into()], None)?;
//!
//! for event in client.events(Some(Duration::from_secs(5))) {
//!     match event {
//!         Event::Curve(e) => println!("{} {}", e.event_id, e.curve.name),
//!         Event::Timeout(_) => continue,
//!         Event::Connection(e) => println!("disconnected: {:?}", e.message),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::dispatcher::Dispatcher;
use super::last_id::LastIdTracker;
use super::messages::ClientMessage;
use super::pending::{PendingRequests, Responder};
use super::queue::{EventReceiver, event_queue};
use super::reconnect::ReconnectConfig;
use super::session::{self, ConnectionState, SessionHandle, StreamContext};
use super::websocket::WebSocketTransport;
use crate::application::ports::{
    ErrorHandler, MessageHandler, SubscribeCallback, Transport, TransportError,
};
use crate::application::services::Handlers;
use crate::domain::event::{ConnectionEvent, Event, EventId};
use crate::domain::filter::{Filter, FilterValidationError};
use crate::domain::subscription::{SubscribeAck, SubscriptionRegistry, SubscriptionState};
use crate::infrastructure::config::ClientConfig;
use crate::infrastructure::metrics;

/// How long `close` waits for the supervisor to send its close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

// =============================================================================
// Errors
// =============================================================================

/// Client construction failed.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The internal runtime could not be started.
    #[error("failed to start client runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// The first connection attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// Transport could not open the connection.
    #[error("failed to connect to event stream: {0}")]
    Transport(#[from] TransportError),
}

/// A subscription request failed.
#[derive(Debug, thiserror::Error)]
pub enum SubscribeError {
    /// The filter set is invalid; nothing was sent.
    #[error("invalid filters: {0}")]
    Validation(#[from] FilterValidationError),

    /// No connection is being supervised.
    #[error("not connected")]
    NotConnected,

    /// No acknowledgment arrived in time.
    #[error("no acknowledgment within {0:?}")]
    Timeout(Duration),

    /// The server refused the request.
    #[error("rejected by server: {0}")]
    Rejected(String),

    /// The client was closed or gave up reconnecting before the answer came.
    #[error("request cancelled")]
    Cancelled,
}

// =============================================================================
// Options
// =============================================================================

/// Per-`connect` options.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Reconnection attempts per outage; `None` uses the configured value.
    pub reconnect_attempts: Option<u32>,
    /// File mirroring the last event id; `None` uses the configured file.
    pub last_id_file: Option<PathBuf>,
}

impl ConnectOptions {
    /// Override the reconnection budget.
    #[must_use]
    pub const fn with_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.reconnect_attempts = Some(attempts);
        self
    }

    /// Persist the last event id to `path`.
    #[must_use]
    pub fn with_last_id_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.last_id_file = Some(path.into());
        self
    }
}

// =============================================================================
// Client
// =============================================================================

/// Real-time curve event client.
pub struct CurveEventClient {
    runtime: tokio::runtime::Runtime,
    ctx: Arc<StreamContext>,
    handlers: Arc<Handlers>,
    receiver: Mutex<EventReceiver>,
    session: Mutex<Option<SessionHandle>>,
    default_last_id_file: Option<PathBuf>,
}

impl std::fmt::Debug for CurveEventClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CurveEventClient")
            .field("state", &self.ctx.state())
            .field("last_id", &self.ctx.tracker.last_id())
            .finish_non_exhaustive()
    }
}

impl CurveEventClient {
    /// Client speaking WebSocket to `config.url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be started.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let transport = Arc::new(WebSocketTransport::new(
            config.url.clone(),
            config.headers.clone(),
        ));
        Self::with_transport(config, transport)
    }

    /// Client over a custom transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be started.
    pub fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ClientError> {
        metrics::describe_metrics();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("curve-events")
            .enable_all()
            .build()?;

        let (queue, receiver) = event_queue(config.stream.queue_capacity);
        let handlers = Arc::new(Handlers::new());
        let pending = Arc::new(PendingRequests::new());
        let registry = Arc::new(SubscriptionRegistry::new());
        let tracker = Arc::new(LastIdTracker::new());

        let dispatcher = Dispatcher::new(
            Arc::clone(&handlers),
            Arc::clone(&pending),
            Arc::clone(&registry),
            Arc::clone(&tracker),
            queue.clone(),
        );

        let ctx = Arc::new(StreamContext::new(
            transport,
            config.stream,
            dispatcher,
            pending,
            registry,
            tracker,
            queue,
        ));

        Ok(Self {
            runtime,
            ctx,
            handlers,
            receiver: Mutex::new(receiver),
            session: Mutex::new(None),
            default_last_id_file: config.last_id_file,
        })
    }

    // -------------------------------------------------------------------------
    // Connection
    // -------------------------------------------------------------------------

    /// Connect and start supervising the connection.
    ///
    /// Blocks until the first connection attempt succeeds or fails. An
    /// existing subscription is replayed automatically. Does nothing if a
    /// connection is already supervised.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError`] if the first attempt fails.
    pub fn connect(&self, options: ConnectOptions) -> Result<(), ConnectError> {
        let mut session = self.session.lock();
        if session.is_some() && self.ctx.state() != ConnectionState::Disconnected {
            tracing::debug!("Already connected");
            return Ok(());
        }

        // A supervisor that gave up may still be publishing its final event.
        if let Some(stale) = session.take() {
            self.runtime.block_on(stale.shutdown(CLOSE_GRACE));
        }

        if let Some(path) = options.last_id_file.or_else(|| self.default_last_id_file.clone()) {
            self.ctx.tracker.attach(path);
        }

        let mut reconnect = ReconnectConfig::from_settings(&self.ctx.settings);
        if let Some(attempts) = options.reconnect_attempts {
            reconnect = reconnect.with_max_attempts(attempts);
        }

        self.ctx.queue.reset();
        match self
            .runtime
            .block_on(session::establish(Arc::clone(&self.ctx), reconnect))
        {
            Ok(handle) => {
                *session = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.ctx.queue.finish(ConnectionEvent::never_connected());
                Err(ConnectError::Transport(e))
            }
        }
    }

    /// Close the connection and stop reconnecting.
    ///
    /// Queued events stay consumable and are followed by a terminal
    /// [`ConnectionEvent`]. Pending requests fail with
    /// [`SubscribeError::Cancelled`]. Calling it again does nothing.
    pub fn close(&self) {
        let handle = self.session.lock().take();
        if let Some(handle) = handle {
            self.runtime.block_on(handle.shutdown(CLOSE_GRACE));
        }

        self.ctx.set_state(ConnectionState::Disconnected);
        self.ctx.pending.fail_all("client closed");
        metrics::set_pending_requests(0);
        if self.ctx.queue.finish(ConnectionEvent::manual_close()) {
            tracing::info!("Event client closed");
        }
        self.ctx.tracker.flush_logged();
    }

    /// Alias for [`close`](Self::close).
    pub fn disconnect(&self) {
        self.close();
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.ctx.state()
    }

    /// Whether a connection is being supervised (connected or reconnecting).
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.session.lock().is_some() && self.ctx.state() != ConnectionState::Disconnected
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    /// Replace the subscription and wait for the server to confirm it.
    ///
    /// `last_id` resumes after the given event. Once the server confirms,
    /// it replaces both the in-process watermark and the one restored from
    /// file.
    ///
    /// # Errors
    ///
    /// See [`SubscribeError`]. On any error the previous subscription stays
    /// in force.
    pub fn subscribe(
        &self,
        filters: Vec<Filter>,
        last_id: Option<EventId>,
    ) -> Result<Vec<Filter>, SubscribeError> {
        self.subscribe_timeout(filters, last_id, self.ctx.settings.subscribe_timeout)
    }

    /// [`subscribe`](Self::subscribe) with an explicit wait bound.
    ///
    /// # Errors
    ///
    /// See [`SubscribeError`].
    pub fn subscribe_timeout(
        &self,
        filters: Vec<Filter>,
        last_id: Option<EventId>,
        timeout: Duration,
    ) -> Result<Vec<Filter>, SubscribeError> {
        let outgoing = self.prepare_subscribe(filters, last_id)?;
        let ack = self.request(outgoing, timeout)?;
        if ack.success {
            Ok(ack.filters.unwrap_or_else(|| self.ctx.registry.filters()))
        } else {
            Err(SubscribeError::Rejected(ack.message.unwrap_or_default()))
        }
    }

    /// Replace the subscription without waiting.
    ///
    /// `callback` runs on the dispatcher with the acknowledgment, or with a
    /// failed acknowledgment if the client closes first.
    ///
    /// # Errors
    ///
    /// Returns an error if the filters are invalid or the client is not
    /// connected.
    pub fn subscribe_with_callback<C>(
        &self,
        filters: Vec<Filter>,
        last_id: Option<EventId>,
        callback: C,
    ) -> Result<(), SubscribeError>
    where
        C: SubscribeCallback + 'static,
    {
        let outgoing = self.prepare_subscribe(filters, last_id)?;
        self.submit(outgoing, Responder::Callback(Arc::new(callback)))
    }

    /// Drop every filter on the server and locally.
    ///
    /// # Errors
    ///
    /// See [`SubscribeError`].
    pub fn unsubscribe(&self, timeout: Option<Duration>) -> Result<(), SubscribeError> {
        let timeout = timeout.unwrap_or(self.ctx.settings.subscribe_timeout);
        let ack = self.request(ClientMessage::unsubscribe(), timeout)?;
        if ack.success {
            Ok(())
        } else {
            Err(SubscribeError::Rejected(ack.message.unwrap_or_default()))
        }
    }

    /// Filters the server currently applies, or `None` when not subscribed
    /// or not connected.
    ///
    /// # Errors
    ///
    /// Returns an error on timeout, rejection or cancellation.
    pub fn get_active_filters(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Option<Vec<Filter>>, SubscribeError> {
        if !self.is_connected() {
            return Ok(None);
        }

        let timeout = timeout.unwrap_or(self.ctx.settings.subscribe_timeout);
        let ack = match self.request(ClientMessage::get_filters(), timeout) {
            Ok(ack) => ack,
            Err(SubscribeError::NotConnected) => return Ok(None),
            Err(e) => return Err(e),
        };

        if ack.success {
            Ok(ack.filters.filter(|filters| !filters.is_empty()))
        } else {
            Err(SubscribeError::Rejected(ack.message.unwrap_or_default()))
        }
    }

    /// Locally confirmed filters plus the current watermark.
    #[must_use]
    pub fn subscription(&self) -> SubscriptionState {
        self.ctx.registry.snapshot(self.ctx.tracker.last_id())
    }

    // -------------------------------------------------------------------------
    // Consumption
    // -------------------------------------------------------------------------

    /// Next event, waiting at most `timeout` (forever if `None`).
    ///
    /// Returns [`Event::Timeout`] if the bound elapses with nothing to
    /// deliver. Once disconnected and drained, returns the terminal
    /// [`Event::Connection`] once; after that it waits for the next
    /// `connect` to produce events.
    pub fn get_next(&self, timeout: Option<Duration>) -> Event {
        let mut receiver = self.receiver.lock();
        self.runtime.block_on(receiver.next(timeout))
    }

    /// Iterate over events; the iterator ends after yielding a
    /// [`Event::Connection`].
    #[must_use]
    pub const fn events(&self, timeout: Option<Duration>) -> Events<'_> {
        Events {
            client: self,
            timeout,
            done: false,
        }
    }

    /// Highest event id handed to the queue so far.
    #[must_use]
    pub fn last_id(&self) -> Option<EventId> {
        self.ctx.tracker.last_id()
    }

    // -------------------------------------------------------------------------
    // Handlers
    // -------------------------------------------------------------------------

    /// Replace the handler for informational server messages.
    pub fn set_message_handler<H>(&self, handler: H)
    where
        H: MessageHandler + 'static,
    {
        self.handlers.set_message_handler(Arc::new(handler));
    }

    /// Replace the handler for server and decoding errors.
    pub fn set_error_handler<H>(&self, handler: H)
    where
        H: ErrorHandler + 'static,
    {
        self.handlers.set_error_handler(Arc::new(handler));
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    /// The watermark only moves to a caller-supplied `last_id` once the
    /// server confirms the subscription.
    fn prepare_subscribe(
        &self,
        filters: Vec<Filter>,
        last_id: Option<EventId>,
    ) -> Result<Outgoing, SubscribeError> {
        SubscriptionRegistry::validate(&filters)?;
        if !self.is_connected() {
            return Err(SubscribeError::NotConnected);
        }
        let sent_last_id = last_id.or_else(|| self.ctx.tracker.last_id());
        Ok(Outgoing {
            message: ClientMessage::subscribe(filters, sent_last_id),
            resume_from: last_id,
        })
    }

    fn submit(&self, outgoing: Outgoing, responder: Responder) -> Result<(), SubscribeError> {
        let session = self.session.lock();
        let Some(handle) = session.as_ref().filter(|h| h.is_running()) else {
            return Err(SubscribeError::NotConnected);
        };

        let Outgoing {
            message,
            resume_from,
        } = outgoing;
        let request_id = message.request_id().to_string();
        self.ctx.pending.register(message.clone(), responder, resume_from);
        if !handle.send(message) {
            self.ctx.pending.remove(&request_id);
            return Err(SubscribeError::NotConnected);
        }
        metrics::set_pending_requests(self.ctx.pending.len());
        Ok(())
    }

    fn request(
        &self,
        outgoing: impl Into<Outgoing>,
        timeout: Duration,
    ) -> Result<SubscribeAck, SubscribeError> {
        let outgoing = outgoing.into();
        let request_id = outgoing.message.request_id().to_string();
        let (tx, rx) = oneshot::channel();
        self.submit(outgoing, Responder::Blocking(tx))?;

        // The timer must be created inside the runtime.
        let waited = self
            .runtime
            .block_on(async { tokio::time::timeout(timeout, rx).await });
        match waited {
            Ok(Ok(ack)) => Ok(ack),
            Ok(Err(_)) => Err(SubscribeError::Cancelled),
            Err(_) => {
                self.ctx.pending.remove(&request_id);
                metrics::set_pending_requests(self.ctx.pending.len());
                tracing::warn!(
                    %request_id,
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "Request timed out"
                );
                Err(SubscribeError::Timeout(timeout))
            }
        }
    }
}

/// A request plus the resume point it asks for.
#[derive(Debug)]
struct Outgoing {
    message: ClientMessage,
    resume_from: Option<EventId>,
}

impl From<ClientMessage> for Outgoing {
    fn from(message: ClientMessage) -> Self {
        Self {
            message,
            resume_from: None,
        }
    }
}

impl Drop for CurveEventClient {
    fn drop(&mut self) {
        if let Some(handle) = self.session.get_mut().take() {
            handle.abort();
        }
        self.ctx.tracker.flush_logged();
    }
}

/// Iterator returned by [`CurveEventClient::events`].
#[derive(Debug)]
pub struct Events<'a> {
    client: &'a CurveEventClient,
    timeout: Option<Duration>,
    done: bool,
}

impl Iterator for Events<'_> {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        if self.done {
            return None;
        }
        let event = self.client.get_next(self.timeout);
        self.done = event.is_terminal();
        Some(event)
    }
}
