//! Connection Supervisor
//!
//! Owns the live connection. One supervisor task runs per `connect`:
//!
//! ```text
//!             ┌──────────── open ok ────────────┐
//!             ▼                                 │
//! Connecting ──► Connected ── drop ──► Reconnecting ── budget spent ──► Disconnected
//!                    │                          │
//!                    └──────── close ───────────┴──────────────────────► Disconnected
//! ```
//!
//! Every time a connection comes up the supervisor replays the active
//! filters with the current watermark, then resends requests the previous
//! connection swallowed, then reads frames until the connection drops.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::codec::JsonCodec;
use super::dispatcher::{Dispatch, Dispatcher};
use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatMonitor, HeartbeatState};
use super::last_id::LastIdTracker;
use super::messages::ClientMessage;
use super::pending::PendingRequests;
use super::queue::EventSender;
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{Connection, Frame, Transport, TransportError};
use crate::domain::event::ConnectionEvent;
use crate::domain::subscription::SubscriptionRegistry;
use crate::infrastructure::config::StreamSettings;
use crate::infrastructure::metrics;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection and no reconnection in progress.
    #[default]
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// Connection is up.
    Connected,
    /// Connection dropped; retrying.
    Reconnecting,
}

impl ConnectionState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a supervisor shares with the client.
pub struct StreamContext {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) settings: StreamSettings,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) pending: Arc<PendingRequests>,
    pub(crate) registry: Arc<SubscriptionRegistry>,
    pub(crate) tracker: Arc<LastIdTracker>,
    pub(crate) queue: EventSender,
    state: RwLock<ConnectionState>,
}

impl std::fmt::Debug for StreamContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamContext")
            .field("state", &*self.state.read())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl StreamContext {
    /// Create a context.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        settings: StreamSettings,
        dispatcher: Dispatcher,
        pending: Arc<PendingRequests>,
        registry: Arc<SubscriptionRegistry>,
        tracker: Arc<LastIdTracker>,
        queue: EventSender,
    ) -> Self {
        Self {
            transport,
            settings,
            dispatcher,
            pending,
            registry,
            tracker,
            queue,
            state: RwLock::new(ConnectionState::Disconnected),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub(crate) fn set_state(&self, next: ConnectionState) {
        let previous = std::mem::replace(&mut *self.state.write(), next);
        if previous != next {
            tracing::debug!(from = %previous, to = %next, "Connection state changed");
            metrics::set_connected(next == ConnectionState::Connected);
        }
    }

    /// Persist the watermark off the async threads.
    fn flush_in_background(&self) {
        let tracker = Arc::clone(&self.tracker);
        drop(tokio::task::spawn_blocking(move || tracker.flush_logged()));
    }
}

/// Handle to a running supervisor.
#[derive(Debug)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<ClientMessage>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Queue a request for the connection. Returns `false` if the supervisor
    /// has stopped.
    pub fn send(&self, message: ClientMessage) -> bool {
        self.commands.send(message).is_ok()
    }

    /// Whether the supervisor is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Signal the supervisor to stop without waiting for it.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    /// Stop the supervisor and wait up to `grace` for it to send its close
    /// frame.
    pub async fn shutdown(self, grace: Duration) {
        self.cancel.cancel();
        if tokio::time::timeout(grace, self.task).await.is_err() {
            tracing::warn!(?grace, "Supervisor did not stop in time");
        }
    }
}

/// Open the first connection and start supervising it.
///
/// # Errors
///
/// Returns the transport error if the first connection attempt fails. No
/// retries are made for the first attempt.
pub async fn establish(
    ctx: Arc<StreamContext>,
    reconnect: ReconnectConfig,
) -> Result<SessionHandle, TransportError> {
    ctx.set_state(ConnectionState::Connecting);

    let conn = match ctx.transport.open().await {
        Ok(conn) => conn,
        Err(e) => {
            tracing::warn!(error = %e, "Initial connection failed");
            ctx.set_state(ConnectionState::Disconnected);
            return Err(e);
        }
    };

    tracing::info!("Connected to event stream");

    let (commands, commands_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(supervise(
        ctx,
        conn,
        commands_rx,
        cancel.clone(),
        ReconnectPolicy::new(reconnect),
    ));

    Ok(SessionHandle {
        commands,
        cancel,
        task,
    })
}

/// Why a connection stopped.
#[derive(Debug)]
enum ConnectionEnd {
    /// Local shutdown.
    Cancelled,
    /// The connection died.
    Lost {
        code: Option<u16>,
        cause: String,
    },
}

impl ConnectionEnd {
    fn lost(cause: impl Into<String>) -> Self {
        Self::Lost {
            code: None,
            cause: cause.into(),
        }
    }
}

enum Reconnect {
    Connected(Box<dyn Connection>),
    Cancelled,
    Exhausted { attempts: u32, cause: String },
}

async fn supervise(
    ctx: Arc<StreamContext>,
    mut conn: Box<dyn Connection>,
    mut commands: mpsc::UnboundedReceiver<ClientMessage>,
    cancel: CancellationToken,
    mut policy: ReconnectPolicy,
) {
    let codec = JsonCodec::new();

    loop {
        policy.reset();
        ctx.set_state(ConnectionState::Connected);

        let end = run_connection(&ctx, &codec, conn.as_mut(), &mut commands, &cancel).await;

        let (code, cause) = match end {
            ConnectionEnd::Cancelled => {
                if let Err(e) = conn.close().await {
                    tracing::debug!(error = %e, "Close frame not delivered");
                }
                tracing::info!("Event stream closed by client");
                return;
            }
            ConnectionEnd::Lost { code, cause } => (code, cause),
        };

        tracing::warn!(code = ?code, cause = %cause, "Event stream connection lost");
        ctx.set_state(ConnectionState::Reconnecting);
        ctx.flush_in_background();

        match reconnect(&ctx, &mut policy, &cancel).await {
            Reconnect::Connected(next) => conn = next,
            Reconnect::Cancelled => {
                tracing::info!("Event stream closed by client during reconnect");
                return;
            }
            Reconnect::Exhausted {
                attempts,
                cause: last_error,
            } => {
                tracing::error!(attempts, error = %last_error, "Giving up on event stream");
                ctx.set_state(ConnectionState::Disconnected);
                ctx.pending.fail_all("connection lost");
                metrics::set_pending_requests(0);
                ctx.queue.finish(ConnectionEvent::reconnect_exhausted(
                    attempts,
                    code,
                    Some(last_error),
                ));
                return;
            }
        }
    }
}

async fn reconnect(
    ctx: &StreamContext,
    policy: &mut ReconnectPolicy,
    cancel: &CancellationToken,
) -> Reconnect {
    let mut last_error = String::from("connection lost");

    while let Some(delay) = policy.next_delay() {
        let attempt = policy.attempt_count();
        tracing::info!(
            attempt,
            max_attempts = policy.max_attempts(),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Reconnecting to event stream"
        );

        tokio::select! {
            () = cancel.cancelled() => return Reconnect::Cancelled,
            () = tokio::time::sleep(delay) => {}
        }

        let opened = tokio::select! {
            () = cancel.cancelled() => return Reconnect::Cancelled,
            opened = ctx.transport.open() => opened,
        };

        match opened {
            Ok(conn) => {
                metrics::record_reconnect(true);
                tracing::info!(attempt, "Reconnected to event stream");
                return Reconnect::Connected(conn);
            }
            Err(e) => {
                metrics::record_reconnect(false);
                tracing::warn!(attempt, error = %e, "Reconnection attempt failed");
                last_error = e.to_string();
            }
        }
    }

    Reconnect::Exhausted {
        attempts: policy.attempt_count(),
        cause: last_error,
    }
}

async fn run_connection(
    ctx: &StreamContext,
    codec: &JsonCodec,
    conn: &mut dyn Connection,
    commands: &mut mpsc::UnboundedReceiver<ClientMessage>,
    cancel: &CancellationToken,
) -> ConnectionEnd {
    if let Err(end) = resume(ctx, codec, conn).await {
        return end;
    }

    let heartbeat_state = Arc::new(HeartbeatState::new());
    let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel(4);
    let heartbeat_cancel = cancel.child_token();
    let _heartbeat_guard = heartbeat_cancel.clone().drop_guard();
    let _heartbeat = tokio::spawn(
        HeartbeatMonitor::new(
            HeartbeatConfig::from_settings(&ctx.settings),
            Arc::clone(&heartbeat_state),
            heartbeat_tx,
            heartbeat_cancel,
        )
        .run(),
    );

    let flush_every = ctx.settings.last_id_flush_interval.max(Duration::from_millis(1));
    let mut flush =
        tokio::time::interval_at(tokio::time::Instant::now() + flush_every, flush_every);
    flush.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return ConnectionEnd::Cancelled,
            Some(event) = heartbeat_rx.recv() => match event {
                HeartbeatEvent::SendPing => {
                    heartbeat_state.mark_ping_sent();
                    if let Err(e) = conn.send(Frame::Ping(Vec::new())).await {
                        return ConnectionEnd::lost(e.to_string());
                    }
                }
                HeartbeatEvent::Timeout { elapsed } => {
                    return ConnectionEnd::lost(format!("no answer to ping for {elapsed:?}"));
                }
            },
            command = commands.recv() => {
                let Some(message) = command else {
                    return ConnectionEnd::Cancelled;
                };
                if !ctx.pending.contains(message.request_id()) {
                    tracing::debug!(
                        request_id = message.request_id(),
                        "Skipping abandoned request"
                    );
                    continue;
                }
                if let Err(e) = send_request(ctx, codec, conn, &message).await {
                    return ConnectionEnd::lost(e.to_string());
                }
            }
            _ = flush.tick() => ctx.flush_in_background(),
            frame = conn.recv() => {
                heartbeat_state.record_activity();
                match frame {
                    Some(Ok(Frame::Text(text))) => {
                        let outcome = tokio::select! {
                            biased;
                            () = cancel.cancelled() => return ConnectionEnd::Cancelled,
                            outcome = ctx.dispatcher.dispatch(&text) => outcome,
                        };
                        match outcome {
                            Dispatch::Continue => {}
                            Dispatch::ServerDisconnect { code, message } => {
                                return ConnectionEnd::Lost {
                                    code,
                                    cause: message
                                        .unwrap_or_else(|| "server disconnect".to_string()),
                                };
                            }
                            Dispatch::QueueClosed => return ConnectionEnd::Cancelled,
                        }
                    }
                    Some(Ok(Frame::Ping(data))) => {
                        if let Err(e) = conn.send(Frame::Pong(data)).await {
                            return ConnectionEnd::lost(e.to_string());
                        }
                    }
                    Some(Ok(Frame::Pong(_))) => {}
                    Some(Ok(Frame::Close { code, reason })) => {
                        tracing::info!(code = ?code, reason = %reason, "Server sent close frame");
                        return ConnectionEnd::Lost {
                            code,
                            cause: if reason.is_empty() {
                                "closed by server".to_string()
                            } else {
                                reason
                            },
                        };
                    }
                    Some(Err(e)) => return ConnectionEnd::lost(e.to_string()),
                    None => return ConnectionEnd::lost("connection ended"),
                }
            }
        }
    }
}

/// Replay the subscription and resend swallowed requests.
async fn resume(
    ctx: &StreamContext,
    codec: &JsonCodec,
    conn: &mut dyn Connection,
) -> Result<(), ConnectionEnd> {
    let snapshot = ctx.registry.snapshot(ctx.tracker.last_id());
    if !snapshot.is_empty() {
        let replay = ClientMessage::replay(&snapshot);
        tracing::info!(
            filters = snapshot.filters.len(),
            last_id = ?snapshot.last_id.map(|id| id.to_string()),
            "Replaying subscription"
        );
        write(codec, conn, &replay)
            .await
            .map_err(|e| ConnectionEnd::lost(e.to_string()))?;
    }

    for message in ctx.pending.written() {
        tracing::debug!(
            request_id = message.request_id(),
            action = message.action(),
            "Resending request"
        );
        write(codec, conn, &message)
            .await
            .map_err(|e| ConnectionEnd::lost(e.to_string()))?;
    }

    Ok(())
}

async fn send_request(
    ctx: &StreamContext,
    codec: &JsonCodec,
    conn: &mut dyn Connection,
    message: &ClientMessage,
) -> Result<(), TransportError> {
    // Marked first so a failed write is resent after reconnecting.
    ctx.pending.mark_sent(message.request_id());
    tracing::debug!(
        request_id = message.request_id(),
        action = message.action(),
        "Sending request"
    );
    write(codec, conn, message).await
}

async fn write(
    codec: &JsonCodec,
    conn: &mut dyn Connection,
    message: &ClientMessage,
) -> Result<(), TransportError> {
    let text = codec
        .encode(message)
        .map_err(|e| TransportError::Send(e.to_string()))?;
    conn.send(Frame::Text(text)).await
}
