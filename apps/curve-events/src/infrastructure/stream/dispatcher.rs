//! Event Dispatcher
//!
//! Routes every decoded server message to its destination:
//!
//! | Message       | Destination                                        |
//! |---------------|----------------------------------------------------|
//! | `curve_event` | last-id tracker, then the consumer queue           |
//! | `filters`     | pending request (blocking caller or callback)      |
//! | `message`     | message handler                                    |
//! | `error`       | error handler, and its pending request if any      |
//! | `disconnect`  | reported back to the connection loop               |
//!
//! Frames that fail to decode go to the error handler and are skipped.

use std::sync::Arc;

use super::codec::JsonCodec;
use super::last_id::LastIdTracker;
use super::messages::ServerMessage;
use super::pending::PendingRequests;
use super::queue::EventSender;
use crate::application::services::Handlers;
use crate::domain::event::CurveUpdateEvent;
use crate::domain::subscription::{SubscribeAck, SubscriptionRegistry};
use crate::infrastructure::metrics;

/// What the connection loop should do after a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Keep reading.
    Continue,
    /// The server announced it is closing the connection.
    ServerDisconnect {
        /// Status code.
        code: Option<u16>,
        /// Reason text.
        message: Option<String>,
    },
    /// The consumer queue is gone; stop reading.
    QueueClosed,
}

/// Shared state the dispatcher writes into.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    codec: JsonCodec,
    handlers: Arc<Handlers>,
    pending: Arc<PendingRequests>,
    registry: Arc<SubscriptionRegistry>,
    tracker: Arc<LastIdTracker>,
    queue: EventSender,
}

impl Dispatcher {
    /// Create a dispatcher.
    #[must_use]
    pub const fn new(
        handlers: Arc<Handlers>,
        pending: Arc<PendingRequests>,
        registry: Arc<SubscriptionRegistry>,
        tracker: Arc<LastIdTracker>,
        queue: EventSender,
    ) -> Self {
        Self {
            codec: JsonCodec::new(),
            handlers,
            pending,
            registry,
            tracker,
            queue,
        }
    }

    /// Handle one text frame.
    ///
    /// Waits for queue capacity when the consumer lags. Dropping the future
    /// mid-way never advances the watermark past an event that was not
    /// queued.
    pub async fn dispatch(&self, text: &str) -> Dispatch {
        let messages = match self.codec.decode(text) {
            Ok(messages) => messages,
            Err(e) => {
                metrics::record_decode_error();
                let preview: String = text.chars().take(100).collect();
                tracing::warn!(error = %e, frame = %preview, "Failed to decode frame");
                self.handlers.error(&format!("failed to decode frame: {e}"));
                return Dispatch::Continue;
            }
        };

        for message in messages {
            let outcome = self.route(message).await;
            if outcome != Dispatch::Continue {
                return outcome;
            }
        }

        Dispatch::Continue
    }

    async fn route(&self, message: ServerMessage) -> Dispatch {
        match message {
            ServerMessage::CurveEvent(msg) => self.enqueue(CurveUpdateEvent::from(msg)).await,
            ServerMessage::Filters(msg) => {
                let Some(request_id) = msg.request_id.clone() else {
                    tracing::debug!(success = msg.success, "Unsolicited filters message");
                    return Dispatch::Continue;
                };
                // Replay subscriptions after a reconnect are not tracked.
                let ack = SubscribeAck::from(msg);
                if self
                    .pending
                    .resolve(&request_id, ack, &self.registry, &self.tracker)
                {
                    metrics::set_pending_requests(self.pending.len());
                } else {
                    tracing::debug!(%request_id, "Acknowledgment for untracked request");
                }
                Dispatch::Continue
            }
            ServerMessage::Message(msg) => {
                self.handlers.message(&msg.message);
                Dispatch::Continue
            }
            ServerMessage::Error(msg) => {
                self.handlers.error(&msg.message);
                if let Some(id) = msg.request_id.as_deref()
                    && self.pending.resolve(
                        id,
                        SubscribeAck::failed(msg.message.clone()),
                        &self.registry,
                        &self.tracker,
                    )
                {
                    metrics::set_pending_requests(self.pending.len());
                }
                Dispatch::Continue
            }
            ServerMessage::Disconnect(msg) => {
                tracing::info!(
                    code = ?msg.code,
                    message = msg.message.as_deref().unwrap_or(""),
                    "Server announced disconnect"
                );
                Dispatch::ServerDisconnect {
                    code: msg.code,
                    message: msg.message,
                }
            }
        }
    }

    async fn enqueue(&self, event: CurveUpdateEvent) -> Dispatch {
        let id = event.event_id;
        if self.tracker.last_id().is_some_and(|last| id <= last) {
            metrics::record_duplicate_event();
            tracing::debug!(event_id = %id, "Dropping already delivered event");
            return Dispatch::Continue;
        }

        let event_type = event.event_type;
        if self.queue.send(event).await.is_err() {
            tracing::debug!("Event queue closed");
            return Dispatch::QueueClosed;
        }

        self.tracker.observe(id);
        metrics::record_event_received(event_type);
        Dispatch::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::{Event, EventId};
    use crate::domain::filter::NameFilter;
    use crate::infrastructure::stream::messages::ClientMessage;
    use crate::infrastructure::stream::pending::Responder;
    use crate::infrastructure::stream::queue::{EventReceiver, event_queue};
    use parking_lot::Mutex;
    use tokio::sync::oneshot;

    struct Fixture {
        dispatcher: Dispatcher,
        rx: EventReceiver,
        handlers: Arc<Handlers>,
        pending: Arc<PendingRequests>,
        registry: Arc<SubscriptionRegistry>,
        tracker: Arc<LastIdTracker>,
    }

    fn fixture() -> Fixture {
        let (tx, rx) = event_queue(16);
        tx.reset();
        let handlers = Arc::new(Handlers::new());
        let pending = Arc::new(PendingRequests::new());
        let registry = Arc::new(SubscriptionRegistry::new());
        let tracker = Arc::new(LastIdTracker::new());
        Fixture {
            dispatcher: Dispatcher::new(
                Arc::clone(&handlers),
                Arc::clone(&pending),
                Arc::clone(&registry),
                Arc::clone(&tracker),
                tx,
            ),
            rx,
            handlers,
            pending,
            registry,
            tracker,
        }
    }

    fn curve_frame(id: &str) -> String {
        format!(
            r#"{{"type":"curve_event","id":"{id}","curve":"de wnd","event_type":"CURVE_UPDATE"}}"#
        )
    }

    fn drain(rx: &mut EventReceiver) -> Vec<EventId> {
        std::iter::from_fn(|| match rx.try_next() {
            Some(Event::Curve(e)) => Some(e.event_id),
            _ => None,
        })
        .collect()
    }

    #[tokio::test]
    async fn events_are_queued_in_order_and_tracked() {
        let mut f = fixture();
        let batch = format!("[{},{}]", curve_frame("10-0"), curve_frame("10-1"));

        assert_eq!(f.dispatcher.dispatch(&batch).await, Dispatch::Continue);
        assert_eq!(f.dispatcher.dispatch(&curve_frame("11-0")).await, Dispatch::Continue);

        assert_eq!(
            drain(&mut f.rx),
            vec![EventId::new(10, 0), EventId::new(10, 1), EventId::new(11, 0)]
        );
        assert_eq!(f.tracker.last_id(), Some(EventId::new(11, 0)));
    }

    #[tokio::test]
    async fn replayed_events_are_dropped() {
        let mut f = fixture();
        f.dispatcher.dispatch(&curve_frame("10-0")).await;
        f.dispatcher.dispatch(&curve_frame("10-1")).await;
        f.dispatcher.dispatch(&curve_frame("10-0")).await;
        f.dispatcher.dispatch(&curve_frame("10-1")).await;
        f.dispatcher.dispatch(&curve_frame("10-2")).await;

        assert_eq!(
            drain(&mut f.rx),
            vec![EventId::new(10, 0), EventId::new(10, 1), EventId::new(10, 2)]
        );
    }

    #[tokio::test]
    async fn acknowledgment_resolves_pending_request() {
        let f = fixture();
        let filters = vec![NameFilter::new(["de wnd"]).into()];
        let msg = ClientMessage::subscribe(filters, None);
        let id = msg.request_id().to_string();
        let (tx, mut ack_rx) = oneshot::channel();
        f.pending.register(msg, Responder::Blocking(tx), None);

        let frame = format!(
            r#"{{"type":"filters","request_id":"{id}","success":true,"filters":[{{"kind":"name","names":["de wnd"]}}]}}"#
        );
        f.dispatcher.dispatch(&frame).await;

        assert!(ack_rx.try_recv().unwrap().success);
        assert!(f.registry.is_subscribed());
    }

    #[tokio::test]
    async fn error_for_request_fails_it() {
        let f = fixture();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        f.handlers
            .set_error_handler(Arc::new(move |e: &str| sink.lock().push(e.to_string())));

        let msg = ClientMessage::get_filters();
        let id = msg.request_id().to_string();
        let (tx, mut ack_rx) = oneshot::channel();
        f.pending.register(msg, Responder::Blocking(tx), None);

        let frame = format!(r#"{{"type":"error","request_id":"{id}","code":400,"message":"bad"}}"#);
        f.dispatcher.dispatch(&frame).await;

        let ack = ack_rx.try_recv().unwrap();
        assert!(!ack.success);
        assert_eq!(ack.message.as_deref(), Some("bad"));
        assert_eq!(*errors.lock(), vec!["bad"]);
    }

    #[tokio::test]
    async fn info_messages_reach_handler() {
        let f = fixture();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        f.handlers
            .set_message_handler(Arc::new(move |m: &str| sink.lock().push(m.to_string())));

        f.dispatcher
            .dispatch(r#"{"type":"message","message":"maintenance"}"#)
            .await;
        assert_eq!(*seen.lock(), vec!["maintenance"]);
    }

    #[tokio::test]
    async fn garbage_is_reported_and_skipped() {
        let mut f = fixture();
        let errors = Arc::new(Mutex::new(0_usize));
        let sink = Arc::clone(&errors);
        f.handlers.set_error_handler(Arc::new(move |_: &str| *sink.lock() += 1));

        assert_eq!(f.dispatcher.dispatch("not json").await, Dispatch::Continue);
        assert_eq!(f.dispatcher.dispatch(r#"{"type":"bogus"}"#).await, Dispatch::Continue);
        f.dispatcher.dispatch(&curve_frame("1-0")).await;

        assert_eq!(*errors.lock(), 2);
        assert_eq!(drain(&mut f.rx), vec![EventId::new(1, 0)]);
    }

    #[tokio::test]
    async fn disconnect_stops_the_batch() {
        let mut f = fixture();
        let batch = format!(
            r#"[{},{{"type":"disconnect","code":1001,"message":"restart"}},{}]"#,
            curve_frame("1-0"),
            curve_frame("1-1")
        );

        let outcome = f.dispatcher.dispatch(&batch).await;
        assert_eq!(
            outcome,
            Dispatch::ServerDisconnect {
                code: Some(1001),
                message: Some("restart".to_string())
            }
        );
        assert_eq!(drain(&mut f.rx), vec![EventId::new(1, 0)]);
    }
}
