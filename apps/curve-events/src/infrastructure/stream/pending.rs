//! Pending Requests
//!
//! Requests waiting for a `filters` acknowledgment, keyed by request id.
//! Each entry remembers whether it was written to a connection so that a
//! reconnect can resend what the dropped connection swallowed.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::last_id::LastIdTracker;
use super::messages::ClientMessage;
use crate::application::ports::SubscribeCallback;
use crate::domain::event::EventId;
use crate::domain::subscription::{SubscribeAck, SubscriptionRegistry};

/// Who gets the acknowledgment.
pub enum Responder {
    /// A caller blocked in `subscribe`/`unsubscribe`/`get_active_filters`.
    /// Dropping the sender tells it the request was cancelled.
    Blocking(oneshot::Sender<SubscribeAck>),
    /// A callback invoked from the dispatcher.
    Callback(Arc<dyn SubscribeCallback>),
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blocking(_) => f.write_str("Blocking"),
            Self::Callback(_) => f.write_str("Callback"),
        }
    }
}

#[derive(Debug)]
struct PendingRequest {
    message: ClientMessage,
    responder: Responder,
    /// Caller-supplied resume point, applied once confirmed.
    resume_from: Option<EventId>,
    sent: bool,
}

/// Outstanding requests in submission order.
#[derive(Debug, Default)]
pub struct PendingRequests {
    entries: Mutex<Vec<PendingRequest>>,
}

impl PendingRequests {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `message` until it is acknowledged.
    pub fn register(
        &self,
        message: ClientMessage,
        responder: Responder,
        resume_from: Option<EventId>,
    ) {
        self.entries.lock().push(PendingRequest {
            message,
            responder,
            resume_from,
            sent: false,
        });
    }

    /// Record that `request_id` was written to the current connection.
    pub fn mark_sent(&self, request_id: &str) {
        if let Some(entry) = self
            .entries
            .lock()
            .iter_mut()
            .find(|e| e.message.request_id() == request_id)
        {
            entry.sent = true;
        }
    }

    /// Whether `request_id` is still waiting.
    #[must_use]
    pub fn contains(&self, request_id: &str) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|e| e.message.request_id() == request_id)
    }

    /// Number of outstanding requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Requests that were written to a connection which has since dropped.
    #[must_use]
    pub fn written(&self) -> Vec<ClientMessage> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.sent)
            .map(|e| e.message.clone())
            .collect()
    }

    /// Stop tracking `request_id` (caller gave up waiting).
    pub fn remove(&self, request_id: &str) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| e.message.request_id() != request_id);
        entries.len() != before
    }

    /// Complete `request_id` with `ack`.
    ///
    /// A successful subscribe replaces the registry's filters and moves the
    /// watermark to its resume point, if one was given. A successful
    /// unsubscribe clears the filters. Failures leave both untouched.
    /// Returns `false` for ids that are not pending.
    pub fn resolve(
        &self,
        request_id: &str,
        ack: SubscribeAck,
        registry: &SubscriptionRegistry,
        tracker: &LastIdTracker,
    ) -> bool {
        let entry = {
            let mut entries = self.entries.lock();
            let Some(index) = entries
                .iter()
                .position(|e| e.message.request_id() == request_id)
            else {
                return false;
            };
            entries.remove(index)
        };

        if ack.success {
            match &entry.message {
                ClientMessage::Subscribe { filters, .. } => {
                    registry.confirm(ack.filters.clone().unwrap_or_else(|| filters.clone()));
                    if let Some(id) = entry.resume_from {
                        tracing::info!(last_id = %id, "Resuming from caller-supplied event id");
                        tracker.set(id);
                    }
                }
                ClientMessage::Unsubscribe { .. } => registry.clear(),
                ClientMessage::GetFilters { .. } => {}
            }
        } else {
            tracing::warn!(
                request_id,
                action = entry.message.action(),
                message = ack.message.as_deref().unwrap_or(""),
                "Request rejected by server"
            );
        }

        deliver(entry.responder, &ack);
        true
    }

    /// Fail every outstanding request.
    ///
    /// Blocked callers observe a cancellation; callbacks receive a failed
    /// acknowledgment carrying `reason`.
    pub fn fail_all(&self, reason: &str) {
        let drained: Vec<_> = std::mem::take(&mut *self.entries.lock());
        if drained.is_empty() {
            return;
        }

        tracing::debug!(count = drained.len(), reason, "Failing pending requests");
        let ack = SubscribeAck::failed(reason);
        for entry in drained {
            match entry.responder {
                Responder::Blocking(tx) => drop(tx),
                Responder::Callback(callback) => callback.on_ack(&ack),
            }
        }
    }
}

fn deliver(responder: Responder, ack: &SubscribeAck) {
    match responder {
        Responder::Blocking(tx) => {
            // The caller may already have timed out.
            let _ = tx.send(ack.clone());
        }
        Responder::Callback(callback) => callback.on_ack(ack),
    }
}
