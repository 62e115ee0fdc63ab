//! Curve Event Stream Message Types
//!
//! Wire format types for the JSON text frames exchanged with the event
//! endpoint.
//!
//! # Message Types
//!
//! ## Client → Server (`action` discriminator)
//! - `subscribe`: replace the filter set, optionally resuming after `last_id`
//! - `unsubscribe`: drop every filter
//! - `get_filters`: ask for the server's view of the active filters
//!
//! ## Server → Client (`type` discriminator)
//! - `curve_event`: a curve changed
//! - `filters`: acknowledgment of a request carrying `request_id`
//! - `message`: informational text
//! - `error`: error text, optionally tied to a request
//! - `disconnect`: the server is about to close the connection

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::event::{Curve, CurveUpdateEvent, EventId, EventType, Instance};
use crate::domain::filter::Filter;
use crate::domain::subscription::{SubscribeAck, SubscriptionState};

// =============================================================================
// Client Messages
// =============================================================================

/// Request sent from the client to the server.
///
/// # Wire Format (JSON)
/// ```json
/// {"action":"subscribe","request_id":"...","filters":[{"kind":"attribute","areas":["DE"]}],"last_id":"1690000000000-3"}
/// {"action":"unsubscribe","request_id":"..."}
/// {"action":"get_filters","request_id":"..."}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Replace the active filter set.
    Subscribe {
        /// Correlates the acknowledgment.
        request_id: String,
        /// New filter set.
        filters: Vec<Filter>,
        /// Resume after this event.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_id: Option<EventId>,
    },
    /// Drop every active filter.
    Unsubscribe {
        /// Correlates the acknowledgment.
        request_id: String,
    },
    /// Query the active filters.
    GetFilters {
        /// Correlates the acknowledgment.
        request_id: String,
    },
}

impl ClientMessage {
    /// Build a subscribe request with a fresh request id.
    #[must_use]
    pub fn subscribe(filters: Vec<Filter>, last_id: Option<EventId>) -> Self {
        Self::Subscribe {
            request_id: new_request_id(),
            filters,
            last_id,
        }
    }

    /// Build a subscribe request replaying `state`.
    #[must_use]
    pub fn replay(state: &SubscriptionState) -> Self {
        Self::subscribe(state.filters.clone(), state.last_id)
    }

    /// Build an unsubscribe request with a fresh request id.
    #[must_use]
    pub fn unsubscribe() -> Self {
        Self::Unsubscribe {
            request_id: new_request_id(),
        }
    }

    /// Build a filters query with a fresh request id.
    #[must_use]
    pub fn get_filters() -> Self {
        Self::GetFilters {
            request_id: new_request_id(),
        }
    }

    /// Request id of this message.
    #[must_use]
    pub fn request_id(&self) -> &str {
        match self {
            Self::Subscribe { request_id, .. }
            | Self::Unsubscribe { request_id }
            | Self::GetFilters { request_id } => request_id,
        }
    }

    /// Action name, for logging.
    #[must_use]
    pub const fn action(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::GetFilters { .. } => "get_filters",
        }
    }
}

fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// =============================================================================
// Server Messages
// =============================================================================

/// Curve as sent on the wire: a bare name or a full attribute record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CurveRef {
    /// Name only.
    Name(String),
    /// Name plus attributes.
    Full(Curve),
}

impl From<CurveRef> for Curve {
    fn from(value: CurveRef) -> Self {
        match value {
            CurveRef::Name(name) => Self::named(name),
            CurveRef::Full(curve) => curve,
        }
    }
}

/// Curve change notification.
///
/// # Wire Format (JSON)
/// ```json
/// {"type":"curve_event","id":"1700000000000-0","curve":{"name":"pro de wnd ec00 mwh/h cet min15 f","area":"DE"},
///  "event_type":"CURVE_UPDATE","begin":"2024-01-01T00:00:00Z","end":"2024-01-02T00:00:00Z","num_values":96}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurveEventMessage {
    /// Event id.
    pub id: EventId,
    /// Affected curve.
    pub curve: CurveRef,
    /// Kind of change.
    pub event_type: EventType,
    /// Forecast instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<Instance>,
    /// Start of the affected range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub begin: Option<DateTime<Utc>>,
    /// End of the affected range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    /// Values touched.
    #[serde(default)]
    pub num_values: u64,
}

impl From<CurveEventMessage> for CurveUpdateEvent {
    fn from(msg: CurveEventMessage) -> Self {
        Self {
            event_id: msg.id,
            curve: msg.curve.into(),
            event_type: msg.event_type,
            instance: msg.instance,
            begin: msg.begin,
            end: msg.end,
            num_values: msg.num_values,
        }
    }
}

impl From<&CurveUpdateEvent> for CurveEventMessage {
    fn from(event: &CurveUpdateEvent) -> Self {
        Self {
            id: event.event_id,
            curve: CurveRef::Full(event.curve.clone()),
            event_type: event.event_type,
            instance: event.instance.clone(),
            begin: event.begin,
            end: event.end,
            num_values: event.num_values,
        }
    }
}

/// Acknowledgment of a subscribe, unsubscribe or filters query.
///
/// # Wire Format (JSON)
/// ```json
/// {"type":"filters","request_id":"...","success":true,"filters":[...]}
/// {"type":"filters","request_id":"...","success":false,"message":"too many filters"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiltersMessage {
    /// Request being acknowledged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Whether the request was accepted.
    #[serde(default = "default_true")]
    pub success: bool,
    /// Filters active after the request; `null` when not subscribed.
    #[serde(default)]
    pub filters: Option<Vec<Filter>>,
    /// Failure details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

const fn default_true() -> bool {
    true
}

impl From<FiltersMessage> for SubscribeAck {
    fn from(msg: FiltersMessage) -> Self {
        Self {
            success: msg.success,
            filters: msg.filters,
            message: msg.message,
        }
    }
}

/// Informational text from the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoMessage {
    /// Message text.
    pub message: String,
}

/// Error text from the server.
///
/// # Wire Format (JSON)
/// ```json
/// {"type":"error","request_id":"...","code":400,"message":"invalid filter"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Request this error answers, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Error code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    /// Error text.
    pub message: String,
}

/// Server-initiated disconnect notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectMessage {
    /// Status code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    /// Reason text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Any frame the server can send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Curve change.
    CurveEvent(CurveEventMessage),
    /// Request acknowledgment.
    Filters(FiltersMessage),
    /// Informational text.
    Message(InfoMessage),
    /// Error text.
    Error(ErrorMessage),
    /// Server is closing the connection.
    Disconnect(DisconnectMessage),
}
