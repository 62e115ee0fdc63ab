//! Curve Event Types
//!
//! Domain types for everything the consumer can receive from the stream:
//! curve change notifications, connection status and timeout fillers.
//!
//! # Event identifiers
//!
//! Every curve event carries an id of the form `<millis>-<serial>`, e.g.
//! `1700000000000-0`. Ids are totally ordered by `(millis, serial)` and are
//! the watermark used to resume a stream after an outage.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Event Id
// =============================================================================

/// Error returned when an event id does not have the `<millis>-<serial>` shape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid event id {0:?}: expected <millis>-<serial>")]
pub struct EventIdError(pub String);

/// Identifier of a curve event, ordered by `(timestamp, serial)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventId {
    timestamp_ms: u64,
    serial: u64,
}

impl EventId {
    /// Create an id from its two components.
    #[must_use]
    pub const fn new(timestamp_ms: u64, serial: u64) -> Self {
        Self {
            timestamp_ms,
            serial,
        }
    }

    /// Milliseconds since the Unix epoch at which the server recorded the event.
    #[must_use]
    pub const fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    /// Sequence number among events sharing the same millisecond.
    #[must_use]
    pub const fn serial(&self) -> u64 {
        self.serial
    }

    /// Server timestamp as a UTC date-time, if representable.
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        i64::try_from(self.timestamp_ms)
            .ok()
            .and_then(DateTime::from_timestamp_millis)
    }
}

impl FromStr for EventId {
    type Err = EventIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || EventIdError(s.to_string());

        let (millis, serial) = s.split_once('-').ok_or_else(invalid)?;
        let all_digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
        if !all_digits(millis) || !all_digits(serial) {
            return Err(invalid());
        }

        Ok(Self {
            timestamp_ms: millis.parse().map_err(|_| invalid())?,
            serial: serial.parse().map_err(|_| invalid())?,
        })
    }
}

impl TryFrom<String> for EventId {
    type Error = EventIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EventId> for String {
    fn from(id: EventId) -> Self {
        id.to_string()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.timestamp_ms, self.serial)
    }
}

// =============================================================================
// Curve Event
// =============================================================================

/// Kind of change a curve event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// Values were written in `[begin, end)`.
    CurveUpdate,
    /// Values were deleted in `[begin, end)`.
    CurveDelete,
    /// The whole curve (or instance) was truncated.
    CurveTruncate,
}

impl EventType {
    /// Wire name of the event type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CurveUpdate => "CURVE_UPDATE",
            Self::CurveDelete => "CURVE_DELETE",
            Self::CurveTruncate => "CURVE_TRUNCATE",
        }
    }

    /// Whether data can still be loaded for an event of this type.
    #[must_use]
    pub const fn carries_data(&self) -> bool {
        matches!(self, Self::CurveUpdate)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one forecast run of a curve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Issue date of the forecast.
    pub issue_date: DateTime<Utc>,
    /// Optional tag distinguishing runs with the same issue date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// Reference to the curve an event belongs to.
///
/// Only `name` is guaranteed; the remaining attributes are filled in when the
/// server includes them and are used for client-side filter evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Curve {
    /// Curve identifier.
    pub name: String,
    /// Price area, e.g. `DE`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<String>,
    /// Data type, e.g. `F` (forecast) or `A` (actual).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    /// Commodity, e.g. `POW`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commodity: Option<String>,
    /// Categories, e.g. `WND`, `SPP`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
}

impl Curve {
    /// Curve reference carrying only a name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// A change to one data series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurveUpdateEvent {
    /// Ordered event identifier.
    pub event_id: EventId,
    /// Affected curve.
    pub curve: Curve,
    /// Kind of change.
    pub event_type: EventType,
    /// Forecast instance, for instance-based curves.
    pub instance: Option<Instance>,
    /// Start (inclusive) of the affected range.
    pub begin: Option<DateTime<Utc>>,
    /// End (exclusive) of the affected range.
    pub end: Option<DateTime<Utc>>,
    /// Number of values touched.
    pub num_values: u64,
}

impl CurveUpdateEvent {
    /// The half-open range of affected timestamps.
    ///
    /// Always `None` for truncations, whose range is meaningless.
    #[must_use]
    pub fn affected_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        match (self.event_type, self.begin, self.end) {
            (EventType::CurveTruncate, _, _) => None,
            (_, Some(begin), Some(end)) => Some((begin, end)),
            _ => None,
        }
    }
}

// =============================================================================
// Connection & Timeout Events
// =============================================================================

/// Why the stream reported itself disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The caller closed the client.
    ManualClose,
    /// The connection dropped and every reconnection attempt failed.
    ReconnectExhausted,
    /// `get_next` was called before `connect`.
    NeverConnected,
}

/// Terminal connectivity status, always of kind [`EventKind::Disconnected`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    /// Cause of the disconnect.
    pub reason: DisconnectReason,
    /// Close or error code reported by the server, if any.
    pub code: Option<u16>,
    /// Human-readable description.
    pub message: Option<String>,
}

impl ConnectionEvent {
    /// Disconnect caused by [`close`](crate::CurveEventClient::close).
    #[must_use]
    pub fn manual_close() -> Self {
        Self {
            reason: DisconnectReason::ManualClose,
            code: None,
            message: Some("connection closed by client".to_string()),
        }
    }

    /// Disconnect after reconnection gave up.
    #[must_use]
    pub fn reconnect_exhausted(attempts: u32, code: Option<u16>, cause: Option<String>) -> Self {
        let detail = cause.map_or_else(String::new, |c| format!(": {c}"));
        Self {
            reason: DisconnectReason::ReconnectExhausted,
            code,
            message: Some(format!(
                "connection lost, gave up after {attempts} reconnect attempt(s){detail}"
            )),
        }
    }

    /// Status reported when no connection was ever made.
    #[must_use]
    pub fn never_connected() -> Self {
        Self {
            reason: DisconnectReason::NeverConnected,
            code: None,
            message: Some("not connected".to_string()),
        }
    }
}

/// Filler produced when a bounded wait elapsed without any event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeoutEvent;

// =============================================================================
// Consumer-visible Event
// =============================================================================

/// Discriminator across all event variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// See [`EventType::CurveUpdate`].
    CurveUpdate,
    /// See [`EventType::CurveDelete`].
    CurveDelete,
    /// See [`EventType::CurveTruncate`].
    CurveTruncate,
    /// Connection status.
    Disconnected,
    /// Wait bound elapsed.
    Timeout,
}

/// One element of the consumer-facing sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A curve changed.
    Curve(CurveUpdateEvent),
    /// The stream is disconnected.
    Connection(ConnectionEvent),
    /// Nothing arrived within the requested wait bound.
    Timeout(TimeoutEvent),
}

impl Event {
    /// Kind of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Curve(event) => match event.event_type {
                EventType::CurveUpdate => EventKind::CurveUpdate,
                EventType::CurveDelete => EventKind::CurveDelete,
                EventType::CurveTruncate => EventKind::CurveTruncate,
            },
            Self::Connection(_) => EventKind::Disconnected,
            Self::Timeout(_) => EventKind::Timeout,
        }
    }

    /// The curve event, if this is one.
    #[must_use]
    pub const fn as_curve(&self) -> Option<&CurveUpdateEvent> {
        match self {
            Self::Curve(event) => Some(event),
            _ => None,
        }
    }

    /// Whether this event ends the stream until the next `connect`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}
