//! Stream Metrics
//!
//! Counters and gauges recorded through the `metrics` facade. Without an
//! installed recorder every call is a no-op; an embedding application that
//! installs one (Prometheus, statsd, ...) picks them up unchanged.
//!
//! # Metrics
//!
//! - `curve_events_events_received_total`: curve events by type
//! - `curve_events_events_duplicate_total`: events dropped as already delivered
//! - `curve_events_decode_errors_total`: undecodable frames
//! - `curve_events_reconnects_total`: reconnection attempts
//! - `curve_events_connection_state`: 1 while connected, 0 otherwise
//! - `curve_events_pending_requests`: requests awaiting acknowledgment

use std::sync::Once;

use metrics::{counter, describe_counter, describe_gauge, gauge};

use crate::domain::event::EventType;

static DESCRIBE: Once = Once::new();

/// Register metric descriptions with the installed recorder.
///
/// Safe to call repeatedly; only the first call has an effect.
pub fn describe_metrics() {
    DESCRIBE.call_once(|| {
        describe_counter!(
            "curve_events_events_received_total",
            "Curve events handed to the consumer queue"
        );
        describe_counter!(
            "curve_events_events_duplicate_total",
            "Curve events dropped because they were already delivered"
        );
        describe_counter!(
            "curve_events_decode_errors_total",
            "Frames that could not be decoded"
        );
        describe_counter!(
            "curve_events_reconnects_total",
            "Reconnection attempts by outcome"
        );
        describe_gauge!(
            "curve_events_connection_state",
            "1 while the stream is connected"
        );
        describe_gauge!(
            "curve_events_pending_requests",
            "Requests awaiting a server acknowledgment"
        );
    });
}

/// Record a curve event entering the queue.
pub fn record_event_received(event_type: EventType) {
    counter!(
        "curve_events_events_received_total",
        "event_type" => event_type.as_str()
    )
    .increment(1);
}

/// Record a duplicate event being dropped.
pub fn record_duplicate_event() {
    counter!("curve_events_events_duplicate_total").increment(1);
}

/// Record an undecodable frame.
pub fn record_decode_error() {
    counter!("curve_events_decode_errors_total").increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect(success: bool) {
    counter!(
        "curve_events_reconnects_total",
        "outcome" => if success { "success" } else { "failure" }
    )
    .increment(1);
}

/// Update the connection gauge.
pub fn set_connected(connected: bool) {
    gauge!("curve_events_connection_state").set(if connected { 1.0 } else { 0.0 });
}

/// Update the pending request gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_pending_requests(count: usize) {
    gauge!("curve_events_pending_requests").set(count as f64);
}
