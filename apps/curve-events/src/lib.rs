#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Curve Events - Real-time Curve Event Stream Client
//!
//! A client for the data vendor's push feed: one long-lived WebSocket that
//! delivers ordered curve change notifications, survives outages, resumes
//! without gaps or duplicates, and exposes a blocking, timeout-aware
//! consumption model.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Event model and subscription rules
//!   - `event`: Event ids, curve/connection/timeout events
//!   - `filter`: Name and attribute filters, validation, matching
//!   - `subscription`: Confirmed filter registry
//!
//! - **Application**: Port definitions and services
//!   - `ports`: Transport, data loader and callback interfaces
//!   - `services`: Callback registry, event data loading
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `stream`: WebSocket client, codec, dispatcher, supervisor
//!   - `config`: Configuration from code or environment
//!   - `metrics`: `metrics` facade instrumentation
//!   - `telemetry`: Log and OTLP setup for the binary
//!
//! # Data Flow
//!
//! ```text
//!             ┌────────┐   ┌────────────┐   ┌───────┐
//! socket ────►│ codec  │──►│ dispatcher │──►│ queue │──► get_next / events
//!             └────────┘   └─────┬──────┘   └───────┘
//!                                ├──► last-id tracker ──► file
//!                                ├──► pending acks ──► subscribe
//!                                └──► message / error handlers
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Event and subscription types with no I/O.
pub mod domain;

/// Application layer - Port definitions and services.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::event::{
    ConnectionEvent, Curve, CurveUpdateEvent, DisconnectReason, Event, EventId, EventKind,
    EventType, Instance, TimeoutEvent,
};
pub use domain::filter::{AttributeFilter, Filter, FilterValidationError, MAX_FILTERS, NameFilter};
pub use domain::subscription::{SubscribeAck, SubscriptionState};

// Ports
pub use application::ports::{
    Connection, DataLoader, DataRequest, ErrorHandler, Frame, MessageHandler, SubscribeCallback,
    Transport, TransportError,
};
pub use application::services::LoadError;

// Client
pub use infrastructure::stream::{
    ClientError, ConnectError, ConnectOptions, ConnectionState, CurveEventClient, Events,
    SubscribeError, WebSocketTransport,
};

// Infrastructure config
pub use infrastructure::config::{ClientConfig, ConfigError, StreamSettings};

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
