//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Curve event stream client (WebSocket, codec, supervision).
pub mod stream;

/// Configuration loading.
pub mod config;

/// Metrics instrumentation through the `metrics` facade.
pub mod metrics;

/// Logging and OpenTelemetry setup for the binary.
pub mod telemetry;
