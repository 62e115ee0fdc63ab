//! Domain Layer - Core event and subscription types.
//!
//! This layer contains the event model, the filter algebra and the
//! subscription registry. Nothing here performs I/O.

/// Curve, connection and timeout events.
pub mod event;

/// Subscription filters and their matching rules.
pub mod filter;

/// Active filter registry and replayable subscription state.
pub mod subscription;
