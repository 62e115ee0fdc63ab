//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for the transport, data loader and callbacks.
pub mod ports;

/// Application services for callbacks and data loading.
pub mod services;
