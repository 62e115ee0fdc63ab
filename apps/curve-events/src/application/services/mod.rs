//! Application Services
//!
//! Services that coordinate domain types with the ports.
//!
//! - `handlers`: replaceable message/error callbacks with logging defaults
//! - `loader`: loading the data behind a curve event

pub mod handlers;
pub mod loader;

pub use handlers::{Handlers, LogErrorHandler, LogMessageHandler};
pub use loader::LoadError;
