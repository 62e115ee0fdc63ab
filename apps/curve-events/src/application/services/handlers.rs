//! Callback Registry
//!
//! Holds the replaceable message and error handlers. The lock only guards
//! the handler reference: callers clone the `Arc` out and invoke it after the
//! lock is released, so a slow handler never blocks a setter.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::application::ports::{ErrorHandler, MessageHandler};

/// Default message handler: logs at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMessageHandler;

impl MessageHandler for LogMessageHandler {
    fn on_message(&self, message: &str) {
        tracing::info!(message, "Server message");
    }
}

/// Default error handler: logs at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogErrorHandler;

impl ErrorHandler for LogErrorHandler {
    fn on_error(&self, error: &str) {
        tracing::error!(error, "Stream error");
    }
}

/// Message and error handlers shared with the dispatcher.
pub struct Handlers {
    message: RwLock<Arc<dyn MessageHandler>>,
    error: RwLock<Arc<dyn ErrorHandler>>,
}

impl Default for Handlers {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handlers").finish_non_exhaustive()
    }
}

impl Handlers {
    /// Handlers with the logging defaults installed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            message: RwLock::new(Arc::new(LogMessageHandler)),
            error: RwLock::new(Arc::new(LogErrorHandler)),
        }
    }

    /// Replace the message handler.
    pub fn set_message_handler(&self, handler: Arc<dyn MessageHandler>) {
        *self.message.write() = handler;
    }

    /// Replace the error handler.
    pub fn set_error_handler(&self, handler: Arc<dyn ErrorHandler>) {
        *self.error.write() = handler;
    }

    /// Dispatch an informational message.
    pub fn message(&self, message: &str) {
        let handler = Arc::clone(&self.message.read());
        handler.on_message(message);
    }

    /// Dispatch an error.
    pub fn error(&self, error: &str) {
        let handler = Arc::clone(&self.error.read());
        handler.on_error(error);
    }
}
