//! Event Data Loading
//!
//! Bridges a curve event to the [`DataLoader`] port.

use crate::application::ports::{DataLoader, DataRequest};
use crate::domain::event::{CurveUpdateEvent, EventType};

/// Failure loading the data behind a curve event.
#[derive(Debug, thiserror::Error)]
pub enum LoadError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The event type cannot carry data; the values no longer exist.
    #[error("no data available for {event_type} events")]
    NotAvailable {
        /// Type of the offending event.
        event_type: EventType,
    },

    /// The loader itself failed.
    #[error("data loader failed: {0}")]
    Loader(#[source] E),
}

impl CurveUpdateEvent {
    /// Request describing the data this event refers to.
    ///
    /// Returns `None` for delete and truncate events.
    #[must_use]
    pub fn data_request(&self) -> Option<DataRequest> {
        if !self.event_type.carries_data() {
            return None;
        }
        Some(DataRequest {
            curve: self.curve.name.clone(),
            instance: self.instance.clone(),
            begin: self.begin,
            end: self.end,
        })
    }

    /// Load the changed values through `loader`.
    ///
    /// # Errors
    ///
    /// [`LoadError::NotAvailable`] for delete/truncate events, otherwise
    /// whatever the loader reports.
    pub fn load_data<L: DataLoader>(&self, loader: &L) -> Result<L::Data, LoadError<L::Error>> {
        let request = self.data_request().ok_or(LoadError::NotAvailable {
            event_type: self.event_type,
        })?;
        tracing::debug!(
            event_id = %self.event_id,
            curve = %request.curve,
            "Loading event data"
        );
        loader.load(&request).map_err(LoadError::Loader)
    }
}
