//! Subscription Registry
//!
//! Holds the authoritative set of active filters for one client.
//!
//! # Design
//!
//! The registry only changes when the server confirms a registration, so a
//! rejected or timed-out `subscribe` leaves the previous set in force. After
//! every reconnect the connection manager takes a [`SubscriptionState`]
//! snapshot and replays it verbatim.

use parking_lot::RwLock;

use crate::domain::event::EventId;
use crate::domain::filter::{Filter, FilterValidationError, validate_filters};

// =============================================================================
// Subscription State
// =============================================================================

/// Filters plus resume watermark, as sent on (re)subscribe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionState {
    /// Active filters.
    pub filters: Vec<Filter>,
    /// Watermark the server resumes after.
    pub last_id: Option<EventId>,
}

impl SubscriptionState {
    /// Check if there is anything to replay.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

/// Server answer to a registration or filters query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeAck {
    /// Whether the server accepted the request.
    pub success: bool,
    /// Filters active on the server after the request; `None` if not subscribed.
    pub filters: Option<Vec<Filter>>,
    /// Failure details or informational text.
    pub message: Option<String>,
}

impl SubscribeAck {
    /// Failed acknowledgment produced locally (timeout, close, lost connection).
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            filters: None,
            message: Some(message.into()),
        }
    }
}

/// Counters describing the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Number of active filters.
    pub active_filters: usize,
    /// Number of confirmed registrations since creation.
    pub confirmed_registrations: u64,
}

#[derive(Debug, Default)]
struct RegistryInner {
    filters: Vec<Filter>,
    confirmed_registrations: u64,
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Thread-safe owner of the active filter set.
///
/// # Example
///
/// ```rust
/// use curve_events::domain::filter::{AttributeFilter, Filter};
/// use curve_events::domain::subscription::SubscriptionRegistry;
///
/// let registry = SubscriptionRegistry::new();
/// assert!(registry.snapshot(None).is_empty());
///
/// let filters: Vec<Filter> = vec![AttributeFilter::new().with_areas(["DE"]).into()];
/// registry.confirm(filters.clone());
/// assert_eq!(registry.filters(), filters);
///
/// registry.clear();
/// assert!(registry.filters().is_empty());
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    inner: RwLock<RegistryInner>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a filter set without touching the registry.
    ///
    /// # Errors
    ///
    /// Returns the validation failure for the set.
    pub fn validate(filters: &[Filter]) -> Result<(), FilterValidationError> {
        validate_filters(filters)
    }

    /// Replace the active set with server-confirmed filters.
    pub fn confirm(&self, filters: Vec<Filter>) {
        let mut inner = self.inner.write();
        tracing::debug!(
            previous = inner.filters.len(),
            active = filters.len(),
            "Subscription confirmed"
        );
        inner.filters = filters;
        inner.confirmed_registrations += 1;
    }

    /// Drop every active filter.
    pub fn clear(&self) {
        self.inner.write().filters.clear();
    }

    /// Currently active filters.
    #[must_use]
    pub fn filters(&self) -> Vec<Filter> {
        self.inner.read().filters.clone()
    }

    /// Whether any filter is active.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        !self.inner.read().filters.is_empty()
    }

    /// State to replay, combined with the caller's current watermark.
    #[must_use]
    pub fn snapshot(&self, last_id: Option<EventId>) -> SubscriptionState {
        SubscriptionState {
            filters: self.filters(),
            last_id,
        }
    }

    /// Registry counters.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let inner = self.inner.read();
        SubscriptionStats {
            active_filters: inner.filters.len(),
            confirmed_registrations: inner.confirmed_registrations,
        }
    }
}
