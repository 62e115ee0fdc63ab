//! Subscription Filters
//!
//! Predicates selecting which curve events the server delivers.
//!
//! # Semantics
//!
//! A filter matches an event when every field set on the filter matches
//! (conjunction). An event is delivered when it matches any active filter
//! (disjunction). At most [`MAX_FILTERS`] filters can be active at once.
//!
//! Filters are evaluated by the server; [`Filter::matches`] mirrors those
//! rules so callers can route events locally.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::event::{Curve, CurveUpdateEvent, EventType};

/// Maximum number of simultaneously active filters.
pub const MAX_FILTERS: usize = 10;

// =============================================================================
// Validation Errors
// =============================================================================

/// Reasons a filter set is rejected before anything is sent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterValidationError {
    /// No filters were supplied.
    #[error("at least one filter is required")]
    NoFilters,

    /// More than [`MAX_FILTERS`] filters were supplied.
    #[error("too many filters: {count} given, at most {max} allowed")]
    TooManyFilters {
        /// Number of filters supplied.
        count: usize,
        /// Allowed maximum.
        max: usize,
    },

    /// A name filter without names.
    #[error("filter {index}: name filter needs at least one curve name")]
    EmptyNames {
        /// Position of the filter in the request.
        index: usize,
    },

    /// An empty string inside a list field.
    #[error("filter {index}: field `{field}` contains an empty value")]
    EmptyValue {
        /// Position of the filter in the request.
        index: usize,
        /// Offending field.
        field: &'static str,
    },

    /// `begin` is not before `end`.
    #[error("filter {index}: begin {begin} is not before end {end}")]
    InvalidRange {
        /// Position of the filter in the request.
        index: usize,
        /// Range start.
        begin: DateTime<Utc>,
        /// Range end.
        end: DateTime<Utc>,
    },
}

// =============================================================================
// Filter Types
// =============================================================================

/// Fields shared by every filter variant.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FilterCommon {
    /// Event types to deliver; empty means all.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event_types: Vec<EventType>,
    /// Only changes overlapping `[begin, end)` are delivered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub begin: Option<DateTime<Utc>>,
    /// See `begin`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

impl FilterCommon {
    fn matches(&self, event: &CurveUpdateEvent) -> bool {
        if !self.event_types.is_empty() && !self.event_types.contains(&event.event_type) {
            return false;
        }

        if event.event_type == EventType::CurveTruncate {
            return true;
        }

        // An open side of the event range is treated as unbounded.
        if let (Some(filter_begin), Some(event_end)) = (self.begin, event.end)
            && event_end <= filter_begin
        {
            return false;
        }
        if let (Some(filter_end), Some(event_begin)) = (self.end, event.begin)
            && event_begin >= filter_end
        {
            return false;
        }

        true
    }

    fn validate(&self, index: usize) -> Result<(), FilterValidationError> {
        if let (Some(begin), Some(end)) = (self.begin, self.end)
            && begin >= end
        {
            return Err(FilterValidationError::InvalidRange { index, begin, end });
        }
        Ok(())
    }
}

/// Selects curves by exact name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NameFilter {
    /// Curve names.
    pub names: Vec<String>,
    /// Shared fields.
    #[serde(flatten)]
    pub common: FilterCommon,
}

impl NameFilter {
    /// Filter on the given curve names.
    #[must_use]
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            common: FilterCommon::default(),
        }
    }

    /// Restrict to the given event types.
    #[must_use]
    pub fn with_event_types(mut self, event_types: impl IntoIterator<Item = EventType>) -> Self {
        self.common.event_types = event_types.into_iter().collect();
        self
    }

    /// Restrict to changes overlapping `[begin, end)`.
    #[must_use]
    pub fn with_range(mut self, begin: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.common.begin = Some(begin);
        self.common.end = Some(end);
        self
    }
}

/// Selects curves by their attributes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AttributeFilter {
    /// Free-text query; every term must occur in the curve name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Price areas.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub areas: Vec<String>,
    /// Data types.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_types: Vec<String>,
    /// Commodities.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commodities: Vec<String>,
    /// Categories the curve must all carry.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
    /// Exact category set the curve must carry.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exact_categories: Vec<String>,
    /// Shared fields.
    #[serde(flatten)]
    pub common: FilterCommon,
}

impl AttributeFilter {
    /// Empty attribute filter, matching every curve.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the free-text query.
    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Restrict to the given areas.
    #[must_use]
    pub fn with_areas<I, S>(mut self, areas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.areas = areas.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict to the given data types.
    #[must_use]
    pub fn with_data_types<I, S>(mut self, data_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.data_types = data_types.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict to the given commodities.
    #[must_use]
    pub fn with_commodities<I, S>(mut self, commodities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.commodities = commodities.into_iter().map(Into::into).collect();
        self
    }

    /// Require all of the given categories.
    #[must_use]
    pub fn with_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories = categories.into_iter().map(Into::into).collect();
        self
    }

    /// Require exactly the given category set.
    #[must_use]
    pub fn with_exact_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exact_categories = categories.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict to the given event types.
    #[must_use]
    pub fn with_event_types(mut self, event_types: impl IntoIterator<Item = EventType>) -> Self {
        self.common.event_types = event_types.into_iter().collect();
        self
    }

    /// Restrict to changes overlapping `[begin, end)`.
    #[must_use]
    pub fn with_range(mut self, begin: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.common.begin = Some(begin);
        self.common.end = Some(end);
        self
    }

    fn matches_curve(&self, curve: &Curve) -> bool {
        if let Some(query) = &self.query {
            let name = curve.name.to_lowercase();
            if !query
                .split_whitespace()
                .all(|term| name.contains(&term.to_lowercase()))
            {
                return false;
            }
        }

        one_of(&self.areas, curve.area.as_deref())
            && one_of(&self.data_types, curve.data_type.as_deref())
            && one_of(&self.commodities, curve.commodity.as_deref())
            && contains_all(&curve.categories, &self.categories)
            && (self.exact_categories.is_empty()
                || lowercase_set(&curve.categories) == lowercase_set(&self.exact_categories))
    }

    fn lists(&self) -> [(&'static str, &[String]); 5] {
        [
            ("areas", &self.areas),
            ("data_types", &self.data_types),
            ("commodities", &self.commodities),
            ("categories", &self.categories),
            ("exact_categories", &self.exact_categories),
        ]
    }
}

/// A subscription filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Filter {
    /// Filter by curve name.
    Name(NameFilter),
    /// Filter by curve attributes.
    Attribute(AttributeFilter),
}

impl Filter {
    /// Shared fields of either variant.
    #[must_use]
    pub const fn common(&self) -> &FilterCommon {
        match self {
            Self::Name(f) => &f.common,
            Self::Attribute(f) => &f.common,
        }
    }

    /// Whether `event` satisfies every field set on this filter.
    #[must_use]
    pub fn matches(&self, event: &CurveUpdateEvent) -> bool {
        let variant_matches = match self {
            Self::Name(f) => f.names.iter().any(|name| *name == event.curve.name),
            Self::Attribute(f) => f.matches_curve(&event.curve),
        };
        variant_matches && self.common().matches(event)
    }

    fn validate(&self, index: usize) -> Result<(), FilterValidationError> {
        match self {
            Self::Name(f) => {
                if f.names.is_empty() {
                    return Err(FilterValidationError::EmptyNames { index });
                }
                if f.names.iter().any(|n| n.trim().is_empty()) {
                    return Err(FilterValidationError::EmptyValue {
                        index,
                        field: "names",
                    });
                }
            }
            Self::Attribute(f) => {
                for (field, values) in f.lists() {
                    if values.iter().any(|v| v.trim().is_empty()) {
                        return Err(FilterValidationError::EmptyValue { index, field });
                    }
                }
            }
        }
        self.common().validate(index)
    }
}

impl From<NameFilter> for Filter {
    fn from(filter: NameFilter) -> Self {
        Self::Name(filter)
    }
}

impl From<AttributeFilter> for Filter {
    fn from(filter: AttributeFilter) -> Self {
        Self::Attribute(filter)
    }
}

/// Validate a complete filter set before it is sent.
///
/// # Errors
///
/// Returns the first problem found: count out of bounds, or a malformed filter.
pub fn validate_filters(filters: &[Filter]) -> Result<(), FilterValidationError> {
    if filters.is_empty() {
        return Err(FilterValidationError::NoFilters);
    }
    if filters.len() > MAX_FILTERS {
        return Err(FilterValidationError::TooManyFilters {
            count: filters.len(),
            max: MAX_FILTERS,
        });
    }
    filters
        .iter()
        .enumerate()
        .try_for_each(|(index, filter)| filter.validate(index))
}

/// Whether `event` matches any filter in `filters`.
#[must_use]
pub fn matches_any(filters: &[Filter], event: &CurveUpdateEvent) -> bool {
    filters.iter().any(|f| f.matches(event))
}

fn one_of(allowed: &[String], value: Option<&str>) -> bool {
    if allowed.is_empty() {
        return true;
    }
    value.is_some_and(|v| allowed.iter().any(|a| a.eq_ignore_ascii_case(v)))
}

fn contains_all(have: &[String], required: &[String]) -> bool {
    required
        .iter()
        .all(|r| have.iter().any(|h| h.eq_ignore_ascii_case(r)))
}

fn lowercase_set(values: &[String]) -> HashSet<String> {
    values.iter().map(|v| v.to_lowercase()).collect()
}
