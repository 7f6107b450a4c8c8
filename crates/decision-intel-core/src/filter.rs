// decision-intel-core/src/filter.rs
// ============================================================================
// Module: Filter Grammar
// Description: The filter/paging grammar shared by list, search, and the
//              guardrail and calibration subsystems.
// Purpose: Give every component that queries the store a single, consistent
//          vocabulary for "which decisions".
// Dependencies: crate::{ids, record, time}, serde
// ============================================================================

//! ## Overview
//! [`DecisionFilter`] is the grammar described in §4.1: category, stakes,
//! status, agent, tags (any-match), project, a date range, a free-text
//! search delegated to the keyword index, and `has_outcome`. It is reused
//! verbatim by the calibration service's `(agent, category, stakes, project,
//! feature, date_from, date_to)` inputs (§4.8) and by guardrail temporal/
//! aggregate conditions (§4.6).

use serde::Deserialize;
use serde::Serialize;

use crate::ids::AgentId;
use crate::record::Category;
use crate::record::Stakes;
use crate::record::Status;
use crate::time::Timestamp;

/// Which side of a bridge a directional search should prefer (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeSide {
    /// Prefer the implementation-oriented side.
    Structure,
    /// Prefer the purpose-oriented side.
    Function,
    /// No directional preference; use the full decision text.
    #[default]
    Both,
}

/// An inclusive `[from, to]` date range over `created_at`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    /// Inclusive lower bound.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Timestamp>,
    /// Inclusive upper bound.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<Timestamp>,
}

impl DateRange {
    /// Returns true when `value` falls within the range (unbounded sides
    /// always match).
    #[must_use]
    pub fn contains(&self, value: &Timestamp) -> bool {
        self.from.as_ref().is_none_or_le(value) && self.to.as_ref().is_none_or_ge(value)
    }
}

/// Helper trait so `DateRange::contains` reads naturally without requiring a
/// newer standard library `Option::is_none_or`.
trait BoundCheck {
    fn is_none_or_le(&self, value: &Timestamp) -> bool;
    fn is_none_or_ge(&self, value: &Timestamp) -> bool;
}

impl BoundCheck for Option<&Timestamp> {
    fn is_none_or_le(&self, value: &Timestamp) -> bool {
        match self {
            Some(bound) => *bound <= value,
            None => true,
        }
    }

    fn is_none_or_ge(&self, value: &Timestamp) -> bool {
        match self {
            Some(bound) => *bound >= value,
            None => true,
        }
    }
}

/// The filter grammar applied by `listDecisions`, the retrieval engine's
/// metadata pass, and every calibration/guardrail query (§4.1).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionFilter {
    /// Restrict to a single category.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    /// Restrict to a single stakes level.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stakes: Option<Stakes>,
    /// Restrict to a single lifecycle status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    /// Restrict to decisions recorded by this agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentId>,
    /// Restrict to decisions carrying at least one of these tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Restrict to decisions tagged with this project.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// Restrict to `created_at` within this range.
    #[serde(default)]
    pub date_range: DateRange,
    /// Free-text search delegated to the keyword index.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    /// Restrict to decisions that do/do not have an outcome attached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_outcome: Option<bool>,
}

/// A page request: offset-based, with a bounded size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Zero-based offset into the filtered, ordered result set.
    pub offset: usize,
    /// Maximum number of records to return.
    pub limit: usize,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

/// Default page size used when a caller does not specify one.
pub const DEFAULT_PAGE_LIMIT: usize = 50;
/// Maximum page size accepted regardless of caller request.
pub const MAX_PAGE_LIMIT: usize = 500;

impl PageRequest {
    /// Clamps `limit` to `[1, MAX_PAGE_LIMIT]`.
    #[must_use]
    pub fn clamped(self) -> Self {
        Self {
            offset: self.offset,
            limit: self.limit.clamp(1, MAX_PAGE_LIMIT),
        }
    }
}

/// A page of filtered, paginated, total-counted results (§4.1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    /// The records on this page.
    pub items: Vec<T>,
    /// Total number of records matching the filter, across all pages.
    pub total: usize,
    /// The offset this page started at.
    pub offset: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_date_range_contains_anything() {
        let range = DateRange::default();
        assert!(range.contains(&Timestamp::now()));
    }

    #[test]
    fn date_range_excludes_values_outside_bounds() {
        let now = Timestamp::now();
        let range = DateRange {
            from: Some(now.plus_millis(1_000)),
            to: None,
        };
        assert!(!range.contains(&now));
        assert!(range.contains(&now.plus_millis(2_000)));
    }

    #[test]
    fn page_request_clamps_to_maximum() {
        let req = PageRequest {
            offset: 0,
            limit: 10_000,
        }
        .clamped();
        assert_eq!(req.limit, MAX_PAGE_LIMIT);
    }
}
