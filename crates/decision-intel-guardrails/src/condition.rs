// decision-intel-guardrails/src/condition.rs
// ============================================================================
// Module: Condition Model
// Description: v1 field-operator triples and v2 structured evaluators
//              (§3.3, §4.6).
// Purpose: Define the condition tree shared by a guardrail's `conditions`
//          (scope gate) and `requirements` (pass/fail checks).
// Dependencies: decision-intel-core, serde, serde_json
// ============================================================================

//! ## Overview
//! A [`Condition`] is either a direct field comparison, a semantic-recall
//! check, a temporal-recurrence check, an aggregate-statistic check, or a
//! compound `and`/`or` of nested conditions (§4.6). Field conditions are
//! evaluated synchronously against an [`crate::context::ActionContext`];
//! the other three require a store lookup and are evaluated by
//! [`crate::engine::GuardrailEngine`], which is async.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use decision_intel_core::Outcome;

use crate::context::ActionContext;
use crate::tristate::TriState;

/// Comparison operator for field and aggregate conditions (§3.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Less than (numeric).
    Lt,
    /// Greater than (numeric).
    Gt,
    /// Less than or equal (numeric).
    Le,
    /// Greater than or equal (numeric).
    Ge,
    /// Value is a member of a set.
    In,
    /// Value is not a member of a set.
    NotIn,
}

/// A v1 direct field comparison (§4.6: "string compare is case-sensitive").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCondition {
    /// Dotted path into the action context, e.g. `"stakes"`.
    pub field: String,
    /// Comparison operator.
    pub operator: Operator,
    /// Right-hand side. For `in`/`not_in` this must be an array.
    pub value: Value,
}

impl FieldCondition {
    /// Evaluates this condition against `ctx`.
    #[must_use]
    pub fn evaluate(&self, ctx: &ActionContext) -> TriState {
        let Some(actual) = ctx.get(&self.field) else {
            return TriState::Unknown;
        };
        compare(actual, self.operator, &self.value)
    }
}

/// A v2 semantic-recall condition (§4.6): embeds `context[query_field]` and
/// checks whether enough sufficiently close prior decisions with a matching
/// outcome exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticCondition {
    /// Field in the action context to embed as the query.
    pub query_field: String,
    /// Restrict matches to decisions with this outcome.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_outcome: Option<Outcome>,
    /// Restrict matches to decisions recorded within this many days.
    pub filter_since_days: u32,
    /// Minimum number of sufficiently close matches required.
    pub min_matches: usize,
    /// Maximum distance (inclusive) for a match to count.
    pub threshold: f64,
}

/// A v2 temporal-recurrence condition (§4.6): counts decisions with a
/// matching field recorded within a trailing window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalCondition {
    /// Field in the action context (and in stored project context) to
    /// match exactly.
    pub field: String,
    /// Required value of `field`.
    pub value: Value,
    /// Trailing window, in hours, to search within.
    pub window_hours: u32,
    /// The match count must exceed this number for the condition to hold.
    pub max_occurrences: usize,
}

/// Aggregate statistic computed over a filtered decision set (§4.8, §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateMetric {
    /// Fraction of reviewed decisions with outcome `success`.
    SuccessRate,
    /// Fraction of reviewed decisions with outcome `failure` or `abandoned`.
    FailureRate,
    /// Mean stated confidence.
    AvgConfidence,
}

/// A v2 aggregate condition (§4.6): computes `metric` over decisions
/// matching `field=value` and compares to `threshold`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateCondition {
    /// Metric to compute.
    pub metric: AggregateMetric,
    /// Field to filter decisions by.
    pub field: String,
    /// Required value of `field`.
    pub value: Value,
    /// Comparison operator against `threshold`.
    pub operator: Operator,
    /// Threshold to compare the computed metric against.
    pub threshold: f64,
}

/// Logical connective for a compound condition (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicOp {
    /// All nested conditions must hold.
    And,
    /// At least one nested condition must hold.
    Or,
}

/// A condition: a field comparison, a semantic/temporal/aggregate store
/// query, or a compound of nested conditions (§3.3, §4.6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    /// Direct field comparison.
    Field(FieldCondition),
    /// Semantic-recall check.
    Semantic(SemanticCondition),
    /// Temporal-recurrence check.
    Temporal(TemporalCondition),
    /// Aggregate-statistic check.
    Aggregate(AggregateCondition),
    /// Logical compound of nested conditions.
    Compound {
        /// Connective applied across `conditions`.
        op: LogicOp,
        /// Nested conditions.
        conditions: Vec<Condition>,
    },
}

/// Compares a JSON value against another using the given operator.
///
/// Numeric comparisons coerce both sides to `f64`; anything that fails to
/// parse as a number falls back to string comparison, which keeps `lt`/`gt`
/// meaningful for both numbers and comparable strings. `in`/`not_in` expect
/// `expected` to be a JSON array.
#[must_use]
pub fn compare(actual: &Value, operator: Operator, expected: &Value) -> TriState {
    match operator {
        Operator::Eq => TriState::from(actual == expected),
        Operator::Ne => TriState::from(actual != expected),
        Operator::Lt => ordered_cmp(actual, expected, |ord| ord == std::cmp::Ordering::Less),
        Operator::Gt => ordered_cmp(actual, expected, |ord| ord == std::cmp::Ordering::Greater),
        Operator::Le => ordered_cmp(actual, expected, |ord| ord != std::cmp::Ordering::Greater),
        Operator::Ge => ordered_cmp(actual, expected, |ord| ord != std::cmp::Ordering::Less),
        Operator::In => membership(actual, expected, true),
        Operator::NotIn => membership(actual, expected, false),
    }
}

/// Orders `actual` against `expected`, preferring a numeric comparison and
/// falling back to a byte-wise string comparison, then applies `accept` to
/// the resulting ordering.
fn ordered_cmp(
    actual: &Value,
    expected: &Value,
    accept: impl Fn(std::cmp::Ordering) -> bool,
) -> TriState {
    let ordering = match (actual.as_f64(), expected.as_f64()) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => match (actual.as_str(), expected.as_str()) {
            (Some(a), Some(b)) => Some(a.cmp(b)),
            _ => None,
        },
    };
    match ordering {
        Some(ord) => TriState::from(accept(ord)),
        None => TriState::Unknown,
    }
}

fn membership(actual: &Value, expected: &Value, want_present: bool) -> TriState {
    let Some(set) = expected.as_array() else {
        return TriState::Unknown;
    };
    let present = set.iter().any(|item| item == actual);
    TriState::from(present == want_present)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn field_condition_reports_unknown_on_missing_field() {
        let ctx = ActionContext::new(
            decision_intel_core::AgentId::new("a1"),
            json!({"stakes": "high"}),
        );
        let cond = FieldCondition {
            field: "confidence".to_string(),
            operator: Operator::Gt,
            value: json!(0.5),
        };
        assert_eq!(cond.evaluate(&ctx), TriState::Unknown);
    }

    #[test]
    fn field_condition_matches_equality() {
        let ctx = ActionContext::new(
            decision_intel_core::AgentId::new("a1"),
            json!({"stakes": "high"}),
        );
        let cond = FieldCondition {
            field: "stakes".to_string(),
            operator: Operator::Eq,
            value: json!("high"),
        };
        assert_eq!(cond.evaluate(&ctx), TriState::True);
    }

    #[test]
    fn numeric_gt_compares_numbers() {
        assert_eq!(compare(&json!(0.9), Operator::Gt, &json!(0.5)), TriState::True);
        assert_eq!(compare(&json!(0.2), Operator::Gt, &json!(0.5)), TriState::False);
    }

    #[test]
    fn in_operator_checks_membership() {
        assert_eq!(
            compare(&json!("high"), Operator::In, &json!(["high", "critical"])),
            TriState::True
        );
        assert_eq!(
            compare(&json!("low"), Operator::NotIn, &json!(["high", "critical"])),
            TriState::True
        );
    }
}
