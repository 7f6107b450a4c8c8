// decision-intel-guardrails/src/guardrail.rs
// ============================================================================
// Module: Guardrail Document Model
// Description: The declarative guardrail shape and evaluation result types
//              (§3.3, §4.6).
// Purpose: Define what a guardrail document looks like and what evaluating
//          one against a context produces.
// Dependencies: crate::condition, serde
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::condition::Condition;

/// Action a guardrail takes when its requirements fail (§3.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Produce a violation; `allowed` becomes `false`.
    Block,
    /// Produce a warning; `allowed` remains `true`.
    Warn,
    /// Produce an audit entry only; no effect on `allowed`.
    Log,
}

/// A single requirement: a boolean check on the action context (§4.6).
/// Absence of the data the check needs is itself a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirement {
    /// Human-readable name of this requirement, used in violation/warning
    /// output.
    pub description: String,
    /// The check itself, reusing the same condition grammar as `conditions`
    /// (§4.6).
    pub check: Condition,
}

/// A declarative guardrail document (§3.3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guardrail {
    /// Unique identifier.
    pub id: String,
    /// Human-readable description.
    pub description: String,
    /// Scope this guardrail applies to; `None` means global (§4.6).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Gating conditions; all must hold for the guardrail to apply.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Requirements checked once the guardrail applies.
    #[serde(default)]
    pub requirements: Vec<Requirement>,
    /// Action taken when a requirement fails.
    pub action: Action,
    /// Message surfaced to the caller on block/warn.
    pub message: String,
}

/// A single requirement failure that blocked the action (§4.6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    /// The guardrail that produced this violation.
    pub rule_id: String,
    /// The failing requirement's description.
    pub requirement: String,
    /// The guardrail's configured message.
    pub message: String,
}

/// A single requirement failure that only warned (§4.6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    /// The guardrail that produced this warning.
    pub rule_id: String,
    /// The failing requirement's description.
    pub requirement: String,
    /// The guardrail's configured message.
    pub message: String,
}

/// An audit-only entry produced by an `action=log` requirement failure
/// (§4.6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// The guardrail that produced this entry.
    pub rule_id: String,
    /// The failing requirement's description.
    pub requirement: String,
}

/// The result of evaluating every loaded guardrail against a context
/// (§4.6).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuardrailEvalResult {
    /// `true` iff `violations` is empty.
    pub allowed: bool,
    /// Requirement failures with `action=block`.
    pub violations: Vec<Violation>,
    /// Requirement failures with `action=warn`.
    pub warnings: Vec<Warning>,
    /// Requirement failures with `action=log`.
    pub audit_entries: Vec<AuditEntry>,
    /// Number of guardrails whose scope matched and whose gating
    /// conditions all held (i.e. that were actually checked).
    pub evaluated_count: usize,
}
