// decision-intel-core/src/record.rs
// ============================================================================
// Module: Decision Record
// Description: The append-only decision document and its invariants (§3.1).
// Purpose: Define the durable shape persisted by the decision store.
// Dependencies: crate::{ids, time}, serde
// ============================================================================

//! ## Overview
//! A [`DecisionRecord`] is the unit of persistence for the decision store. It
//! carries the decision's core assertion, its reasoning, its bridge
//! description, its deliberation trace, and its graph-adjacent `related`
//! snapshot. Mutation rules are enforced by the store (see
//! `decision-intel-store-sqlite`), not by this type; this module only
//! describes the shape and the small amount of validation that is true
//! regardless of backend (confidence bounds, status/outcome pairing).

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

use crate::ids::AgentId;
use crate::ids::DecisionId;
use crate::ids::InputId;
use crate::time::Timestamp;

// ============================================================================
// SECTION: Enumerations
// ============================================================================

/// Top-level classification of a decision (§3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Architectural or design decisions.
    Architecture,
    /// Process, workflow, or team-convention decisions.
    Process,
    /// Integration with external systems or APIs.
    Integration,
    /// Tooling and developer-experience decisions.
    Tooling,
    /// Security-relevant decisions.
    Security,
}

/// Stakes level of a decision (§3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stakes {
    /// Low stakes: easily reversible, narrow blast radius.
    Low,
    /// Medium stakes: moderate cost to reverse.
    Medium,
    /// High stakes: expensive to reverse, broad blast radius.
    High,
    /// Critical stakes: effectively irreversible or safety-relevant.
    Critical,
}

/// Lifecycle status of a decision record (§3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Recorded but not yet reviewed.
    Pending,
    /// Reviewed with an attached outcome.
    Reviewed,
    /// Abandoned before a review was meaningful.
    Abandoned,
}

/// Observed outcome attached on transition to `reviewed` (§3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The decision worked out as intended.
    Success,
    /// The decision partly worked out.
    Partial,
    /// The decision did not work out.
    Failure,
    /// The decision was abandoned before it could be judged.
    Abandoned,
}

impl Outcome {
    /// Maps the outcome to the scalar used by the calibration service
    /// (§4.8). `Partial` is parameterised at `0.5`, per the open question in
    /// §9; see [`crate::errors`] for nothing, and
    /// `decision-intel-service::calibration` for the configurable mapping.
    #[must_use]
    pub const fn default_scalar(self) -> f64 {
        match self {
            Self::Success => 1.0,
            Self::Partial => 0.5,
            Self::Failure | Self::Abandoned => 0.0,
        }
    }

    /// Returns whether this outcome counts as a circuit-breaker failure
    /// (§4.7: `failure` and `abandoned` count, `partial` does not).
    #[must_use]
    pub const fn is_breaker_failure(self) -> bool {
        matches!(self, Self::Failure | Self::Abandoned)
    }
}

/// Source of a reason backing a decision (§3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonType {
    /// Derived from analysis of the situation.
    Analysis,
    /// Backed by empirical observation or measurement.
    Empirical,
    /// Recognized as matching a known pattern.
    Pattern,
    /// Deferred to an authority (docs, expert, RFC).
    Authority,
    /// Driven by an external constraint.
    Constraint,
    /// Reasoned by analogy to a prior situation.
    Analogy,
    /// Gut-feel or intuition.
    Intuition,
    /// Reached by eliminating alternatives.
    Elimination,
}

/// Provenance of an auto-extracted bridge (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeMethod {
    /// Supplied explicitly by the caller.
    Explicit,
    /// Derived purely by the heuristic scorer.
    Rule,
    /// Derived by a language model (reserved for future providers).
    Llm,
    /// One side explicit, the other heuristically extracted.
    BothExtracted,
    /// No bridge recorded; extraction was ambiguous (§7, §9).
    None,
}

// ============================================================================
// SECTION: Component Types
// ============================================================================

/// A single reason backing a decision (§3.1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reason {
    /// Kind of reasoning this entry represents.
    #[serde(rename = "type")]
    pub reason_type: ReasonType,
    /// Free-text justification.
    pub text: String,
    /// Strength of this reason in `[0, 1]`; defaults to `0.8`.
    #[serde(default = "default_reason_strength")]
    pub strength: f64,
}

/// Default reason strength per §3.1.
#[must_use]
pub const fn default_reason_strength() -> f64 {
    0.8
}

/// Minsky-inspired dual description of a decision (§3.1, §4.4).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bridge {
    /// Implementation-oriented description of the decision's shape.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structure: Option<String>,
    /// Purpose-oriented description of why the decision exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    /// Acceptable deviation before the decision should be revisited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<String>,
    /// How violations of the bridge are detected or enforced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enforcement: Option<String>,
    /// What the decision is meant to prevent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prevention: Option<String>,
}

impl Bridge {
    /// Maximum length, in characters, of an auto-extracted bridge side
    /// (§3.1 invariant).
    pub const MAX_AUTO_EXTRACTED_LEN: usize = 512;

    /// Returns true when the bridge has neither a structure nor a function
    /// side set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.structure.is_none() && self.function.is_none()
    }
}

/// A single accumulated deliberation input (§3.1, §4.5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliberationInput {
    /// Unique identifier within the owning record.
    pub id: InputId,
    /// Human-readable summary of what was observed.
    pub text: String,
    /// Dispatcher method name that produced this input.
    pub source: String,
    /// When the input was observed.
    pub timestamp: Timestamp,
}

/// A single reasoning step recorded via `recordThought` (§3.1, §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliberationStep {
    /// 1-based position of this step within the record.
    pub step_no: u32,
    /// Free-text reasoning content.
    pub thought: String,
    /// IDs of inputs (from the same record) that informed this step.
    #[serde(default)]
    pub inputs_used: Vec<InputId>,
    /// When the step was recorded.
    pub timestamp: Timestamp,
    /// Caller-assigned category for the step (e.g. `"synthesis"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(rename = "type")]
    pub step_type: Option<String>,
}

/// The full deliberation trace attached to a record (§3.1).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliberationTrace {
    /// Inputs accumulated before and during the decision.
    #[serde(default)]
    pub inputs: Vec<DeliberationInput>,
    /// Reasoning steps recorded against this decision.
    #[serde(default)]
    pub steps: Vec<DeliberationStep>,
    /// Total wall-clock duration of the deliberation, in milliseconds.
    #[serde(default)]
    pub total_duration_ms: u64,
}

impl DeliberationTrace {
    /// Validates the invariant that every `inputs_used` reference in every
    /// step resolves to an input present in this same trace (§3.1).
    #[must_use]
    pub fn steps_reference_known_inputs(&self) -> bool {
        let known: BTreeSet<&InputId> = self.inputs.iter().map(|input| &input.id).collect();
        self.steps
            .iter()
            .all(|step| step.inputs_used.iter().all(|id| known.contains(id)))
    }

    /// Validates the invariant that input IDs are unique within the trace
    /// (§3.1).
    #[must_use]
    pub fn inputs_are_unique(&self) -> bool {
        let mut seen = BTreeSet::new();
        self.inputs.iter().all(|input| seen.insert(&input.id))
    }
}

/// A materialised graph edge snapshot for read convenience (§3.1). The graph
/// component remains the source of truth; this is a denormalised view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedEdge {
    /// The other decision in this relation.
    pub target_id: DecisionId,
    /// Short human-readable summary of the relation.
    pub summary: String,
    /// Retrieval distance at the time the edge was formed (lower = closer).
    pub distance: f64,
}

/// Optional external project context attached to a decision (§3.1).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectContext {
    /// Project name or identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// Feature or epic name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature: Option<String>,
    /// Pull-request identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr: Option<String>,
    /// File path relevant to the decision.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Line number within `file`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// Commit hash relevant to the decision.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

// ============================================================================
// SECTION: Decision Record
// ============================================================================

/// An append-only decision document (§3.1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// Content-derived, store-unique identifier.
    pub id: DecisionId,
    /// When the record was first created.
    pub created_at: Timestamp,
    /// When the record was last mutated.
    pub updated_at: Timestamp,
    /// When the record was reviewed, if it has been.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<Timestamp>,
    /// Agent that recorded the decision.
    pub recorded_by: AgentId,

    /// The decision's core assertion, in free text.
    pub decision: String,
    /// Stated confidence in `[0, 1]`.
    pub confidence: f64,
    /// Classification of the decision.
    pub category: Category,
    /// Stakes level of the decision.
    pub stakes: Stakes,
    /// Free-text situational context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    /// Lifecycle status.
    pub status: Status,
    /// Observed outcome, set iff `reviewed_at` is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    /// Free-text description of what actually happened.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome_result: Option<String>,
    /// Lessons learned on review.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lessons: Option<String>,

    /// Ordered reasoning backing the decision.
    #[serde(default)]
    pub reasons: Vec<Reason>,
    /// Unordered set of short tags.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Name of the abstract principle this decision instantiates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    /// Dual structure/function description.
    #[serde(default)]
    pub bridge: Bridge,
    /// Provenance of the bridge, if one is present.
    #[serde(default)]
    pub bridge_method: BridgeMethod,

    /// Accumulated deliberation trace.
    #[serde(default)]
    pub deliberation: DeliberationTrace,

    /// Read-convenience snapshot of graph edges touching this decision.
    #[serde(default)]
    pub related: Vec<RelatedEdge>,

    /// Optional project/feature/PR/file context.
    #[serde(default)]
    pub project_context: ProjectContext,
}

impl Default for BridgeMethod {
    fn default() -> Self {
        Self::None
    }
}

impl DecisionRecord {
    /// Returns true when `confidence` is within the valid `[0, 1]` range
    /// (§3.1 invariant).
    #[must_use]
    pub fn has_valid_confidence(&self) -> bool {
        (0.0..=1.0).contains(&self.confidence)
    }

    /// Returns true when the status/outcome/reviewed_at triple is internally
    /// consistent (§3.1 invariant: `reviewed_at` set iff `status =
    /// reviewed`; `outcome` set iff `reviewed_at` is set).
    #[must_use]
    pub fn has_consistent_review_state(&self) -> bool {
        match self.status {
            Status::Reviewed => self.reviewed_at.is_some() && self.outcome.is_some(),
            Status::Pending | Status::Abandoned => {
                self.reviewed_at.is_none() && self.outcome.is_none()
            }
        }
    }

    /// Returns true when every bridge side honours the auto-extraction
    /// length cap (§3.1 invariant). Explicit bridges supplied by a caller
    /// are not bound by this cap.
    #[must_use]
    pub fn bridge_within_auto_extraction_cap(&self) -> bool {
        if !matches!(
            self.bridge_method,
            BridgeMethod::Rule | BridgeMethod::BothExtracted
        ) {
            return true;
        }
        let within = |field: &Option<String>| {
            field
                .as_ref()
                .map_or(true, |text| text.chars().count() <= Bridge::MAX_AUTO_EXTRACTED_LEN)
        };
        within(&self.bridge.structure) && within(&self.bridge.function)
    }

    /// Returns true once a record's status makes its core assertion fields
    /// immutable (§3.1, §4.1): once `reviewed`, `decision`, `category`,
    /// `stakes`, `confidence`, and `reasons` may no longer change.
    #[must_use]
    pub const fn is_assertion_immutable(&self) -> bool {
        matches!(self.status, Status::Reviewed)
    }

    /// Concatenated free text used as the embedding input and BM25 document
    /// for this record (§4.3): `decision ⊕ category ⊕ tags ⊕ pattern ⊕
    /// context ⊕ reasons.text ⊕ bridge.*`.
    #[must_use]
    pub fn searchable_text(&self) -> String {
        let mut parts = vec![self.decision.clone(), format!("{:?}", self.category)];
        parts.extend(self.tags.iter().cloned());
        if let Some(pattern) = &self.pattern {
            parts.push(pattern.clone());
        }
        if let Some(context) = &self.context {
            parts.push(context.clone());
        }
        parts.extend(self.reasons.iter().map(|reason| reason.text.clone()));
        if let Some(structure) = &self.bridge.structure {
            parts.push(structure.clone());
        }
        if let Some(function) = &self.bridge.function {
            parts.push(function.clone());
        }
        parts.join(" ")
    }

    /// Returns the bridge-side text used as the embedding/keyword input when
    /// a directional search is requested (§4.2), falling back to the full
    /// decision text when the decision lacks that side.
    #[must_use]
    pub fn bridge_side_text(&self, side: crate::filter::BridgeSide) -> String {
        use crate::filter::BridgeSide;
        let side_text = match side {
            BridgeSide::Structure => self.bridge.structure.as_ref(),
            BridgeSide::Function => self.bridge.function.as_ref(),
            BridgeSide::Both => None,
        };
        side_text.cloned().unwrap_or_else(|| self.searchable_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DecisionRecord {
        DecisionRecord {
            id: DecisionId::parse("0a1b2c3d").expect("valid id"),
            created_at: Timestamp::now(),
            updated_at: Timestamp::now(),
            reviewed_at: None,
            recorded_by: AgentId::new("agent-1"),
            decision: "Adopt exponential backoff".to_string(),
            confidence: 0.8,
            category: Category::Architecture,
            stakes: Stakes::Medium,
            context: None,
            status: Status::Pending,
            outcome: None,
            outcome_result: None,
            lessons: None,
            reasons: vec![],
            tags: BTreeSet::new(),
            pattern: None,
            bridge: Bridge::default(),
            bridge_method: BridgeMethod::None,
            deliberation: DeliberationTrace::default(),
            related: vec![],
            project_context: ProjectContext::default(),
        }
    }

    #[test]
    fn pending_record_with_no_outcome_is_consistent() {
        assert!(sample().has_consistent_review_state());
    }

    #[test]
    fn reviewed_without_outcome_is_inconsistent() {
        let mut record = sample();
        record.status = Status::Reviewed;
        record.reviewed_at = Some(Timestamp::now());
        assert!(!record.has_consistent_review_state());
    }

    #[test]
    fn reviewed_with_outcome_is_consistent() {
        let mut record = sample();
        record.status = Status::Reviewed;
        record.reviewed_at = Some(Timestamp::now());
        record.outcome = Some(Outcome::Success);
        assert!(record.has_consistent_review_state());
    }

    #[test]
    fn confidence_out_of_range_is_rejected() {
        let mut record = sample();
        record.confidence = 1.5;
        assert!(!record.has_valid_confidence());
    }

    #[test]
    fn trace_detects_duplicate_input_ids() {
        let mut trace = DeliberationTrace::default();
        trace.inputs.push(DeliberationInput {
            id: InputId::new("q-1"),
            text: "t".to_string(),
            source: "queryDecisions".to_string(),
            timestamp: Timestamp::now(),
        });
        trace.inputs.push(DeliberationInput {
            id: InputId::new("q-1"),
            text: "t2".to_string(),
            source: "queryDecisions".to_string(),
            timestamp: Timestamp::now(),
        });
        assert!(!trace.inputs_are_unique());
    }

    #[test]
    fn trace_detects_dangling_step_reference() {
        let mut trace = DeliberationTrace::default();
        trace.steps.push(DeliberationStep {
            step_no: 1,
            thought: "synthesis".to_string(),
            inputs_used: vec![InputId::new("missing")],
            timestamp: Timestamp::now(),
            step_type: None,
        });
        assert!(!trace.steps_reference_known_inputs());
    }
}
