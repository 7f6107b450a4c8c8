// decision-intel-guardrails/src/context.rs
// ============================================================================
// Module: Action Context
// Description: The evaluation context guardrails are checked against.
// Purpose: Wrap the free-form JSON object a caller passes to
//          `checkGuardrails`/`preAction` with typed accessors for the fields
//          the engine treats specially (scope, project).
// Dependencies: serde_json
// ============================================================================

//! ## Overview
//! `checkGuardrails` takes an `action` object (§6) whose shape is
//! intentionally open — callers attach whatever fields their guardrails
//! need. [`ActionContext`] is a thin wrapper over that JSON object plus the
//! agent identifier, used for scope matching (§4.6) and field lookups.

use decision_intel_core::AgentId;
use serde_json::Value;

/// The evaluation context passed to the guardrail engine (§4.6, §6).
#[derive(Debug, Clone)]
pub struct ActionContext {
    /// The agent performing the action.
    pub agent_id: AgentId,
    /// Free-form action fields (e.g. `description`, `stakes`, `confidence`).
    pub fields: Value,
}

impl ActionContext {
    /// Builds a context from an agent and a JSON object of action fields.
    #[must_use]
    pub fn new(agent_id: AgentId, fields: Value) -> Self {
        Self { agent_id, fields }
    }

    /// Looks up a dotted field path (e.g. `"context.project"`) within the
    /// action fields. Returns `None` when any path segment is missing.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut cursor = &self.fields;
        for segment in path.split('.') {
            cursor = cursor.as_object()?.get(segment)?;
        }
        Some(cursor)
    }

    /// Returns the `project` or `scope` field used for guardrail scope
    /// matching (§4.6: "equality on `context.project` or `context.scope`").
    #[must_use]
    pub fn scope_value(&self) -> Option<&str> {
        self.get("project")
            .or_else(|| self.get("scope"))
            .and_then(Value::as_str)
    }
}
