// decision-intel-core/src/ids.rs
// ============================================================================
// Module: Identifiers
// Description: Canonical opaque identifiers for decisions, agents, and inputs.
// Purpose: Provide strongly typed, serializable IDs with stable string forms.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Identifiers are opaque and serialize as strings. `DecisionId` additionally
//! knows how to validate its own 8-hex-digit shape (§3.1); other identifiers
//! are free-form tokens supplied by callers or the tracker.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Number of hex digits in a decision identifier.
pub const DECISION_ID_LEN: usize = 8;

/// Content-derived decision identifier (8 lowercase hex digits, §3.1).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DecisionId(String);

impl DecisionId {
    /// Wraps a raw identifier without validation.
    ///
    /// Used by the hashing module, which is the only producer of valid IDs;
    /// everywhere else should go through [`crate::hashing::derive_decision_id`].
    #[must_use]
    pub(crate) fn from_raw(id: String) -> Self {
        Self(id)
    }

    /// Parses an identifier supplied by a caller, validating its shape.
    #[must_use]
    pub fn parse(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        let valid = id.len() == DECISION_ID_LEN && id.bytes().all(|b| b.is_ascii_hexdigit());
        valid.then(|| Self(id.to_ascii_lowercase()))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DecisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Agent identifier recorded against every tracked input and decision.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    /// Creates a new agent identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for AgentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for AgentId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Identifier of a single deliberation input within a tracker session or
/// recorded trace (§3.1, §4.5).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputId(String);

impl InputId {
    /// Creates a new input identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for InputId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::DecisionId;

    #[test]
    fn parses_valid_hex_ids() {
        assert!(DecisionId::parse("0a1b2c3d").is_some());
        assert!(DecisionId::parse("0A1B2C3D").is_some());
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!(DecisionId::parse("short").is_none());
        assert!(DecisionId::parse("zzzzzzzz").is_none());
        assert!(DecisionId::parse("0a1b2c3d9").is_none());
    }
}
