// decision-intel-core/src/errors.rs
// ============================================================================
// Module: Dispatch Error Taxonomy
// Description: The machine-readable error kinds shared at the dispatch
//              surface (§6, §7).
// Purpose: Give every handler a single error type to return so the
//          dispatcher never has to guess at a caller-visible kind.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! Every dispatcher method returns `Result<Response, ServiceError>`.
//! `ServiceError` carries a machine-readable [`ErrorKind`], a human message,
//! and — for guardrail and breaker blocks — a structured detail block (§7).

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// Machine-readable error kind at the dispatch surface (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The request parameters were malformed or failed validation.
    InvalidParams,
    /// The referenced entity does not exist.
    NotFound,
    /// A retrieval sub-query failed or timed out.
    QueryFailed,
    /// Guardrail evaluation itself failed (distinct from a guardrail
    /// *blocking* the action, which is not an error).
    GuardrailEvalFailed,
    /// `recordDecision` failed.
    RecordFailed,
    /// `reviewDecision` failed.
    ReviewFailed,
    /// The caller exceeded a rate limit.
    RateLimited,
    /// A deliberation input or trace could not be attributed to a record.
    AttributionFailed,
    /// A circuit breaker blocked the action.
    CircuitOpen,
    /// An unexpected internal failure.
    Internal,
}

/// Structured detail attached to guardrail and breaker blocks (§7).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockDetail {
    /// The guardrail or breaker rule that triggered the block.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    /// The breaker state at the time of the block, if relevant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Observed failure rate, if relevant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_rate: Option<f64>,
    /// Count of recent failures, if relevant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recent_failures: Option<u32>,
    /// A human-readable suggestion for how to proceed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// The error type returned at the dispatch surface (§6, §7).
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
#[error("{message}")]
pub struct ServiceError {
    /// Machine-readable kind.
    pub kind: ErrorKind,
    /// One-line human message.
    pub message: String,
    /// Structured detail for guardrail/breaker blocks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<BlockDetail>,
}

impl ServiceError {
    /// Builds a bare error with no structured detail.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
        }
    }

    /// Builds an error with a structured detail block attached.
    #[must_use]
    pub fn with_detail(kind: ErrorKind, message: impl Into<String>, detail: BlockDetail) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: Some(detail),
        }
    }

    /// Convenience constructor for [`ErrorKind::NotFound`].
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Convenience constructor for [`ErrorKind::InvalidParams`].
    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidParams, message)
    }

    /// Convenience constructor for [`ErrorKind::Internal`].
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}
