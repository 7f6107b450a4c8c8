// decision-intel-guardrails/src/lib.rs
// ============================================================================
// Module: Guardrail Evaluation Library
// Description: Public API surface for the guardrail evaluation engine (§4.6).
// Purpose: Expose the condition grammar, guardrail document model, TTL
//          loader, and the engine that ties them to a decision store.
// Dependencies: crate::{condition, context, engine, guardrail, loader,
//               tristate}
// ============================================================================

//! ## Overview
//! `decision-intel-guardrails` evaluates declarative guardrail documents
//! against an in-flight action (§3.3, §4.6, §6). A [`GuardrailEngine`] loads
//! guardrails through a TTL-cached [`CachedGuardrailLoader`], matches each
//! one's scope against an [`ActionContext`], gates on its `conditions`, and
//! classifies `requirements` failures by the guardrail's configured
//! [`Action`].

pub mod condition;
pub mod context;
pub mod engine;
pub mod guardrail;
pub mod loader;
pub mod tristate;

pub use condition::AggregateCondition;
pub use condition::AggregateMetric;
pub use condition::Condition;
pub use condition::FieldCondition;
pub use condition::LogicOp;
pub use condition::Operator;
pub use condition::SemanticCondition;
pub use condition::TemporalCondition;
pub use context::ActionContext;
pub use engine::GuardrailEngine;
pub use engine::GuardrailEvalError;
pub use guardrail::Action;
pub use guardrail::AuditEntry;
pub use guardrail::Guardrail;
pub use guardrail::GuardrailEvalResult;
pub use guardrail::Requirement;
pub use guardrail::Violation;
pub use guardrail::Warning;
pub use loader::CachedGuardrailLoader;
pub use loader::DEFAULT_CACHE_TTL;
pub use loader::GuardrailSource;
pub use loader::LoadError;
pub use loader::LoadOutcome;
pub use loader::StaticGuardrailSource;
pub use tristate::TriState;
pub use tristate::and;
pub use tristate::or;
