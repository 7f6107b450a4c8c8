// decision-intel-guardrails/src/engine.rs
// ============================================================================
// Module: Guardrail Engine
// Description: Scope matching, condition/requirement evaluation, and
//              verdict synthesis (§4.6).
// Purpose: Implement the single evaluation algorithm shared by
//          `checkGuardrails`, `preAction`, and `recordDecision`'s
//          pre-checks.
// Dependencies: decision-intel-core, crate::{condition, context, guardrail,
//               loader, tristate}
// ============================================================================

//! ## Overview
//! `GuardrailEngine::evaluate` is the single entry point described in §4.6:
//! for each loaded guardrail whose scope matches, test all `conditions`
//! (gate); if all hold, test `requirements` and classify each failure by
//! the guardrail's `action`. Semantic, temporal, and aggregate conditions
//! suspend on the store and embedding provider; field conditions and
//! compounds thereof do not.

use std::sync::Arc;

use decision_intel_core::Category;
use decision_intel_core::DateRange;
use decision_intel_core::DecisionFilter;
use decision_intel_core::EmbeddingProvider;
use decision_intel_core::Outcome;
use decision_intel_core::PageRequest;
use decision_intel_core::Stakes;
use decision_intel_core::Status;
use decision_intel_core::Store;
use decision_intel_core::Timestamp;
use decision_intel_core::VectorStore;
use thiserror::Error;

use crate::condition::AggregateCondition;
use crate::condition::AggregateMetric;
use crate::condition::Condition;
use crate::condition::LogicOp;
use crate::condition::Operator;
use crate::condition::SemanticCondition;
use crate::condition::TemporalCondition;
use crate::condition::compare;
use crate::context::ActionContext;
use crate::guardrail::Action;
use crate::guardrail::AuditEntry;
use crate::guardrail::Guardrail;
use crate::guardrail::GuardrailEvalResult;
use crate::guardrail::Requirement;
use crate::guardrail::Violation;
use crate::guardrail::Warning;
use crate::loader::CachedGuardrailLoader;
use crate::tristate::TriState;
use crate::tristate::and;
use crate::tristate::or;

/// Errors raised by guardrail evaluation itself (distinct from a guardrail
/// *blocking* the action, which is not an error — §6's
/// `GuardrailEvalFailed`).
#[derive(Debug, Error)]
pub enum GuardrailEvalError {
    /// Loading guardrail documents failed and there was no prior snapshot.
    #[error("failed to load guardrails: {0}")]
    LoadFailed(String),
    /// A store query needed by a semantic/temporal/aggregate condition
    /// failed.
    #[error("guardrail store query failed: {0}")]
    StoreQueryFailed(String),
}

/// The guardrail evaluation engine (§4.6).
pub struct GuardrailEngine {
    loader: CachedGuardrailLoader,
    store: Arc<dyn Store>,
    embeddings: Option<Arc<dyn EmbeddingProvider>>,
    vector_store: Option<Arc<dyn VectorStore>>,
}

impl GuardrailEngine {
    /// Builds an engine. `embeddings`/`vector_store` are optional; when
    /// absent, semantic conditions resolve to [`TriState::Unknown`] rather
    /// than erroring, matching the "fail closed on missing data" posture of
    /// requirement checks.
    #[must_use]
    pub fn new(
        loader: CachedGuardrailLoader,
        store: Arc<dyn Store>,
        embeddings: Option<Arc<dyn EmbeddingProvider>>,
        vector_store: Option<Arc<dyn VectorStore>>,
    ) -> Self {
        Self {
            loader,
            store,
            embeddings,
            vector_store,
        }
    }

    /// Lists the currently-loaded guardrails, optionally scoped (used by
    /// `listGuardrails`, §6).
    ///
    /// # Errors
    ///
    /// Returns [`GuardrailEvalError::LoadFailed`] when there is no cached
    /// snapshot and the source cannot be read.
    pub fn list(&self, scope: Option<&str>) -> Result<Vec<Guardrail>, GuardrailEvalError> {
        let outcome = self
            .loader
            .get()
            .map_err(|err| GuardrailEvalError::LoadFailed(err.to_string()))?;
        Ok(outcome
            .guardrails
            .into_iter()
            .filter(|g| match scope {
                Some(scope) => g.scope.as_deref() == Some(scope),
                None => true,
            })
            .collect())
    }

    /// Forces the guardrail cache to refresh on the next evaluation.
    pub fn invalidate(&self) {
        self.loader.invalidate();
    }

    /// Evaluates every loaded guardrail against `ctx` (§4.6).
    ///
    /// # Errors
    ///
    /// Returns [`GuardrailEvalError`] when guardrails cannot be loaded at
    /// all, or when a store-backed condition fails outright (as opposed to
    /// resolving to `Unknown`, which is a normal requirement failure, not
    /// an error).
    pub async fn evaluate(
        &self,
        ctx: &ActionContext,
    ) -> Result<GuardrailEvalResult, GuardrailEvalError> {
        let outcome = self
            .loader
            .get()
            .map_err(|err| GuardrailEvalError::LoadFailed(err.to_string()))?;

        let mut result = GuardrailEvalResult {
            allowed: true,
            ..GuardrailEvalResult::default()
        };

        for guardrail in &outcome.guardrails {
            if !self.scope_matches(guardrail, ctx) {
                continue;
            }
            let mut gate_holds = TriState::True;
            for condition in &guardrail.conditions {
                gate_holds = and(gate_holds, self.eval_condition(condition, ctx).await?);
                if gate_holds == TriState::False {
                    break;
                }
            }
            if !gate_holds.resolves_true() && !guardrail.conditions.is_empty() {
                continue;
            }

            result.evaluated_count += 1;
            for requirement in &guardrail.requirements {
                let satisfied = self.eval_requirement(requirement, ctx).await?;
                if satisfied.resolves_true() {
                    continue;
                }
                self.record_failure(guardrail, requirement, &mut result);
            }
        }

        result.allowed = result.violations.is_empty();
        Ok(result)
    }

    fn record_failure(
        &self,
        guardrail: &Guardrail,
        requirement: &Requirement,
        result: &mut GuardrailEvalResult,
    ) {
        match guardrail.action {
            Action::Block => result.violations.push(Violation {
                rule_id: guardrail.id.clone(),
                requirement: requirement.description.clone(),
                message: guardrail.message.clone(),
            }),
            Action::Warn => result.warnings.push(Warning {
                rule_id: guardrail.id.clone(),
                requirement: requirement.description.clone(),
                message: guardrail.message.clone(),
            }),
            Action::Log => result.audit_entries.push(AuditEntry {
                rule_id: guardrail.id.clone(),
                requirement: requirement.description.clone(),
            }),
        }
    }

    /// Scope matching per §4.6: `None` is global; otherwise equality on
    /// `context.project` or `context.scope`.
    fn scope_matches(&self, guardrail: &Guardrail, ctx: &ActionContext) -> bool {
        match &guardrail.scope {
            None => true,
            Some(scope) => ctx.scope_value() == Some(scope.as_str()),
        }
    }

    async fn eval_requirement(
        &self,
        requirement: &Requirement,
        ctx: &ActionContext,
    ) -> Result<TriState, GuardrailEvalError> {
        self.eval_condition(&requirement.check, ctx).await
    }

    fn eval_condition<'a>(
        &'a self,
        condition: &'a Condition,
        ctx: &'a ActionContext,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<TriState, GuardrailEvalError>> + 'a>>
    {
        Box::pin(async move {
            match condition {
                Condition::Field(field) => Ok(field.evaluate(ctx)),
                Condition::Semantic(semantic) => self.eval_semantic(semantic, ctx).await,
                Condition::Temporal(temporal) => self.eval_temporal(temporal, ctx),
                Condition::Aggregate(aggregate) => self.eval_aggregate(aggregate),
                Condition::Compound { op, conditions } => {
                    let mut acc = match op {
                        LogicOp::And => TriState::True,
                        LogicOp::Or => TriState::False,
                    };
                    for nested in conditions {
                        let value = self.eval_condition(nested, ctx).await?;
                        acc = match op {
                            LogicOp::And => and(acc, value),
                            LogicOp::Or => or(acc, value),
                        };
                    }
                    Ok(acc)
                }
            }
        })
    }

    async fn eval_semantic(
        &self,
        semantic: &SemanticCondition,
        ctx: &ActionContext,
    ) -> Result<TriState, GuardrailEvalError> {
        let (Some(embeddings), Some(vector_store)) = (&self.embeddings, &self.vector_store)
        else {
            return Ok(TriState::Unknown);
        };
        let Some(query_text) = ctx.get(&semantic.query_field).and_then(|v| v.as_str()) else {
            return Ok(TriState::Unknown);
        };

        let vector = embeddings
            .embed(query_text)
            .await
            .map_err(|err| GuardrailEvalError::StoreQueryFailed(err.to_string()))?;
        let matches = vector_store
            .query(&vector, semantic.min_matches.max(1) * 4, None)
            .await
            .map_err(|err| GuardrailEvalError::StoreQueryFailed(err.to_string()))?;

        let since = Timestamp::now().plus_millis(
            -i64::from(semantic.filter_since_days) * 24 * 60 * 60 * 1000,
        );

        let mut close_matches = 0usize;
        for candidate in &matches {
            if candidate.distance > semantic.threshold {
                continue;
            }
            let Some(id) = decision_intel_core::DecisionId::parse(candidate.id.clone()) else {
                continue;
            };
            let Ok(record) = self.store.get(&id) else {
                continue;
            };
            if record.created_at < since {
                continue;
            }
            if let Some(wanted) = semantic.filter_outcome {
                if record.outcome != Some(wanted) {
                    continue;
                }
            }
            close_matches += 1;
        }

        Ok(TriState::from(close_matches >= semantic.min_matches))
    }

    fn eval_temporal(
        &self,
        temporal: &TemporalCondition,
        ctx: &ActionContext,
    ) -> Result<TriState, GuardrailEvalError> {
        let since = Timestamp::now()
            .plus_millis(-i64::from(temporal.window_hours) * 60 * 60 * 1000);
        let filter = DecisionFilter {
            date_range: DateRange {
                from: Some(since),
                to: None,
            },
            ..DecisionFilter::default()
        };
        let page = self
            .store
            .list(&filter, PageRequest { offset: 0, limit: 10_000 })
            .map_err(|err| GuardrailEvalError::StoreQueryFailed(err.to_string()))?;

        let _ = ctx;
        let count = page
            .items
            .iter()
            .filter(|record| field_matches(record, &temporal.field, &temporal.value))
            .count();

        Ok(TriState::from(count > temporal.max_occurrences))
    }

    fn eval_aggregate(&self, aggregate: &AggregateCondition) -> Result<TriState, GuardrailEvalError> {
        let filter = DecisionFilter {
            status: Some(Status::Reviewed),
            ..DecisionFilter::default()
        };
        let page = self
            .store
            .list(&filter, PageRequest { offset: 0, limit: 10_000 })
            .map_err(|err| GuardrailEvalError::StoreQueryFailed(err.to_string()))?;

        let matching: Vec<_> = page
            .items
            .iter()
            .filter(|record| field_matches(record, &aggregate.field, &aggregate.value))
            .collect();
        if matching.is_empty() {
            return Ok(TriState::Unknown);
        }

        let value = match aggregate.metric {
            AggregateMetric::SuccessRate => {
                let successes = matching
                    .iter()
                    .filter(|r| r.outcome == Some(Outcome::Success))
                    .count();
                successes as f64 / matching.len() as f64
            }
            AggregateMetric::FailureRate => {
                let failures = matching.iter().filter(|r| r.outcome.is_some_and(Outcome::is_breaker_failure)).count();
                failures as f64 / matching.len() as f64
            }
            AggregateMetric::AvgConfidence => {
                matching.iter().map(|r| r.confidence).sum::<f64>() / matching.len() as f64
            }
        };

        Ok(compare(
            &serde_json::json!(value),
            aggregate.operator,
            &serde_json::json!(aggregate.threshold),
        ))
    }
}

/// Matches a decision record's field against a JSON scalar, supporting the
/// small set of fields guardrail documents reference by name (`category`,
/// `stakes`, `agent`, `project`, or a free-form project-context field).
fn field_matches(record: &decision_intel_core::DecisionRecord, field: &str, value: &serde_json::Value) -> bool {
    let text = value.as_str();
    match field {
        "category" => text.is_some_and(|v| category_matches(record.category, v)),
        "stakes" => text.is_some_and(|v| stakes_matches(record.stakes, v)),
        "agent" | "recorded_by" => text == Some(record.recorded_by.as_str()),
        "project" => text == record.project_context.project.as_deref(),
        "feature" => text == record.project_context.feature.as_deref(),
        _ => record.tags.contains(text.unwrap_or_default()),
    }
}

fn category_matches(category: Category, text: &str) -> bool {
    format!("{category:?}").eq_ignore_ascii_case(text)
}

fn stakes_matches(stakes: Stakes, text: &str) -> bool {
    format!("{stakes:?}").eq_ignore_ascii_case(text)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;

    use decision_intel_core::AgentId;
    use decision_intel_core::Bridge;
    use decision_intel_core::BridgeMethod;
    use decision_intel_core::DecisionId;
    use decision_intel_core::DecisionRecord;
    use decision_intel_core::DeliberationTrace;
    use decision_intel_core::Page;
    use decision_intel_core::ProjectContext;
    use decision_intel_core::PutOutcome;
    use decision_intel_core::StoreError;

    use super::*;
    use crate::condition::FieldCondition;
    use crate::loader::StaticGuardrailSource;

    struct MemStore {
        records: Mutex<Vec<DecisionRecord>>,
    }

    impl Store for MemStore {
        fn put(&self, record: DecisionRecord) -> Result<PutOutcome, StoreError> {
            self.records.lock().expect("lock").push(record);
            Ok(PutOutcome::Created)
        }

        fn get(&self, id: &DecisionId) -> Result<DecisionRecord, StoreError> {
            self.records
                .lock()
                .expect("lock")
                .iter()
                .find(|r| &r.id == id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(id.clone()))
        }

        fn list(
            &self,
            _filter: &DecisionFilter,
            page: PageRequest,
        ) -> Result<Page<DecisionRecord>, StoreError> {
            let records = self.records.lock().expect("lock").clone();
            Ok(Page {
                total: records.len(),
                items: records,
                offset: page.offset,
            })
        }

        fn reset(&self) -> Result<(), StoreError> {
            self.records.lock().expect("lock").clear();
            Ok(())
        }
    }

    fn sample_record(stakes: Stakes, outcome: Option<Outcome>) -> DecisionRecord {
        DecisionRecord {
            id: DecisionId::parse("00000001").expect("valid"),
            created_at: Timestamp::now(),
            updated_at: Timestamp::now(),
            reviewed_at: outcome.map(|_| Timestamp::now()),
            recorded_by: AgentId::new("a1"),
            decision: "text".to_string(),
            confidence: 0.9,
            category: Category::Architecture,
            stakes,
            context: None,
            status: if outcome.is_some() { Status::Reviewed } else { Status::Pending },
            outcome,
            outcome_result: None,
            lessons: None,
            reasons: vec![],
            tags: Default::default(),
            pattern: None,
            bridge: Bridge::default(),
            bridge_method: BridgeMethod::None,
            deliberation: DeliberationTrace::default(),
            related: vec![],
            project_context: ProjectContext::default(),
        }
    }

    fn engine_with(store: Arc<dyn Store>, guardrails: Vec<Guardrail>) -> GuardrailEngine {
        let loader = CachedGuardrailLoader::new(StaticGuardrailSource::new(guardrails));
        GuardrailEngine::new(loader, store, None, None)
    }

    #[tokio::test]
    async fn missing_field_blocks_when_action_is_block() {
        let store: Arc<dyn Store> = Arc::new(MemStore { records: Mutex::new(vec![]) });
        let guardrail = Guardrail {
            id: "g1".to_string(),
            description: "stakes required".to_string(),
            scope: None,
            conditions: vec![],
            requirements: vec![Requirement {
                description: "stakes present".to_string(),
                check: Condition::Field(FieldCondition {
                    field: "stakes".to_string(),
                    operator: Operator::Ne,
                    value: serde_json::Value::Null,
                }),
            }],
            action: Action::Block,
            message: "must specify stakes".to_string(),
        };
        let engine = engine_with(store, vec![guardrail]);
        let ctx = ActionContext::new(AgentId::new("a1"), serde_json::json!({}));
        let result = engine.evaluate(&ctx).await.expect("evaluate");
        assert!(!result.allowed);
        assert_eq!(result.violations.len(), 1);
    }

    #[tokio::test]
    async fn scoped_guardrail_is_skipped_outside_its_scope() {
        let store: Arc<dyn Store> = Arc::new(MemStore { records: Mutex::new(vec![]) });
        let guardrail = Guardrail {
            id: "g1".to_string(),
            description: "scoped".to_string(),
            scope: Some("payments".to_string()),
            conditions: vec![],
            requirements: vec![Requirement {
                description: "always fails".to_string(),
                check: Condition::Field(FieldCondition {
                    field: "nope".to_string(),
                    operator: Operator::Eq,
                    value: serde_json::json!(true),
                }),
            }],
            action: Action::Block,
            message: "blocked".to_string(),
        };
        let engine = engine_with(store, vec![guardrail]);
        let ctx = ActionContext::new(AgentId::new("a1"), serde_json::json!({"project": "billing"}));
        let result = engine.evaluate(&ctx).await.expect("evaluate");
        assert!(result.allowed);
        assert_eq!(result.evaluated_count, 0);
    }

    #[tokio::test]
    async fn temporal_condition_counts_matching_recent_decisions() {
        let store: Arc<dyn Store> = Arc::new(MemStore {
            records: Mutex::new(vec![
                sample_record(Stakes::High, Some(Outcome::Failure)),
                sample_record(Stakes::High, Some(Outcome::Failure)),
            ]),
        });
        let guardrail = Guardrail {
            id: "g1".to_string(),
            description: "breaker-ish".to_string(),
            scope: None,
            conditions: vec![],
            requirements: vec![Requirement {
                description: "no repeated high-stakes failures".to_string(),
                check: Condition::Temporal(TemporalCondition {
                    field: "stakes".to_string(),
                    value: serde_json::json!("High"),
                    window_hours: 24,
                    max_occurrences: 5,
                }),
            }],
            action: Action::Warn,
            message: "too many recent high-stakes failures".to_string(),
        };
        let engine = engine_with(store, vec![guardrail]);
        let ctx = ActionContext::new(AgentId::new("a1"), serde_json::json!({}));
        let result = engine.evaluate(&ctx).await.expect("evaluate");
        assert!(result.allowed);
        assert!(result.warnings.is_empty());
    }
}
