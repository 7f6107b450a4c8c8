// decision-intel-service/src/dispatcher.rs
// ============================================================================
// Module: Dispatcher
// Description: The agent-facing method table and composite operations
//              (§4.10, §6).
// Purpose: Give a transport a single entry point that wires retrieval,
//          guardrails, the deliberation tracker, circuit breakers, the
//          decision graph, and calibration together.
// Dependencies: decision-intel-core, decision-intel-guardrails,
//               decision-intel-retrieval, decision-intel-events
// ============================================================================

//! ## Overview
//! [`Dispatcher`] owns the decision store and every server-side component
//! built in this crate. Each public method corresponds to one row of §6's
//! method table; `preAction` and `getSessionContext` are the composite
//! operations of §4.10. Every dispatcher method that consults the store,
//! guardrails, or breakers also records a deliberation input via the
//! tracker (§4.5: "after queryDecisions/checkGuardrails/getDecision/
//! recordThought, synthesize an input and call track_input").

use std::collections::HashSet;
use std::sync::Arc;

use decision_intel_core::AgentId;
use decision_intel_core::Bridge;
use decision_intel_core::BridgeMethod;
use decision_intel_core::Category;
use decision_intel_core::DecisionFilter;
use decision_intel_core::DecisionId;
use decision_intel_core::DecisionRecord;
use decision_intel_core::DeliberationInput;
use decision_intel_core::DeliberationStep;
use decision_intel_core::EmbeddingProvider;
use decision_intel_core::ErrorKind;
use decision_intel_core::Outcome;
use decision_intel_core::PageRequest;
use decision_intel_core::ProjectContext;
use decision_intel_core::Reason;
use decision_intel_core::RelatedEdge;
use decision_intel_core::ServiceError;
use decision_intel_core::Stakes;
use decision_intel_core::Status;
use decision_intel_core::Store;
use decision_intel_core::Timestamp;
use decision_intel_core::VectorStore;
use decision_intel_core::derive_decision_id;
use decision_intel_core::errors::BlockDetail;
use decision_intel_core::filter::BridgeSide;
use decision_intel_core::hashing::HashError;
use decision_intel_core::ids::InputId;
use decision_intel_guardrails::ActionContext;
use decision_intel_guardrails::CachedGuardrailLoader;
use decision_intel_guardrails::GuardrailEngine;
use decision_intel_guardrails::GuardrailEvalResult;
use decision_intel_retrieval::RetrievalEngine;
use decision_intel_retrieval::RetrievalMode;
use decision_intel_retrieval::RetrievedDecision;
use serde::Serialize;

use crate::breaker::BreakerContext;
use crate::breaker::CircuitBreakerManager;
use crate::calibration::CalibrationQuery;
use crate::calibration::CalibrationReport;
use crate::calibration::CalibrationService;
use crate::calibration::DriftReport;
use crate::calibration::ReasonTypeStats;
use crate::graph::DecisionGraph;
use crate::graph::DEFAULT_AUTO_LINK_TOP_K;
use crate::graph::Edge;
use crate::graph::EdgeType;
use crate::graph::GraphView;
use crate::tracker::DeliberationTracker;
use crate::tracker::PENDING;

/// Construction-time wiring for a [`Dispatcher`] (§5, §9).
pub struct DispatcherConfig {
    pub store: Arc<dyn Store>,
    pub embeddings: Option<Arc<dyn EmbeddingProvider>>,
    pub vector_store: Option<Arc<dyn VectorStore>>,
    pub guardrail_loader: CachedGuardrailLoader,
}

/// Ties every server-side component together behind one agent-facing
/// surface (§6).
pub struct Dispatcher {
    store: Arc<dyn Store>,
    retrieval: RetrievalEngine,
    guardrails: GuardrailEngine,
    tracker: DeliberationTracker,
    breakers: CircuitBreakerManager,
    graph: DecisionGraph,
}

impl Dispatcher {
    #[must_use]
    pub fn new(config: DispatcherConfig) -> Self {
        let retrieval = RetrievalEngine::new(
            Arc::clone(&config.store),
            config.embeddings.clone(),
            config.vector_store.clone(),
        );
        let guardrails = GuardrailEngine::new(
            config.guardrail_loader,
            Arc::clone(&config.store),
            config.embeddings,
            config.vector_store,
        );
        Self {
            store: config.store,
            retrieval,
            guardrails,
            tracker: DeliberationTracker::new(),
            breakers: CircuitBreakerManager::new(),
            graph: DecisionGraph::new(),
        }
    }

    #[must_use]
    pub fn with_breakers(mut self, breakers: CircuitBreakerManager) -> Self {
        self.breakers = breakers;
        self
    }

    #[must_use]
    pub fn with_graph(mut self, graph: DecisionGraph) -> Self {
        self.graph = graph;
        self
    }

    fn track(&self, agent_id: &AgentId, decision_id: &str, source: &str, text: String, now: Timestamp) {
        let input = DeliberationInput {
            id: InputId::new(format!("{source}-{:08x}", fnv1a(&text))),
            text,
            source: source.to_string(),
            timestamp: now,
        };
        self.tracker.track_input(agent_id, decision_id, input, now);
    }

    // ------------------------------------------------------------------
    // queryDecisions
    // ------------------------------------------------------------------

    /// Runs a retrieval query and records a tracker input describing what
    /// was found (§4.2, §4.5, §6).
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::QueryFailed`] on a retrieval failure.
    pub async fn query_decisions(
        &self,
        agent_id: &AgentId,
        request: QueryDecisionsRequest,
        now: Timestamp,
    ) -> Result<Vec<RetrievedDecision>, ServiceError> {
        let results = self
            .retrieval
            .query(&request.text, &request.filter, request.limit, request.mode, request.bridge_side)
            .await
            .map_err(|err| ServiceError::new(ErrorKind::QueryFailed, err.to_string()))?;
        let summary = format!("queried \"{}\", {} results", truncate(&request.text, 80), results.len());
        self.track(agent_id, PENDING, "queryDecisions", summary, now);
        Ok(results)
    }

    // ------------------------------------------------------------------
    // checkGuardrails
    // ------------------------------------------------------------------

    /// Evaluates guardrails and circuit breakers against `context`, blocking
    /// on the first open breaker before guardrail evaluation runs (§4.6,
    /// §4.7, §6).
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::CircuitOpen`] when a breaker blocks, or
    /// [`ErrorKind::GuardrailEvalFailed`] when evaluation itself fails.
    pub async fn check_guardrails(
        &self,
        agent_id: &AgentId,
        context: ActionContext,
        breaker_context: &BreakerContext,
        now: Timestamp,
    ) -> Result<GuardrailEvalResult, ServiceError> {
        if let crate::breaker::BreakerCheck::Blocked(violation) = self.breakers.check(breaker_context, now) {
            return Err(circuit_open_error(&violation));
        }
        let result = self
            .guardrails
            .evaluate(&context)
            .await
            .map_err(|err| ServiceError::new(ErrorKind::GuardrailEvalFailed, err.to_string()))?;
        let summary = format!(
            "checked guardrails: allowed={}, {} violation(s), {} warning(s)",
            result.allowed,
            result.violations.len(),
            result.warnings.len()
        );
        self.track(agent_id, PENDING, "checkGuardrails", summary, now);
        Ok(result)
    }

    // ------------------------------------------------------------------
    // recordDecision
    // ------------------------------------------------------------------

    /// Creates a new decision record, consuming the agent's pending tracker
    /// session into its deliberation trace, and auto-links it to the top-K
    /// most recently retrieved decisions (§3.2, §4.5, §4.9, §6).
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::RecordFailed`] on a store failure or ID
    /// derivation failure.
    pub fn record_decision(
        &self,
        agent_id: &AgentId,
        request: RecordDecisionRequest,
        now: Timestamp,
    ) -> Result<DecisionRecord, ServiceError> {
        let created_at_str = now.to_string();
        let id = derive_with_retry(agent_id.as_str(), &request.decision, &created_at_str)
            .map_err(|err| ServiceError::new(ErrorKind::RecordFailed, err.to_string()))?;

        let mut deliberation = request.deliberation.unwrap_or_default();
        if let Some(session) = self.tracker.consume(agent_id, PENDING) {
            let mut existing_ids: HashSet<InputId> = deliberation.inputs.iter().map(|i| i.id.clone()).collect();
            for input in session.inputs {
                if existing_ids.insert(input.id.clone()) {
                    deliberation.inputs.push(input);
                }
            }
        }

        let mut record = DecisionRecord {
            id: id.clone(),
            created_at: now,
            updated_at: now,
            reviewed_at: None,
            recorded_by: agent_id.clone(),
            decision: request.decision,
            confidence: request.confidence,
            category: request.category,
            stakes: request.stakes,
            context: request.context,
            status: Status::Pending,
            outcome: None,
            outcome_result: None,
            lessons: None,
            reasons: request.reasons,
            tags: request.tags,
            pattern: request.pattern,
            bridge: request.bridge,
            bridge_method: request.bridge_method,
            deliberation,
            related: Vec::new(),
            project_context: request.project_context,
        };

        self.store.put(record.clone()).map_err(|err| ServiceError::new(ErrorKind::RecordFailed, err.to_string()))?;

        let known_candidates = self.existing_candidates(&request.auto_link_candidates);
        if !known_candidates.is_empty() {
            self.graph.auto_link_from_retrieval(&id, &known_candidates, DEFAULT_AUTO_LINK_TOP_K, now);
            record.related = self.related_edges_for(&id);
            self.store.put(record.clone()).map_err(|err| ServiceError::new(ErrorKind::RecordFailed, err.to_string()))?;
        }

        Ok(record)
    }

    /// Filters auto-link candidates down to decisions that actually exist in
    /// the store, so `recordDecision` never asks the graph to link against a
    /// dangling endpoint.
    fn existing_candidates(&self, candidates: &[(DecisionId, f64)]) -> Vec<(DecisionId, f64)> {
        candidates.iter().filter(|(id, _)| self.store.get(id).is_ok()).cloned().collect()
    }

    /// Materialises `DecisionRecord::related` from the graph's current edges
    /// for `id` (§3.1: the graph is the source of truth, `related` is a
    /// read-convenience snapshot of it).
    fn related_edges_for(&self, id: &DecisionId) -> Vec<RelatedEdge> {
        self.graph
            .get_neighbors(id, None)
            .into_iter()
            .map(|edge| {
                let target_id = if &edge.source == id { edge.target } else { edge.source };
                let summary = edge.context.clone().unwrap_or_else(|| format!("{:?}", edge.edge_type));
                RelatedEdge { target_id, summary, distance: (1.0 - edge.weight).clamp(0.0, 1.0) }
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // reviewDecision
    // ------------------------------------------------------------------

    /// Attaches an outcome to a reviewed decision and updates circuit
    /// breakers for every scope the decision matches (§3.4, §4.7, §6).
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::NotFound`] if the decision does not exist, or
    /// [`ErrorKind::ReviewFailed`] on a store failure.
    pub fn review_decision(&self, request: ReviewDecisionRequest, now: Timestamp) -> Result<DecisionRecord, ServiceError> {
        let mut record = self.store.get(&request.id).map_err(not_found_or_review_failed)?;
        record.status = Status::Reviewed;
        record.reviewed_at = Some(now);
        record.outcome = Some(request.outcome);
        record.outcome_result = request.outcome_result;
        record.lessons = request.lessons;
        record.updated_at = now;

        self.store.put(record.clone()).map_err(|err| ServiceError::new(ErrorKind::ReviewFailed, err.to_string()))?;

        let breaker_context = BreakerContext {
            category: Some(record.category),
            stakes: Some(record.stakes),
            agent_id: Some(record.recorded_by.as_str().to_string()),
            tags: record.tags.iter().cloned().collect(),
        };
        if request.outcome.is_breaker_failure() {
            self.breakers.record_failure(&breaker_context, now);
        } else {
            self.breakers.record_success(&breaker_context, now);
        }

        Ok(record)
    }

    // ------------------------------------------------------------------
    // getDecision / listDecisions / updateDecision
    // ------------------------------------------------------------------

    /// Fetches a single decision and records a tracker input (§4.5, §6).
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::NotFound`] if no such decision exists.
    pub fn get_decision(&self, agent_id: &AgentId, id: &DecisionId, now: Timestamp) -> Result<DecisionRecord, ServiceError> {
        let mut record = self.store.get(id).map_err(|err| ServiceError::new(ErrorKind::NotFound, err.to_string()))?;
        record.related = self.related_edges_for(id);
        self.track(agent_id, PENDING, "getDecision", format!("looked up decision {id}"), now);
        Ok(record)
    }

    /// Lists decisions matching a filter (§4.1, §6).
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Internal`] on a store failure.
    pub fn list_decisions(&self, filter: &DecisionFilter, page: PageRequest) -> Result<decision_intel_core::Page<DecisionRecord>, ServiceError> {
        self.store.list(filter, page).map_err(|err| ServiceError::new(ErrorKind::Internal, err.to_string()))
    }

    /// Updates mutable fields of a pending decision (§3.1, §6). Immutable-
    /// field mutation attempts on a reviewed decision surface the store's
    /// error unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::NotFound`] or [`ErrorKind::RecordFailed`].
    pub fn update_decision(&self, id: &DecisionId, mutate: impl FnOnce(&mut DecisionRecord), now: Timestamp) -> Result<DecisionRecord, ServiceError> {
        let mut record = self.store.get(id).map_err(|err| ServiceError::new(ErrorKind::NotFound, err.to_string()))?;
        mutate(&mut record);
        record.updated_at = now;
        self.store.put(record.clone()).map_err(|err| ServiceError::new(ErrorKind::RecordFailed, err.to_string()))?;
        Ok(record)
    }

    // ------------------------------------------------------------------
    // recordThought
    // ------------------------------------------------------------------

    /// Records a deliberation step against a pending tracker session
    /// (before a decision exists) or an explicit decision (§3.1, §4.5, §6).
    /// With an explicit `decision_id`, the step is appended to that record's
    /// `deliberation.steps` rather than held only in the tracker.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidParams`] if `decision_id` is not a
    /// well-formed decision ID, or [`ErrorKind::NotFound`] if it names a
    /// decision that does not exist.
    pub fn record_thought(
        &self,
        agent_id: &AgentId,
        decision_id: Option<&str>,
        thought: String,
        step_no: u32,
        inputs_used: Vec<InputId>,
        now: Timestamp,
    ) -> Result<(), ServiceError> {
        let key = decision_id.unwrap_or(PENDING);
        let summary = format!("recorded thought: {}", truncate(&thought, 80));
        self.track(agent_id, key, "recordThought", summary, now);

        let step = DeliberationStep { step_no, thought, inputs_used, timestamp: now, step_type: None };
        if let Some(raw_id) = decision_id {
            let target = DecisionId::parse(raw_id).ok_or_else(|| ServiceError::new(ErrorKind::InvalidParams, format!("malformed decision id: {raw_id}")))?;
            let mut record = self.store.get(&target).map_err(|err| ServiceError::new(ErrorKind::NotFound, err.to_string()))?;
            record.deliberation.steps.push(step);
            record.updated_at = now;
            self.store.put(record).map_err(|err| ServiceError::new(ErrorKind::RecordFailed, err.to_string()))?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // getCalibration / getReasonStats / checkDrift
    // ------------------------------------------------------------------

    /// # Errors
    ///
    /// Returns [`ErrorKind::Internal`] on a store failure.
    pub fn get_calibration(&self, query: &CalibrationQuery, now: Timestamp) -> Result<CalibrationReport, ServiceError> {
        CalibrationService::new(self.store.as_ref()).get_calibration(query, now).map_err(|err| ServiceError::new(ErrorKind::Internal, err.to_string()))
    }

    /// # Errors
    ///
    /// Returns [`ErrorKind::Internal`] on a store failure.
    pub fn get_reason_stats(&self, query: &CalibrationQuery, now: Timestamp) -> Result<Vec<ReasonTypeStats>, ServiceError> {
        CalibrationService::new(self.store.as_ref()).get_reason_stats(query, now).map_err(|err| ServiceError::new(ErrorKind::Internal, err.to_string()))
    }

    /// # Errors
    ///
    /// Returns [`ErrorKind::Internal`] on a store failure.
    pub fn check_drift(&self, query: &CalibrationQuery, now: Timestamp) -> Result<DriftReport, ServiceError> {
        CalibrationService::new(self.store.as_ref()).check_drift(query, now).map_err(|err| ServiceError::new(ErrorKind::Internal, err.to_string()))
    }

    // ------------------------------------------------------------------
    // linkDecisions / getGraph / getNeighbors
    // ------------------------------------------------------------------

    /// # Errors
    ///
    /// Returns [`ErrorKind::NotFound`] if either endpoint is missing, or
    /// [`ErrorKind::InvalidParams`] for a self-loop.
    pub fn link_decisions(&self, source: DecisionId, target: DecisionId, edge_type: EdgeType, weight: f64, context: Option<String>, now: Timestamp) -> Result<Edge, ServiceError> {
        let mut known = HashSet::new();
        if self.store.get(&source).is_ok() {
            known.insert(source.clone());
        }
        if self.store.get(&target).is_ok() {
            known.insert(target.clone());
        }
        self.graph.link(source, target, edge_type, weight, context, &known, now).map_err(|err| match err {
            crate::graph::GraphError::SelfLoop(id) => ServiceError::new(ErrorKind::InvalidParams, format!("self-loop not permitted: {id}")),
            crate::graph::GraphError::UnknownEndpoint(id) => ServiceError::new(ErrorKind::NotFound, format!("unknown decision: {id}")),
            crate::graph::GraphError::Io(msg) => ServiceError::new(ErrorKind::Internal, msg),
        })
    }

    #[must_use]
    pub fn get_graph(&self, root: &DecisionId, depth: usize, edge_types: Option<&[EdgeType]>) -> GraphView {
        self.graph.get_graph(root, depth, edge_types)
    }

    #[must_use]
    pub fn get_neighbors(&self, id: &DecisionId, edge_type: Option<EdgeType>) -> Vec<Edge> {
        self.graph.get_neighbors(id, edge_type)
    }

    // ------------------------------------------------------------------
    // getCircuitState / resetCircuit
    // ------------------------------------------------------------------

    #[must_use]
    pub fn get_circuit_state(&self, scope: &str) -> Option<(crate::breaker::BreakerState, usize)> {
        self.breakers.state_of(scope)
    }

    pub fn reset_circuit(&self, scope: &str, probe_first: bool, now: Timestamp) {
        self.breakers.manual_reset(scope, probe_first, now);
    }

    // ------------------------------------------------------------------
    // reindex
    // ------------------------------------------------------------------

    /// Forces a keyword-index rebuild (§6, §9: non-blocking, since
    /// `decision-intel-retrieval` publishes rebuilt snapshots atomically and
    /// concurrent queries keep serving the prior snapshot until then).
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Internal`] on a store failure.
    pub async fn reindex(&self) -> Result<(), ServiceError> {
        self.retrieval.reindex().await.map_err(|err| ServiceError::new(ErrorKind::Internal, err.to_string()))
    }

    // ------------------------------------------------------------------
    // ready
    // ------------------------------------------------------------------

    /// Assembles the ready queue: overdue reviews, stale pending decisions,
    /// active contradiction edges (§4.9, §6). Calibration drift per category
    /// is surfaced through `checkDrift`, called once per category present
    /// among pending/stale decisions.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Internal`] on a store failure.
    pub fn ready(&self, now: Timestamp) -> Result<ReadyQueue, ServiceError> {
        let pending_filter = DecisionFilter { status: Some(Status::Pending), ..DecisionFilter::default() };
        let page = self.store.list(&pending_filter, PageRequest { offset: 0, limit: decision_intel_core::filter::MAX_PAGE_LIMIT }).map_err(|err| ServiceError::new(ErrorKind::Internal, err.to_string()))?;

        let stale_cutoff_ms = 30 * 24 * 60 * 60 * 1000i64;
        let stale_pending: Vec<DecisionId> = page
            .items
            .iter()
            .filter(|record| now.millis_since(&record.created_at) >= stale_cutoff_ms)
            .map(|record| record.id.clone())
            .collect();

        let categories_with_drift: Vec<Category> = [Category::Architecture, Category::Process, Category::Integration, Category::Tooling, Category::Security]
            .into_iter()
            .filter(|category| {
                let query = CalibrationQuery { category: Some(*category), ..CalibrationQuery::default() };
                CalibrationService::new(self.store.as_ref()).check_drift(&query, now).map(|report| report.drift_alert).unwrap_or(false)
            })
            .collect();

        let active_contradictions = self.graph.active_contradictions();

        Ok(ReadyQueue {
            overdue_reviews: page.items.into_iter().map(|record| record.id).collect(),
            stale_pending,
            categories_with_calibration_drift: categories_with_drift,
            active_contradictions,
        })
    }

    // ------------------------------------------------------------------
    // Composite operations (§4.10)
    // ------------------------------------------------------------------

    /// `preAction`: retrieval over the combined action context plus a
    /// guardrail evaluation, with an optional auto-record of the action
    /// itself as a pending decision (§4.10).
    ///
    /// # Errors
    ///
    /// Returns the first failing sub-operation's error.
    pub async fn pre_action(&self, agent_id: &AgentId, request: PreActionRequest, breaker_context: &BreakerContext, now: Timestamp) -> Result<PreActionResponse, ServiceError> {
        if let crate::breaker::BreakerCheck::Blocked(violation) = self.breakers.check(breaker_context, now) {
            return Err(circuit_open_error(&violation));
        }

        let query_text = request.action.clone();
        let retrieval_filter = DecisionFilter { tags: request.tags.clone(), ..DecisionFilter::default() };
        let related = self
            .retrieval
            .query(&query_text, &retrieval_filter, request.query_limit.unwrap_or(5), RetrievalMode::Hybrid, BridgeSide::Both)
            .await
            .map_err(|err| ServiceError::new(ErrorKind::QueryFailed, err.to_string()))?;

        let mut fields = serde_json::json!({ "action": request.action });
        if let Some(pattern) = &request.pattern {
            fields["pattern"] = serde_json::Value::String(pattern.clone());
        }
        let context = ActionContext::new(agent_id.clone(), fields);
        let guardrails = self
            .guardrails
            .evaluate(&context)
            .await
            .map_err(|err| ServiceError::new(ErrorKind::GuardrailEvalFailed, err.to_string()))?;

        let summary = format!("preAction \"{}\": {} related, allowed={}", truncate(&request.action, 60), related.len(), guardrails.allowed);
        self.track(agent_id, PENDING, "preAction", summary, now);

        Ok(PreActionResponse { related, guardrails })
    }

    /// `getSessionContext`: fans out to retrieval, guardrails, calibration,
    /// the ready queue, and the graph, assembling a combined context for a
    /// task (§4.10).
    ///
    /// # Errors
    ///
    /// Returns the first failing sub-operation's error.
    pub async fn get_session_context(&self, agent_id: &AgentId, request: GetSessionContextRequest, now: Timestamp) -> Result<SessionContextResponse, ServiceError> {
        let mut response = SessionContextResponse::default();

        if request.include.retrieval {
            let filter = DecisionFilter::default();
            response.related = Some(
                self.retrieval
                    .query(&request.task, &filter, request.limits.retrieval, RetrievalMode::Hybrid, BridgeSide::Both)
                    .await
                    .map_err(|err| ServiceError::new(ErrorKind::QueryFailed, err.to_string()))?,
            );
        }
        if request.include.guardrails {
            let context = ActionContext::new(agent_id.clone(), serde_json::json!({ "task": request.task }));
            response.guardrails = Some(
                self.guardrails
                    .evaluate(&context)
                    .await
                    .map_err(|err| ServiceError::new(ErrorKind::GuardrailEvalFailed, err.to_string()))?,
            );
        }
        if request.include.calibration {
            response.calibration = Some(self.get_calibration(&CalibrationQuery::default(), now)?);
        }
        if request.include.ready_queue {
            response.ready_queue = Some(self.ready(now)?);
        }
        if request.include.graph {
            if let Some(root) = &request.graph_root {
                response.graph = Some(self.get_graph(root, 2, None));
            }
        }

        let summary = format!("getSessionContext \"{}\"", truncate(&request.task, 60));
        self.track(agent_id, PENDING, "getSessionContext", summary, now);

        if matches!(request.format, SessionContextFormat::Markdown) {
            response.markdown = Some(response.to_markdown());
        }

        Ok(response)
    }
}

// ============================================================================
// SECTION: Request/response shapes
// ============================================================================

/// `queryDecisions` request parameters (§6).
#[derive(Debug, Clone)]
pub struct QueryDecisionsRequest {
    pub text: String,
    pub filter: DecisionFilter,
    pub limit: usize,
    pub mode: RetrievalMode,
    pub bridge_side: BridgeSide,
}

/// `recordDecision` request parameters (§6).
#[derive(Debug, Clone)]
pub struct RecordDecisionRequest {
    pub decision: String,
    pub confidence: f64,
    pub category: Category,
    pub stakes: Stakes,
    pub context: Option<String>,
    pub reasons: Vec<Reason>,
    pub tags: std::collections::BTreeSet<String>,
    pub pattern: Option<String>,
    pub bridge: Bridge,
    pub bridge_method: BridgeMethod,
    pub deliberation: Option<decision_intel_core::DeliberationTrace>,
    pub project_context: ProjectContext,
    /// Most recent tracked-query results for this agent, used to auto-link
    /// the new decision (§4.9).
    pub auto_link_candidates: Vec<(DecisionId, f64)>,
}

/// `reviewDecision` request parameters (§6).
#[derive(Debug, Clone)]
pub struct ReviewDecisionRequest {
    pub id: DecisionId,
    pub outcome: Outcome,
    pub outcome_result: Option<String>,
    pub lessons: Option<String>,
}

/// `preAction` request parameters (§4.10, §6).
#[derive(Debug, Clone)]
pub struct PreActionRequest {
    pub action: String,
    pub reasons: Vec<Reason>,
    pub tags: Vec<String>,
    pub pattern: Option<String>,
    pub query_limit: Option<usize>,
}

/// `preAction` response (§4.10).
#[derive(Debug, Clone, Serialize)]
pub struct PreActionResponse {
    pub related: Vec<RetrievedDecision>,
    pub guardrails: GuardrailEvalResult,
}

/// Which sub-operations `getSessionContext` fans out to (§4.10).
#[derive(Debug, Clone, Copy)]
pub struct SessionContextInclude {
    pub retrieval: bool,
    pub guardrails: bool,
    pub calibration: bool,
    pub ready_queue: bool,
    pub graph: bool,
}

impl Default for SessionContextInclude {
    fn default() -> Self {
        Self { retrieval: true, guardrails: true, calibration: true, ready_queue: true, graph: false }
    }
}

/// Per-component result limits for `getSessionContext` (§4.10).
#[derive(Debug, Clone, Copy)]
pub struct SessionContextLimits {
    pub retrieval: usize,
}

impl Default for SessionContextLimits {
    fn default() -> Self {
        Self { retrieval: 5 }
    }
}

/// Output format for `getSessionContext` (§4.10).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionContextFormat {
    #[default]
    Json,
    Markdown,
}

/// `getSessionContext` request parameters (§4.10, §6).
#[derive(Debug, Clone)]
pub struct GetSessionContextRequest {
    pub task: String,
    pub include: SessionContextInclude,
    pub limits: SessionContextLimits,
    pub format: SessionContextFormat,
    pub graph_root: Option<DecisionId>,
}

/// The ready queue assembled by `ready` (§4.9, §6).
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReadyQueue {
    pub overdue_reviews: Vec<DecisionId>,
    pub stale_pending: Vec<DecisionId>,
    pub categories_with_calibration_drift: Vec<Category>,
    pub active_contradictions: Vec<Edge>,
}

/// `getSessionContext` response, fanning out to whichever sub-operations
/// were requested (§4.10).
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionContextResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related: Option<Vec<RetrievedDecision>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guardrails: Option<GuardrailEvalResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calibration: Option<CalibrationReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_queue: Option<ReadyQueue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph: Option<GraphView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markdown: Option<String>,
}

impl SessionContextResponse {
    fn to_markdown(&self) -> String {
        let mut out = String::from("# Session Context\n\n");
        if let Some(related) = &self.related {
            out.push_str("## Related decisions\n\n");
            for item in related {
                out.push_str(&format!("- `{}` {} (confidence {:.2})\n", item.id, item.summary, item.confidence));
            }
            out.push('\n');
        }
        if let Some(guardrails) = &self.guardrails {
            out.push_str(&format!("## Guardrails\n\nallowed: {}\n\n", guardrails.allowed));
        }
        if let Some(calibration) = &self.calibration {
            out.push_str(&format!(
                "## Calibration\n\nbrier: {:.3}, accuracy: {:.3}, decisions: {}\n\n",
                calibration.brier_score, calibration.accuracy, calibration.decisions_considered
            ));
        }
        if let Some(ready) = &self.ready_queue {
            out.push_str(&format!(
                "## Ready queue\n\n{} overdue, {} stale, {} categories drifting\n\n",
                ready.overdue_reviews.len(),
                ready.stale_pending.len(),
                ready.categories_with_calibration_drift.len()
            ));
        }
        out
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn not_found_or_review_failed(err: decision_intel_core::StoreError) -> ServiceError {
    match err {
        decision_intel_core::StoreError::NotFound(id) => ServiceError::new(ErrorKind::NotFound, format!("decision not found: {id}")),
        other => ServiceError::new(ErrorKind::ReviewFailed, other.to_string()),
    }
}

fn circuit_open_error(violation: &BreakerViolationRef) -> ServiceError {
    ServiceError::with_detail(
        ErrorKind::CircuitOpen,
        format!("circuit breaker open for scope {}", violation.scope),
        BlockDetail {
            rule_id: Some(violation.scope.clone()),
            state: Some(format!("{:?}", violation.state)),
            failure_rate: None,
            recent_failures: Some(violation.failure_count as u32),
            suggestion: Some(violation.suggestion.clone()),
        },
    )
}

type BreakerViolationRef = crate::breaker::BreakerViolation;

fn derive_with_retry(agent: &str, decision: &str, created_at: &str) -> Result<DecisionId, HashError> {
    for salt in 0..16u32 {
        if let Ok(id) = derive_decision_id(agent, decision, created_at, salt) {
            return Ok(id);
        }
    }
    derive_decision_id(agent, decision, created_at, 0)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(max_chars).collect();
        out.push('\u{2026}');
        out
    }
}

fn fnv1a(text: &str) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in text.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use decision_intel_core::PutOutcome;
    use decision_intel_core::StoreError;
    use std::sync::Mutex;

    struct MemStore(Mutex<Vec<DecisionRecord>>);

    impl Store for MemStore {
        fn put(&self, record: DecisionRecord) -> Result<PutOutcome, StoreError> {
            let mut records = self.0.lock().unwrap();
            if let Some(existing) = records.iter_mut().find(|r| r.id == record.id) {
                *existing = record;
                return Ok(PutOutcome::Updated);
            }
            records.push(record);
            Ok(PutOutcome::Created)
        }
        fn get(&self, id: &DecisionId) -> Result<DecisionRecord, StoreError> {
            self.0.lock().unwrap().iter().find(|r| &r.id == id).cloned().ok_or_else(|| StoreError::NotFound(id.clone()))
        }
        fn list(&self, filter: &DecisionFilter, page: PageRequest) -> Result<decision_intel_core::Page<DecisionRecord>, StoreError> {
            let all: Vec<DecisionRecord> = self
                .0
                .lock()
                .unwrap()
                .iter()
                .filter(|r| filter.status.map_or(true, |s| s == r.status) && filter.category.map_or(true, |c| c == r.category))
                .cloned()
                .collect();
            let total = all.len();
            let items = all.into_iter().skip(page.offset).take(page.limit).collect();
            Ok(decision_intel_core::Page { items, total, offset: page.offset })
        }
        fn reset(&self) -> Result<(), StoreError> {
            self.0.lock().unwrap().clear();
            Ok(())
        }
    }

    fn dispatcher() -> Dispatcher {
        let loader = CachedGuardrailLoader::new(decision_intel_guardrails::StaticGuardrailSource::new(Vec::new()));
        Dispatcher::new(DispatcherConfig {
            store: Arc::new(MemStore(Mutex::new(Vec::new()))),
            embeddings: None,
            vector_store: None,
            guardrail_loader: loader,
        })
    }

    fn base_request(decision: &str) -> RecordDecisionRequest {
        RecordDecisionRequest {
            decision: decision.to_string(),
            confidence: 0.8,
            category: Category::Architecture,
            stakes: Stakes::Medium,
            context: None,
            reasons: Vec::new(),
            tags: std::collections::BTreeSet::new(),
            pattern: None,
            bridge: Bridge::default(),
            bridge_method: BridgeMethod::None,
            deliberation: None,
            project_context: ProjectContext::default(),
            auto_link_candidates: Vec::new(),
        }
    }

    #[test]
    fn record_then_get_round_trips() {
        let dispatcher = dispatcher();
        let agent = AgentId::new("agent-1");
        let now = Timestamp::now();
        let record = dispatcher.record_decision(&agent, base_request("adopt retries"), now).expect("record");
        let fetched = dispatcher.get_decision(&agent, &record.id, now).expect("get");
        assert_eq!(fetched.decision, "adopt retries");
    }

    #[test]
    fn record_decision_consumes_pending_tracker_session() {
        let dispatcher = dispatcher();
        let agent = AgentId::new("agent-1");
        let now = Timestamp::now();
        dispatcher.track(&agent, PENDING, "queryDecisions", "looked something up".to_string(), now);
        let record = dispatcher.record_decision(&agent, base_request("adopt retries"), now).expect("record");
        assert_eq!(record.deliberation.inputs.len(), 1);
        assert!(dispatcher.tracker.peek(&agent, PENDING).is_none());
    }

    #[test]
    fn record_decision_materializes_related_from_auto_links() {
        let dispatcher = dispatcher();
        let agent = AgentId::new("agent-1");
        let now = Timestamp::now();
        let first = dispatcher.record_decision(&agent, base_request("use redis for caching"), now).expect("record first");
        let second = dispatcher.record_decision(&agent, base_request("use postgres fts"), now).expect("record second");

        let mut request = base_request("add exponential backoff");
        request.auto_link_candidates = vec![(first.id.clone(), 0.2), (second.id.clone(), 0.3)];
        let record = dispatcher.record_decision(&agent, request, now).expect("record third");

        assert_eq!(record.related.len(), 2);
        let fetched = dispatcher.get_decision(&agent, &record.id, now).expect("get");
        assert_eq!(fetched.related.len(), 2);
    }

    #[test]
    fn record_decision_drops_auto_link_candidates_that_do_not_exist() {
        let dispatcher = dispatcher();
        let agent = AgentId::new("agent-1");
        let now = Timestamp::now();
        let bogus = decision_intel_core::DecisionId::parse("deadbeef").expect("valid shape");

        let mut request = base_request("add exponential backoff");
        request.auto_link_candidates = vec![(bogus, 0.2)];
        let record = dispatcher.record_decision(&agent, request, now).expect("record");

        assert!(record.related.is_empty());
    }

    #[test]
    fn record_thought_with_decision_id_persists_step_on_the_record() {
        let dispatcher = dispatcher();
        let agent = AgentId::new("agent-1");
        let now = Timestamp::now();
        let record = dispatcher.record_decision(&agent, base_request("adopt retries"), now).expect("record");

        dispatcher
            .record_thought(&agent, Some(record.id.as_str()), "reconsidering after review".to_string(), 1, Vec::new(), now)
            .expect("record thought");

        let fetched = dispatcher.get_decision(&agent, &record.id, now).expect("get");
        assert_eq!(fetched.deliberation.steps.len(), 1);
        assert_eq!(fetched.deliberation.steps[0].thought, "reconsidering after review");
    }

    #[test]
    fn record_thought_rejects_unknown_decision_id() {
        let dispatcher = dispatcher();
        let agent = AgentId::new("agent-1");
        let now = Timestamp::now();
        let err = dispatcher.record_thought(&agent, Some("deadbeef"), "orphaned thought".to_string(), 1, Vec::new(), now).expect_err("should fail");
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn review_decision_trips_breaker_on_repeated_failure() {
        let dispatcher = dispatcher().with_breakers(CircuitBreakerManager::new().with_thresholds(2, std::time::Duration::from_secs(900), std::time::Duration::from_secs(300)));
        let agent = AgentId::new("agent-1");
        let now = Timestamp::now();
        for _ in 0..2 {
            let record = dispatcher.record_decision(&agent, base_request("risky change"), now).expect("record");
            dispatcher
                .review_decision(ReviewDecisionRequest { id: record.id, outcome: Outcome::Failure, outcome_result: None, lessons: None }, now)
                .expect("review");
        }
        let state = dispatcher.get_circuit_state(&format!("agent:{}", agent.as_str()));
        assert!(matches!(state, Some((crate::breaker::BreakerState::Open, _))));
    }
}
