// decision-intel-retrieval/src/engine.rs
// ============================================================================
// Module: Retrieval Engine
// Description: Hybrid semantic + keyword decision retrieval (§4.2).
// Purpose: Give the dispatcher, guardrail engine, and composite operations a
//          single `query` entry point over the decision store.
// Dependencies: decision-intel-core, crate::bm25, std::sync, tokio
// ============================================================================

//! ## Overview
//! [`RetrievalEngine::query`] implements §4.2's contract: `mode ∈ {semantic,
//! keyword, hybrid}`, a `2 × limit` candidate pool per source, a combined
//! score `w_s · d_semantic + w_k · (1 − bm25_norm)`, and graceful
//! degradation to keyword-only when the vector backend is unreachable.

use std::sync::Arc;

use decision_intel_core::DecisionFilter;
use decision_intel_core::DecisionId;
use decision_intel_core::DecisionRecord;
use decision_intel_core::EmbeddingProvider;
use decision_intel_core::PageRequest;
use decision_intel_core::Store;
use decision_intel_core::StoreError;
use decision_intel_core::Timestamp;
use decision_intel_core::VectorStore;
use decision_intel_core::filter::BridgeSide;
use thiserror::Error;

use crate::bm25::Bm25Index;
use crate::bm25::CachedBm25Index;
use crate::bm25::tokenize;

/// Maximum records fetched per page while rebuilding the BM25 snapshot.
const FETCH_PAGE_SIZE: usize = 500;

/// Retrieval mode requested by a caller (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetrievalMode {
    /// Vector-similarity search only.
    Semantic,
    /// BM25 keyword search only.
    Keyword,
    /// Both, merged by [`HybridWeights`] (default).
    #[default]
    Hybrid,
}

/// Weights applied when combining semantic distance and normalized keyword
/// score (§4.2 default: semantic 0.7, keyword 0.3).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HybridWeights {
    /// Weight applied to the semantic distance term.
    pub semantic: f64,
    /// Weight applied to the inverted, normalized keyword term.
    pub keyword: f64,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            semantic: 0.7,
            keyword: 0.3,
        }
    }
}

/// Per-source score breakdown for a retrieved decision (§4.2).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scores {
    /// Semantic distance, `None` when the semantic backend was unavailable
    /// or this candidate did not surface in the vector pool.
    pub semantic: Option<f64>,
    /// Normalized keyword relevance (`1 − bm25_norm`), `None` in
    /// semantic-only mode.
    pub keyword: Option<f64>,
    /// The final ranking score (lower = more similar).
    pub combined: f64,
}

/// A single retrieval result (§4.2).
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedDecision {
    /// The matched decision's ID.
    pub id: DecisionId,
    /// Human-readable summary (the decision's core assertion text).
    pub summary: String,
    /// Classification of the decision.
    pub category: decision_intel_core::Category,
    /// Stated confidence in `[0, 1]`.
    pub confidence: f64,
    /// Stakes level.
    pub stakes: decision_intel_core::Stakes,
    /// Lifecycle status.
    pub status: decision_intel_core::Status,
    /// Creation timestamp.
    pub date: Timestamp,
    /// The final ranking distance (equal to `scores.combined`).
    pub distance: f64,
    /// Per-source score breakdown.
    pub scores: Scores,
    /// Bridge snapshot, present when the record has a non-empty bridge.
    pub bridge: Option<decision_intel_core::Bridge>,
}

/// Errors raised while executing a retrieval query.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// The query could not be completed (purely-semantic mode with an
    /// unreachable or unconfigured backend, a store I/O failure, or a
    /// timeout surfaced by the caller).
    #[error("retrieval query failed: {0}")]
    QueryFailed(String),
}

impl From<StoreError> for RetrievalError {
    fn from(error: StoreError) -> Self {
        Self::QueryFailed(error.to_string())
    }
}

/// Hybrid retrieval engine over a [`Store`], an optional [`EmbeddingProvider`],
/// and an optional [`VectorStore`] (§4.2).
pub struct RetrievalEngine {
    store: Arc<dyn Store>,
    bm25: CachedBm25Index,
    embeddings: Option<Arc<dyn EmbeddingProvider>>,
    vector_store: Option<Arc<dyn VectorStore>>,
    weights: HybridWeights,
}

impl RetrievalEngine {
    /// Builds an engine with the default hybrid weights (§4.2).
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        embeddings: Option<Arc<dyn EmbeddingProvider>>,
        vector_store: Option<Arc<dyn VectorStore>>,
    ) -> Self {
        Self {
            store,
            bm25: CachedBm25Index::new(),
            embeddings,
            vector_store,
            weights: HybridWeights::default(),
        }
    }

    /// Overrides the hybrid merge weights.
    #[must_use]
    pub fn with_weights(mut self, weights: HybridWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Executes a retrieval query (§4.2).
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::QueryFailed`] when the store cannot be
    /// read, or when `mode = Semantic` and the vector backend is
    /// unconfigured or unreachable.
    pub async fn query(
        &self,
        text: &str,
        filter: &DecisionFilter,
        limit: usize,
        mode: RetrievalMode,
        bridge_side: BridgeSide,
    ) -> Result<Vec<RetrievedDecision>, RetrievalError> {
        let limit = limit.max(1);
        self.refresh_bm25_if_stale().await?;
        let query_tokens = tokenize(text);
        let pool_size = limit * 2;

        let keyword_pool = if matches!(mode, RetrievalMode::Keyword | RetrievalMode::Hybrid) {
            self.bm25.current().score(&query_tokens, None, pool_size)
        } else {
            Vec::new()
        };

        let semantic_pool = match mode {
            RetrievalMode::Semantic => Some(self.semantic_search(text, pool_size).await?),
            RetrievalMode::Hybrid => self.semantic_search(text, pool_size).await.ok(),
            RetrievalMode::Keyword => None,
        };
        let semantic_degraded = matches!(mode, RetrievalMode::Hybrid) && semantic_pool.is_none();

        let mut union_ids: Vec<DecisionId> = keyword_pool.iter().map(|(id, _)| id.clone()).collect();
        if let Some(pool) = &semantic_pool {
            for (id, _) in pool {
                if !union_ids.contains(id) {
                    union_ids.push(id.clone());
                }
            }
        }

        let bm25_snapshot = self.bm25.current();
        let mut candidates = Vec::with_capacity(union_ids.len());
        for id in &union_ids {
            let Ok(record) = self.store.get(id) else {
                continue;
            };
            if !matches_filter(&record, filter) {
                continue;
            }
            let semantic_distance =
                semantic_pool.as_ref().and_then(|pool| pool.iter().find(|(pid, _)| pid == id)).map(|(_, d)| *d);
            let keyword_raw = keyword_raw_score(&bm25_snapshot, &record, &query_tokens, bridge_side);
            candidates.push((record, semantic_distance, keyword_raw));
        }

        let keyword_component = if matches!(mode, RetrievalMode::Keyword | RetrievalMode::Hybrid) {
            Some(normalize_keyword_scores(candidates.iter().map(|(_, _, raw)| *raw)))
        } else {
            None
        };

        let mut results: Vec<RetrievedDecision> = candidates
            .into_iter()
            .enumerate()
            .map(|(index, (record, semantic_distance, _raw))| {
                let keyword = keyword_component.as_ref().map(|normalized| normalized[index]);
                let semantic_for_combine = if matches!(mode, RetrievalMode::Keyword) {
                    None
                } else if semantic_degraded {
                    None
                } else {
                    Some(semantic_distance.unwrap_or(1.0))
                };
                let combined = match (semantic_for_combine, keyword) {
                    (Some(semantic), Some(keyword)) => {
                        self.weights.semantic * semantic + self.weights.keyword * (1.0 - keyword)
                    }
                    (Some(semantic), None) => semantic,
                    (None, Some(keyword)) => 1.0 - keyword,
                    (None, None) => 1.0,
                };
                let bridge = (!record.bridge.is_empty()).then(|| record.bridge.clone());
                RetrievedDecision {
                    id: record.id.clone(),
                    summary: record.decision.clone(),
                    category: record.category,
                    confidence: record.confidence,
                    stakes: record.stakes,
                    status: record.status,
                    date: record.created_at,
                    distance: combined,
                    scores: Scores {
                        semantic: if semantic_degraded { None } else { semantic_distance },
                        keyword,
                        combined,
                    },
                    bridge,
                }
            })
            .collect();

        results.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| b.confidence.total_cmp(&a.confidence))
                .then_with(|| b.date.cmp(&a.date))
        });
        results.truncate(limit);
        Ok(results)
    }

    async fn semantic_search(
        &self,
        text: &str,
        n: usize,
    ) -> Result<Vec<(DecisionId, f64)>, RetrievalError> {
        let embeddings = self
            .embeddings
            .as_ref()
            .ok_or_else(|| RetrievalError::QueryFailed("embedding provider not configured".to_string()))?;
        let vector_store = self
            .vector_store
            .as_ref()
            .ok_or_else(|| RetrievalError::QueryFailed("vector store not configured".to_string()))?;
        let vector = embeddings
            .embed(text)
            .await
            .map_err(|err| RetrievalError::QueryFailed(err.to_string()))?;
        let matches = vector_store
            .query(&vector, n, None)
            .await
            .map_err(|err| RetrievalError::QueryFailed(err.to_string()))?;
        Ok(matches
            .into_iter()
            .filter_map(|m| DecisionId::parse(m.id).map(|id| (id, m.distance)))
            .collect())
    }

    async fn refresh_bm25_if_stale(&self) -> Result<(), RetrievalError> {
        let total = self
            .store
            .list(&DecisionFilter::default(), PageRequest { offset: 0, limit: 1 })
            .map_err(RetrievalError::from)?
            .total;
        if !self.bm25.is_stale(total) {
            return Ok(());
        }
        self.rebuild_bm25(total).await
    }

    /// Forces a full BM25 rebuild regardless of staleness, for the
    /// dispatcher's `reindex` method (§6). Readers keep serving the
    /// previous snapshot until the rebuild publishes (§9: blocking the
    /// whole engine during reindex would stall concurrent queries for no
    /// correctness benefit, since `Bm25Index::build` only ever replaces the
    /// snapshot atomically).
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::QueryFailed`] on a store failure or if the
    /// build task panics.
    pub async fn reindex(&self) -> Result<(), RetrievalError> {
        let total = self
            .store
            .list(&DecisionFilter::default(), PageRequest { offset: 0, limit: 1 })
            .map_err(RetrievalError::from)?
            .total;
        self.rebuild_bm25(total).await
    }

    async fn rebuild_bm25(&self, total: usize) -> Result<(), RetrievalError> {
        let records = fetch_all(self.store.as_ref())?;
        let index = tokio::task::spawn_blocking(move || Bm25Index::build(&records))
            .await
            .map_err(|err| RetrievalError::QueryFailed(format!("bm25 build task panicked: {err}")))?;
        self.bm25.publish(index, total);
        Ok(())
    }
}

/// Fetches every record in the store, paginating in [`FETCH_PAGE_SIZE`]
/// chunks.
fn fetch_all(store: &dyn Store) -> Result<Vec<DecisionRecord>, RetrievalError> {
    let mut offset = 0usize;
    let mut all = Vec::new();
    loop {
        let page = store
            .list(&DecisionFilter::default(), PageRequest { offset, limit: FETCH_PAGE_SIZE })
            .map_err(RetrievalError::from)?;
        let fetched = page.items.len();
        all.extend(page.items);
        if fetched < FETCH_PAGE_SIZE || all.len() >= page.total {
            break;
        }
        offset += FETCH_PAGE_SIZE;
    }
    Ok(all)
}

/// Computes this record's keyword raw score, using the bridge-side text
/// instead of the full indexed document when a directional search was
/// requested (§4.2).
fn keyword_raw_score(
    index: &Bm25Index,
    record: &DecisionRecord,
    query_tokens: &[String],
    bridge_side: BridgeSide,
) -> f64 {
    match bridge_side {
        BridgeSide::Both => index.score(query_tokens, Some(std::slice::from_ref(&record.id)), 1)
            .first()
            .map_or(0.0, |(_, score)| *score),
        side => index.score_text(&record.bridge_side_text(side), query_tokens),
    }
}

/// Min-max normalizes `raw_scores` to `[0, 1]` (§4.2: `bm25_norm`), higher
/// raw score maps to a higher normalized value (more relevant).
fn normalize_keyword_scores(raw_scores: impl Iterator<Item = f64>) -> Vec<f64> {
    let raw: Vec<f64> = raw_scores.collect();
    let min = raw.iter().copied().fold(f64::INFINITY, f64::min);
    let max = raw.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if raw.is_empty() {
        return Vec::new();
    }
    if (max - min).abs() < f64::EPSILON {
        return raw.iter().map(|_| 1.0).collect();
    }
    raw.iter().map(|value| (value - min) / (max - min)).collect()
}

/// Applies the metadata portion of [`DecisionFilter`] (`search` is delegated
/// to the keyword index and is not re-applied here since it already drove
/// candidate sourcing).
fn matches_filter(record: &DecisionRecord, filter: &DecisionFilter) -> bool {
    if let Some(category) = filter.category {
        if record.category != category {
            return false;
        }
    }
    if let Some(stakes) = filter.stakes {
        if record.stakes != stakes {
            return false;
        }
    }
    if let Some(status) = filter.status {
        if record.status != status {
            return false;
        }
    }
    if let Some(agent) = &filter.agent {
        if &record.recorded_by != agent {
            return false;
        }
    }
    if let Some(project) = &filter.project {
        if record.project_context.project.as_deref() != Some(project.as_str()) {
            return false;
        }
    }
    if let Some(has_outcome) = filter.has_outcome {
        if record.outcome.is_some() != has_outcome {
            return false;
        }
    }
    if !filter.tags.is_empty() && !filter.tags.iter().any(|tag| record.tags.contains(tag)) {
        return false;
    }
    filter.date_range.contains(&record.created_at)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use decision_intel_core::AgentId;
    use decision_intel_core::Bridge;
    use decision_intel_core::BridgeMethod;
    use decision_intel_core::Category;
    use decision_intel_core::DeliberationTrace;
    use decision_intel_core::EmbeddingError;
    use decision_intel_core::Page;
    use decision_intel_core::ProjectContext;
    use decision_intel_core::PutOutcome;
    use decision_intel_core::Reason;
    use decision_intel_core::ReasonType;
    use decision_intel_core::Stakes;
    use decision_intel_core::Status;
    use decision_intel_core::VectorMatch;
    use decision_intel_core::VectorStoreError;
    use decision_intel_core::Where;

    use super::*;

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

    struct StubEmbeddings;

    #[async_trait]
    impl EmbeddingProvider for StubEmbeddings {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![0.0])
        }

        fn dimensions(&self) -> usize {
            1
        }

        fn model_name(&self) -> &str {
            "stub"
        }

        fn max_length(&self) -> usize {
            10_000
        }
    }

    struct StubVectorStore {
        matches: Vec<VectorMatch>,
        unavailable: bool,
    }

    #[async_trait]
    impl VectorStore for StubVectorStore {
        async fn initialize(&self) -> Result<(), VectorStoreError> {
            Ok(())
        }

        async fn upsert(
            &self,
            _id: &str,
            _doc: &str,
            _vector: &[f32],
            _meta: serde_json::Value,
        ) -> Result<(), VectorStoreError> {
            Ok(())
        }

        async fn query(
            &self,
            _vector: &[f32],
            n: usize,
            _where_clause: Option<&Where>,
        ) -> Result<Vec<VectorMatch>, VectorStoreError> {
            if self.unavailable {
                return Err(VectorStoreError::Unavailable("offline".to_string()));
            }
            Ok(self.matches.iter().take(n).cloned().collect())
        }

        async fn delete(&self, _ids: &[String]) -> Result<(), VectorStoreError> {
            Ok(())
        }

        async fn count(&self) -> Result<usize, VectorStoreError> {
            Ok(self.matches.len())
        }

        async fn reset(&self) -> Result<(), VectorStoreError> {
            Ok(())
        }

        fn get_collection_id(&self) -> String {
            "stub".to_string()
        }
    }

    fn record(id: &str, decision: &str, confidence: f64) -> DecisionRecord {
        DecisionRecord {
            id: DecisionId::parse(id).expect("valid id"),
            created_at: Timestamp::now(),
            updated_at: Timestamp::now(),
            reviewed_at: None,
            recorded_by: AgentId::new("agent-1"),
            decision: decision.to_string(),
            confidence,
            category: Category::Architecture,
            stakes: Stakes::Medium,
            context: None,
            status: Status::Pending,
            outcome: None,
            outcome_result: None,
            lessons: None,
            reasons: vec![Reason {
                reason_type: ReasonType::Analysis,
                text: String::new(),
                strength: 0.8,
            }],
            tags: BTreeSet::new(),
            pattern: None,
            bridge: Bridge::default(),
            bridge_method: BridgeMethod::None,
            deliberation: DeliberationTrace::default(),
            related: vec![],
            project_context: ProjectContext::default(),
        }
    }

    fn store_with(records: Vec<DecisionRecord>) -> Arc<dyn Store> {
        Arc::new(MemStore { records: Mutex::new(records) })
    }

    #[tokio::test]
    async fn keyword_mode_ranks_matching_document_first() {
        let store = store_with(vec![
            record("00000001", "adopt exponential backoff for retries", 0.8),
            record("00000002", "use a linear queue for job scheduling", 0.8),
        ]);
        let engine = RetrievalEngine::new(store, None, None);
        let results = engine
            .query("retries backoff", &DecisionFilter::default(), 5, RetrievalMode::Keyword, BridgeSide::Both)
            .await
            .expect("query succeeds");
        assert_eq!(results[0].id.as_str(), "00000001");
        assert!(results[0].scores.semantic.is_none());
    }

    #[tokio::test]
    async fn semantic_mode_without_backend_fails_hard() {
        let store = store_with(vec![record("00000001", "adopt exponential backoff", 0.8)]);
        let engine = RetrievalEngine::new(store, None, None);
        let result = engine
            .query("backoff", &DecisionFilter::default(), 5, RetrievalMode::Semantic, BridgeSide::Both)
            .await;
        assert!(matches!(result, Err(RetrievalError::QueryFailed(_))));
    }

    #[tokio::test]
    async fn hybrid_mode_degrades_to_keyword_only_when_vector_backend_fails() {
        let store = store_with(vec![record("00000001", "adopt exponential backoff for retries", 0.8)]);
        let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(StubEmbeddings);
        let vectors: Arc<dyn VectorStore> = Arc::new(StubVectorStore { matches: vec![], unavailable: true });
        let engine = RetrievalEngine::new(store, Some(embeddings), Some(vectors));
        let results = engine
            .query("retries backoff", &DecisionFilter::default(), 5, RetrievalMode::Hybrid, BridgeSide::Both)
            .await
            .expect("hybrid degrades instead of failing");
        assert_eq!(results.len(), 1);
        assert!(results[0].scores.semantic.is_none());
    }

    #[tokio::test]
    async fn hybrid_mode_combines_both_sources_when_available() {
        let store = store_with(vec![
            record("00000001", "adopt exponential backoff for retries", 0.8),
            record("00000002", "use a linear queue for job scheduling", 0.8),
        ]);
        let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(StubEmbeddings);
        let vectors: Arc<dyn VectorStore> = Arc::new(StubVectorStore {
            matches: vec![VectorMatch {
                id: "00000001".to_string(),
                distance: 0.1,
                meta: serde_json::Value::Null,
            }],
            unavailable: false,
        });
        let engine = RetrievalEngine::new(store, Some(embeddings), Some(vectors));
        let results = engine
            .query("retries backoff", &DecisionFilter::default(), 5, RetrievalMode::Hybrid, BridgeSide::Both)
            .await
            .expect("query succeeds");
        assert_eq!(results[0].id.as_str(), "00000001");
        assert!(results[0].scores.semantic.is_some());
        assert!(results[0].scores.keyword.is_some());
    }

    #[tokio::test]
    async fn metadata_filter_excludes_non_matching_records() {
        let mut high_stakes = record("00000001", "adopt exponential backoff for retries", 0.8);
        high_stakes.stakes = Stakes::Critical;
        let store = store_with(vec![high_stakes, record("00000002", "adopt exponential backoff too", 0.8)]);
        let engine = RetrievalEngine::new(store, None, None);
        let filter = DecisionFilter {
            stakes: Some(Stakes::Critical),
            ..DecisionFilter::default()
        };
        let results = engine
            .query("backoff", &filter, 5, RetrievalMode::Keyword, BridgeSide::Both)
            .await
            .expect("query succeeds");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id.as_str(), "00000001");
    }
}
