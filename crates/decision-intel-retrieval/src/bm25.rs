// decision-intel-retrieval/src/bm25.rs
// ============================================================================
// Module: BM25 Keyword Index
// Description: An in-memory BM25-Okapi index over decision searchable text
//              (§4.3).
// Purpose: Give the retrieval engine a keyword-ranked candidate pool without
//          a third-party search engine dependency.
// Dependencies: decision-intel-core, std::collections, std::time
// ============================================================================

//! ## Overview
//! [`Bm25Index`] is an immutable snapshot built from whatever records are in
//! the store at build time (§4.3: "decision ⊕ category ⊕ tags ⊕ pattern ⊕
//! context ⊕ reasons.text ⊕ bridge.*", which is exactly
//! [`DecisionRecord::searchable_text`]). [`CachedBm25Index`] wraps it with
//! the staleness rule from §4.3 (age > 5 minutes, or store count changed)
//! and swaps in a freshly built index atomically so concurrent readers never
//! observe a partially built snapshot.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;
use std::time::Instant;

use decision_intel_core::DecisionId;
use decision_intel_core::DecisionRecord;

/// Term-frequency saturation parameter (standard Okapi BM25 default).
const K1: f64 = 1.5;
/// Length-normalization parameter (standard Okapi BM25 default).
const B: f64 = 0.75;
/// Cache TTL before a rebuild is considered due regardless of store count
/// (§4.3).
pub const CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Lowercases and whitespace-splits `text`, stripping leading/trailing
/// punctuation from each token (§4.3: "whitespace-lowercase-tokenised").
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|token| token.trim_matches(|ch: char| !ch.is_alphanumeric()).to_lowercase())
        .filter(|token| !token.is_empty())
        .collect()
}

/// An immutable BM25-Okapi index over a fixed set of decision documents.
pub struct Bm25Index {
    /// Term frequencies per document.
    term_freqs: HashMap<DecisionId, HashMap<String, u32>>,
    /// Token count per document.
    doc_lengths: HashMap<DecisionId, usize>,
    /// Number of documents containing each term.
    doc_freq: HashMap<String, usize>,
    /// Total document count.
    n_docs: usize,
    /// Mean document length across the index.
    avg_doc_len: f64,
}

impl Bm25Index {
    /// Builds an index from `records` over [`DecisionRecord::searchable_text`].
    #[must_use]
    pub fn build(records: &[DecisionRecord]) -> Self {
        let mut term_freqs = HashMap::with_capacity(records.len());
        let mut doc_lengths = HashMap::with_capacity(records.len());
        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        let mut total_len = 0usize;

        for record in records {
            let tokens = tokenize(&record.searchable_text());
            total_len += tokens.len();
            let mut freqs: HashMap<String, u32> = HashMap::new();
            for token in &tokens {
                *freqs.entry(token.clone()).or_insert(0) += 1;
            }
            for term in freqs.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            doc_lengths.insert(record.id.clone(), tokens.len());
            term_freqs.insert(record.id.clone(), freqs);
        }

        let n_docs = records.len();
        let avg_doc_len = if n_docs == 0 { 0.0 } else { total_len as f64 / n_docs as f64 };

        Self {
            term_freqs,
            doc_lengths,
            doc_freq,
            n_docs,
            avg_doc_len,
        }
    }

    /// Inverse document frequency for `term`, using the BM25+ variant that
    /// stays non-negative for terms present in most documents.
    fn idf(&self, term: &str) -> f64 {
        let n = self.n_docs as f64;
        let df = self.doc_freq.get(term).copied().unwrap_or(0) as f64;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// Scores every indexed document against `query_tokens`, returning raw
    /// BM25 scores (higher is more relevant) for documents with at least one
    /// matching term, restricted to `within` when provided.
    #[must_use]
    pub fn score(
        &self,
        query_tokens: &[String],
        within: Option<&[DecisionId]>,
        limit: usize,
    ) -> Vec<(DecisionId, f64)> {
        let candidates: Box<dyn Iterator<Item = &DecisionId>> = match within {
            Some(ids) => Box::new(ids.iter()),
            None => Box::new(self.term_freqs.keys()),
        };
        let mut scored: Vec<(DecisionId, f64)> = candidates
            .filter_map(|id| {
                let freqs = self.term_freqs.get(id)?;
                let doc_len = *self.doc_lengths.get(id)? as f64;
                let score = self.score_against(freqs, doc_len, query_tokens);
                (score > 0.0).then_some((id.clone(), score))
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(limit);
        scored
    }

    /// Scores arbitrary `text` (not necessarily indexed) against
    /// `query_tokens`, reusing this index's global idf/avg-length statistics.
    /// Used for bridge-side-directional re-scoring (§4.2) where the document
    /// text searched is a side of the bridge rather than the full indexed
    /// searchable text.
    #[must_use]
    pub fn score_text(&self, text: &str, query_tokens: &[String]) -> f64 {
        let tokens = tokenize(text);
        let doc_len = tokens.len() as f64;
        let mut freqs: HashMap<String, u32> = HashMap::new();
        for token in &tokens {
            *freqs.entry(token.clone()).or_insert(0) += 1;
        }
        self.score_against(&freqs, doc_len, query_tokens)
    }

    fn score_against(
        &self,
        freqs: &HashMap<String, u32>,
        doc_len: f64,
        query_tokens: &[String],
    ) -> f64 {
        if self.avg_doc_len <= 0.0 {
            return 0.0;
        }
        query_tokens
            .iter()
            .map(|term| {
                let Some(&freq) = freqs.get(term) else {
                    return 0.0;
                };
                let freq = f64::from(freq);
                let idf = self.idf(term);
                let denom = freq + K1 * (1.0 - B + B * (doc_len / self.avg_doc_len));
                idf * (freq * (K1 + 1.0)) / denom
            })
            .sum()
    }

    /// Number of documents in this snapshot.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.n_docs
    }

    /// Whether this snapshot has no documents.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.n_docs == 0
    }
}

/// A [`Bm25Index`] snapshot with the staleness/rebuild policy from §4.3.
///
/// # Invariants
/// - Rebuilds publish the new index with a single reference swap; a reader
///   that already holds a clone of the old `Arc` keeps a fully consistent,
///   if stale, snapshot (§4.3, §5: "readers always see a consistent
///   snapshot").
pub struct CachedBm25Index {
    inner: RwLock<Arc<Bm25Index>>,
    built_at: RwLock<Instant>,
    last_count: RwLock<usize>,
    ttl: Duration,
}

impl CachedBm25Index {
    /// Builds an empty cache; the first [`Self::snapshot`] call with a
    /// nonzero `current_count` triggers the initial build.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Arc::new(Bm25Index::build(&[]))),
            built_at: RwLock::new(Instant::now()),
            // Deliberately distinct from any real store count so the first
            // `is_stale` check is always true regardless of cache age.
            last_count: RwLock::new(usize::MAX),
            ttl: CACHE_TTL,
        }
    }

    /// Returns true when the cached snapshot is stale given `current_count`
    /// (§4.3: cache age > 5 minutes, or store count changed since build).
    #[must_use]
    pub fn is_stale(&self, current_count: usize) -> bool {
        let age_stale = self
            .built_at
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .elapsed()
            > self.ttl;
        let count_stale =
            *self.last_count.read().unwrap_or_else(std::sync::PoisonError::into_inner)
                != current_count;
        age_stale || count_stale
    }

    /// Returns the current snapshot without checking staleness.
    #[must_use]
    pub fn current(&self) -> Arc<Bm25Index> {
        Arc::clone(&self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner))
    }

    /// Publishes `index` as the current snapshot, recording the build time
    /// and the store count it was built from.
    pub fn publish(&self, index: Bm25Index, current_count: usize) {
        *self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner) = Arc::new(index);
        *self.built_at.write().unwrap_or_else(std::sync::PoisonError::into_inner) = Instant::now();
        *self.last_count.write().unwrap_or_else(std::sync::PoisonError::into_inner) =
            current_count;
    }
}

impl Default for CachedBm25Index {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use decision_intel_core::AgentId;
    use decision_intel_core::Bridge;
    use decision_intel_core::BridgeMethod;
    use decision_intel_core::Category;
    use decision_intel_core::DecisionId;
    use decision_intel_core::DeliberationTrace;
    use decision_intel_core::ProjectContext;
    use decision_intel_core::Stakes;
    use decision_intel_core::Status;
    use decision_intel_core::Timestamp;

    use super::*;

    fn record(id: &str, decision: &str) -> DecisionRecord {
        DecisionRecord {
            id: DecisionId::parse(id).expect("valid id"),
            created_at: Timestamp::now(),
            updated_at: Timestamp::now(),
            reviewed_at: None,
            recorded_by: AgentId::new("agent-1"),
            decision: decision.to_string(),
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
    fn scores_documents_containing_query_terms_higher() {
        let records = vec![
            record("00000001", "adopt exponential backoff for retries"),
            record("00000002", "use a linear queue for job scheduling"),
        ];
        let index = Bm25Index::build(&records);
        let results = index.score(&tokenize("retries backoff"), None, 10);
        assert_eq!(results[0].0.as_str(), "00000001");
    }

    #[test]
    fn documents_with_no_matching_terms_are_excluded() {
        let records = vec![record("00000001", "adopt exponential backoff")];
        let index = Bm25Index::build(&records);
        let results = index.score(&tokenize("unrelated vocabulary"), None, 10);
        assert!(results.is_empty());
    }

    #[test]
    fn cached_index_reports_stale_when_count_changes() {
        let cache = CachedBm25Index::new();
        assert!(cache.is_stale(0));
        cache.publish(Bm25Index::build(&[]), 0);
        assert!(!cache.is_stale(0));
        assert!(cache.is_stale(1));
    }
}
