// decision-intel-retrieval/src/lib.rs
// ============================================================================
// Module: Decision Intelligence Retrieval
// Description: Public API surface for hybrid retrieval (§4.2), the BM25
//              keyword index (§4.3), and the bridge extraction heuristic
//              (§4.4).
// Purpose: Give the service crate a single dependency for "find decisions
//          relevant to this text".
// Dependencies: crate::{bm25, bridge_extractor, engine}
// ============================================================================

//! ## Overview
//! `decision-intel-retrieval` has no network or database dependencies of its
//! own: it consumes `decision_intel_core::Store`, `EmbeddingProvider`, and
//! `VectorStore` and combines them into one ranked result set.

mod bm25;
mod bridge_extractor;
mod engine;

pub use bm25::Bm25Index;
pub use bm25::CACHE_TTL;
pub use bm25::CachedBm25Index;
pub use bm25::tokenize;
pub use bridge_extractor::Extraction;
pub use bridge_extractor::extract;
pub use engine::HybridWeights;
pub use engine::RetrievalEngine;
pub use engine::RetrievalError;
pub use engine::RetrievalMode;
pub use engine::RetrievedDecision;
pub use engine::Scores;
