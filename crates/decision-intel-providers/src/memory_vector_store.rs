// decision-intel-providers/src/memory_vector_store.rs
// ============================================================================
// Module: In-Memory Vector Store
// Description: Brute-force VectorStore adapter for single-instance
//              deployments and tests.
// Purpose: Give the retrieval and guardrail engines a usable vector backend
//          without requiring an external vector database (§6, §9).
// Dependencies: decision-intel-core, serde_json, std::sync
// ============================================================================

//! ## Overview
//! [`InMemoryVectorStore`] holds every vector in memory and scores queries
//! by squared Euclidean distance, scanning linearly. This is adequate for
//! the single-writer, single-instance deployment this specification assumes
//! (§1 Non-goals) and is the default backend when no external vector
//! database is configured.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use decision_intel_core::VectorMatch;
use decision_intel_core::VectorStore;
use decision_intel_core::VectorStoreError;
use decision_intel_core::Where;
use serde_json::Value;

struct Entry {
    vector: Vec<f32>,
    meta: Value,
}

/// A brute-force, process-local [`VectorStore`] (§6, §9).
pub struct InMemoryVectorStore {
    collection_id: String,
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryVectorStore {
    /// Creates an empty store identified by `collection_id`.
    #[must_use]
    pub fn new(collection_id: impl Into<String>) -> Self {
        Self {
            collection_id: collection_id.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn initialize(&self) -> Result<(), VectorStoreError> {
        Ok(())
    }

    async fn upsert(
        &self,
        id: &str,
        _doc: &str,
        vector: &[f32],
        meta: Value,
    ) -> Result<(), VectorStoreError> {
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;
        entries.insert(
            id.to_string(),
            Entry {
                vector: vector.to_vec(),
                meta,
            },
        );
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        n: usize,
        where_clause: Option<&Where>,
    ) -> Result<Vec<VectorMatch>, VectorStoreError> {
        let entries = self.entries.lock().map_err(|_| poisoned())?;
        let mut scored: Vec<VectorMatch> = entries
            .iter()
            .filter(|(_, entry)| match where_clause {
                Some(clause) => matches_where(&entry.meta, clause),
                None => true,
            })
            .map(|(id, entry)| VectorMatch {
                id: id.clone(),
                distance: squared_distance(vector, &entry.vector),
                meta: entry.meta.clone(),
            })
            .collect();
        scored.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        scored.truncate(n);
        Ok(scored)
    }

    async fn delete(&self, ids: &[String]) -> Result<(), VectorStoreError> {
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;
        for id in ids {
            entries.remove(id);
        }
        Ok(())
    }

    async fn count(&self) -> Result<usize, VectorStoreError> {
        let entries = self.entries.lock().map_err(|_| poisoned())?;
        Ok(entries.len())
    }

    async fn reset(&self) -> Result<(), VectorStoreError> {
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;
        entries.clear();
        Ok(())
    }

    fn get_collection_id(&self) -> String {
        self.collection_id.clone()
    }
}

fn poisoned() -> VectorStoreError {
    VectorStoreError::Internal("in-memory vector store lock poisoned".to_string())
}

fn squared_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| f64::from(x - y).powi(2))
        .sum()
}

fn matches_where(meta: &Value, clause: &Where) -> bool {
    match clause {
        Where::Gte(field, threshold) => meta_number(meta, field).is_some_and(|v| v >= *threshold),
        Where::Lte(field, threshold) => meta_number(meta, field).is_some_and(|v| v <= *threshold),
        Where::In(field, values) => {
            meta_string(meta, field).is_some_and(|v| values.iter().any(|candidate| candidate == v))
        }
        Where::Contains(field, needle) => {
            meta_string(meta, field).is_some_and(|v| v.contains(needle.as_str()))
        }
        Where::Or(clauses) => clauses.iter().any(|nested| matches_where(meta, nested)),
        Where::And(clauses) => clauses.iter().all(|nested| matches_where(meta, nested)),
    }
}

fn meta_number(meta: &Value, field: &str) -> Option<f64> {
    meta.as_object()?.get(field)?.as_f64()
}

fn meta_string<'a>(meta: &'a Value, field: &str) -> Option<&'a str> {
    meta.as_object()?.get(field)?.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn query_ranks_by_distance_ascending() {
        let store = InMemoryVectorStore::new("test");
        store.upsert("a", "doc-a", &[0.0, 0.0], json!({})).await.expect("upsert");
        store.upsert("b", "doc-b", &[1.0, 0.0], json!({})).await.expect("upsert");
        store.upsert("c", "doc-c", &[5.0, 0.0], json!({})).await.expect("upsert");

        let results = store.query(&[0.0, 0.0], 2, None).await.expect("query");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "a");
        assert_eq!(results[1].id, "b");
    }

    #[tokio::test]
    async fn query_filters_by_where_clause() {
        let store = InMemoryVectorStore::new("test");
        store
            .upsert("a", "doc-a", &[0.0, 0.0], json!({"outcome": "success"}))
            .await
            .expect("upsert");
        store
            .upsert("b", "doc-b", &[0.1, 0.0], json!({"outcome": "failure"}))
            .await
            .expect("upsert");

        let clause = Where::In("outcome".to_string(), vec!["success".to_string()]);
        let results = store.query(&[0.0, 0.0], 10, Some(&clause)).await.expect("query");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "a");
    }

    #[tokio::test]
    async fn delete_and_count_track_entries() {
        let store = InMemoryVectorStore::new("test");
        store.upsert("a", "doc-a", &[0.0], json!({})).await.expect("upsert");
        store.upsert("b", "doc-b", &[1.0], json!({})).await.expect("upsert");
        assert_eq!(store.count().await.expect("count"), 2);
        store.delete(&["a".to_string()]).await.expect("delete");
        assert_eq!(store.count().await.expect("count"), 1);
    }
}
