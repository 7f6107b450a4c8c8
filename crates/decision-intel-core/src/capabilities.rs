// decision-intel-core/src/capabilities.rs
// ============================================================================
// Module: Capability Interfaces
// Description: Backend-agnostic interfaces for embedding generation and
//              vector storage (§6).
// Purpose: Let the retrieval engine and guardrail engine depend on a
//          capability contract instead of a concrete backend.
// Dependencies: async-trait, serde
// ============================================================================

//! ## Overview
//! The embedding provider and vector store are explicitly out of scope for
//! this specification (§1); this module defines only the capability
//! contracts consumed from them (§6). Production adapters live in
//! `decision-intel-providers`; test doubles live alongside each consuming
//! crate's test modules.

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Embedding Provider
// ============================================================================

/// Errors raised by an [`EmbeddingProvider`].
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// The provider is unreachable or returned a transport-level failure.
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),
    /// The input text exceeded the provider's `max_length`.
    #[error("input exceeds max_length {max_length}: {actual} chars")]
    TooLong {
        /// Provider's configured maximum.
        max_length: usize,
        /// Actual input length.
        actual: usize,
    },
}

/// A capability for turning text into a fixed-dimension embedding vector
/// (§6).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embeds `text` into a fixed-dimension vector.
    ///
    /// # Errors
    ///
    /// Returns [`EmbeddingError`] when the provider is unavailable or the
    /// input is too long.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// The fixed dimensionality of vectors this provider returns.
    fn dimensions(&self) -> usize;

    /// A human-readable model identifier, surfaced in diagnostics.
    fn model_name(&self) -> &str;

    /// The maximum input length, in characters, this provider accepts.
    fn max_length(&self) -> usize;
}

// ============================================================================
// SECTION: Vector Store
// ============================================================================

/// Errors raised by a [`VectorStore`].
#[derive(Debug, Error)]
pub enum VectorStoreError {
    /// The backend is unreachable.
    #[error("vector store unavailable: {0}")]
    Unavailable(String),
    /// The requested collection does not exist.
    #[error("collection not found: {0}")]
    CollectionNotFound(String),
    /// The backend reported an internal error.
    #[error("vector store error: {0}")]
    Internal(String),
}

/// A metadata filter clause accepted by [`VectorStore::query`] (§6).
///
/// Supports the operators named in the specification: `$gte`, `$lte`,
/// `$in`, `$contains`, `$or`, `$and`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Where {
    /// Field value `>=` the given number.
    Gte(String, f64),
    /// Field value `<=` the given number.
    Lte(String, f64),
    /// Field value is one of the given strings.
    In(String, Vec<String>),
    /// Field value contains the given substring.
    Contains(String, String),
    /// Logical OR of nested clauses.
    Or(Vec<Where>),
    /// Logical AND of nested clauses.
    And(Vec<Where>),
}

/// A single vector-store match (§6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    /// Identifier of the matched document (a [`crate::ids::DecisionId`]
    /// in string form).
    pub id: String,
    /// Distance reported by the backend (lower = more similar).
    pub distance: f64,
    /// Opaque metadata stored alongside the vector.
    pub meta: serde_json::Value,
}

/// A capability for upserting and querying embedding vectors (§6).
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Prepares the backend (creates collections, etc.) for use.
    ///
    /// # Errors
    ///
    /// Returns [`VectorStoreError`] when initialization fails.
    async fn initialize(&self) -> Result<(), VectorStoreError>;

    /// Upserts a single document's vector and metadata.
    ///
    /// # Errors
    ///
    /// Returns [`VectorStoreError`] when the write fails.
    async fn upsert(
        &self,
        id: &str,
        doc: &str,
        vector: &[f32],
        meta: serde_json::Value,
    ) -> Result<(), VectorStoreError>;

    /// Returns the `n` nearest matches to `vector`, optionally filtered by
    /// `where_clause`.
    ///
    /// # Errors
    ///
    /// Returns [`VectorStoreError`] when the backend is unreachable or the
    /// query otherwise fails.
    async fn query(
        &self,
        vector: &[f32],
        n: usize,
        where_clause: Option<&Where>,
    ) -> Result<Vec<VectorMatch>, VectorStoreError>;

    /// Deletes the given document IDs.
    ///
    /// # Errors
    ///
    /// Returns [`VectorStoreError`] when the delete fails.
    async fn delete(&self, ids: &[String]) -> Result<(), VectorStoreError>;

    /// Returns the number of documents currently stored.
    ///
    /// # Errors
    ///
    /// Returns [`VectorStoreError`] when the count cannot be determined.
    async fn count(&self) -> Result<usize, VectorStoreError>;

    /// Wipes all documents, used by `reindex` (§6, §9).
    ///
    /// # Errors
    ///
    /// Returns [`VectorStoreError`] when the reset fails.
    async fn reset(&self) -> Result<(), VectorStoreError>;

    /// Returns a backend-assigned identifier for the active collection.
    fn get_collection_id(&self) -> String;
}
