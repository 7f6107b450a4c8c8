// decision-intel-providers/src/lib.rs
// ============================================================================
// Module: Decision Intelligence Providers
// Description: Built-in EmbeddingProvider and VectorStore adapters.
// Purpose: Provide a usable HTTP-backed embedding provider and an in-memory
//          vector store, so the service is runnable without a bespoke
//          backend integration (§6).
// Dependencies: decision-intel-core, reqwest, tokio
// ============================================================================

//! ## Overview
//! Embedding generation and vector storage are capability interfaces, not
//! implementations the core crates own (§1, §6). This crate ships two
//! concrete adapters: [`HttpEmbeddingProvider`], which calls an
//! embedding service over HTTP with the same host-policy posture as other
//! outbound network calls in this workspace, and [`InMemoryVectorStore`], a
//! brute-force nearest-neighbour store suitable for single-instance
//! deployments and tests.

pub mod http_embedding;
pub mod memory_vector_store;

pub use http_embedding::HttpEmbeddingProvider;
pub use http_embedding::HttpEmbeddingProviderConfig;
pub use http_embedding::HttpEmbeddingProviderError;
pub use memory_vector_store::InMemoryVectorStore;
