// decision-intel-core/src/lib.rs
// ============================================================================
// Module: Decision Intelligence Core Library
// Description: Public API surface for the decision intelligence core.
// Purpose: Expose the decision record model, store contract, and capability
//          interfaces shared by every other crate in the workspace.
// Dependencies: crate::{ids, time, hashing, record, filter, capabilities, store, errors}
// ============================================================================

//! ## Overview
//! `decision-intel-core` provides the durable data model for the decision
//! store (§3.1), the filter grammar used for listing and search, and the
//! capability traits (`EmbeddingProvider`, `VectorStore`) that the retrieval
//! engine and other components consume without depending on a concrete
//! backend.

pub mod capabilities;
pub mod errors;
pub mod filter;
pub mod hashing;
pub mod ids;
pub mod record;
pub mod store;
pub mod time;

pub use capabilities::EmbeddingError;
pub use capabilities::EmbeddingProvider;
pub use capabilities::VectorMatch;
pub use capabilities::VectorStore;
pub use capabilities::VectorStoreError;
pub use capabilities::Where;
pub use errors::ErrorKind;
pub use errors::ServiceError;
pub use filter::DateRange;
pub use filter::DecisionFilter;
pub use filter::Page;
pub use filter::PageRequest;
pub use hashing::derive_decision_id;
pub use ids::AgentId;
pub use ids::DecisionId;
pub use ids::InputId;
pub use record::Bridge;
pub use record::BridgeMethod;
pub use record::Category;
pub use record::DecisionRecord;
pub use record::DeliberationInput;
pub use record::DeliberationStep;
pub use record::DeliberationTrace;
pub use record::Outcome;
pub use record::ProjectContext;
pub use record::Reason;
pub use record::ReasonType;
pub use record::RelatedEdge;
pub use record::Stakes;
pub use record::Status;
pub use store::PutOutcome;
pub use store::Store;
pub use store::StoreError;
pub use time::Timestamp;
