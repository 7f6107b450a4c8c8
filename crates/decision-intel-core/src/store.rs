// decision-intel-core/src/store.rs
// ============================================================================
// Module: Decision Store Interface
// Description: The backend-agnostic contract for the decision store (§4.1).
// Purpose: Let the retrieval engine, guardrail engine, calibration service,
//          and dispatcher depend on a single storage contract.
// Dependencies: crate::{filter, ids, record}, thiserror
// ============================================================================

//! ## Overview
//! `Store` is implemented by `decision-intel-store-sqlite::SqliteStore` (and,
//! in tests, by an in-memory double). Persistence choice is implementation-
//! private (§4.1); only durability, crash-safety, and idempotent reindex are
//! guaranteed externally.

use thiserror::Error;

use crate::filter::DecisionFilter;
use crate::filter::Page;
use crate::filter::PageRequest;
use crate::ids::DecisionId;
use crate::record::DecisionRecord;

/// Result of a `put` call (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// A new record was created.
    Created,
    /// An existing record was updated.
    Updated,
}

/// Errors raised by a [`Store`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record exists with the given ID.
    #[error("decision not found: {0}")]
    NotFound(DecisionId),
    /// The caller attempted to mutate a field that is immutable once a
    /// record is `reviewed` (§3.1, §4.1).
    #[error("field is immutable on a reviewed decision: {0}")]
    ImmutableField(String),
    /// The underlying storage medium reported a failure.
    #[error("decision store io error: {0}")]
    Io(String),
    /// The record failed a structural invariant check (§3.1).
    #[error("decision record invariant violated: {0}")]
    InvalidRecord(String),
}

/// The decision store contract (§4.1).
pub trait Store: Send + Sync {
    /// Inserts or updates a record.
    ///
    /// Idempotent by ID. For a record in `pending`, an update replaces the
    /// whole record. For a record in `reviewed`, only outcome- and
    /// graph-related fields may change; anything else returns
    /// [`StoreError::ImmutableField`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on I/O failure, invariant violation, or an
    /// attempt to mutate an immutable field.
    fn put(&self, record: DecisionRecord) -> Result<PutOutcome, StoreError>;

    /// Fetches a record by ID.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no such record exists.
    fn get(&self, id: &DecisionId) -> Result<DecisionRecord, StoreError>;

    /// Lists records matching `filter`, paginated by `page`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on I/O failure.
    fn list(
        &self,
        filter: &DecisionFilter,
        page: PageRequest,
    ) -> Result<Page<DecisionRecord>, StoreError>;

    /// Destructively wipes every record (§4.1). Used to support test
    /// fixtures and full-reindex rebuilds; the dispatcher's `reindex`
    /// operation (§6) additionally rebuilds the keyword index and vector
    /// backend from whatever records survive this call.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on I/O failure.
    fn reset(&self) -> Result<(), StoreError>;
}
