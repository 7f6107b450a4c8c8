// decision-intel-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Decision Store
// Description: Durable Store implementation backed by SQLite WAL (§4.1).
// Purpose: Persist decision records with canonical-JSON hash verification and
//          enforce reviewed-record immutability.
// Dependencies: decision-intel-core, rusqlite, serde_jcs, serde_json, sha2,
//               thiserror
// ============================================================================

//! ## Overview
//! [`SqliteStore`] is the default [`Store`] backend. Each record is persisted
//! twice: once as a set of indexed columns used to pre-filter `list` queries,
//! and once as a canonical JSON blob plus a SHA-256 hash used to detect
//! corruption on load. Persistence choice is implementation-private (§4.1);
//! callers only get durability, crash-safety, and idempotent reindex.
//!
//! Free-text `search` in [`DecisionFilter`] is delegated to the keyword
//! index (§4.1, §4.3) and is ignored here; everything else in the filter
//! grammar is applied at the SQL layer or, for `tags`, after deserialization.

use std::path::Path;
use std::sync::Mutex;

use decision_intel_core::Category;
use decision_intel_core::DecisionFilter;
use decision_intel_core::DecisionId;
use decision_intel_core::DecisionRecord;
use decision_intel_core::Page;
use decision_intel_core::PageRequest;
use decision_intel_core::PutOutcome;
use decision_intel_core::Stakes;
use decision_intel_core::Status;
use decision_intel_core::Store;
use decision_intel_core::StoreError;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

/// `SQLite` schema version. Bump and add a migration branch in
/// [`initialize_schema`] when the table shape changes.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout for lock contention between WAL readers/writers.
const DEFAULT_BUSY_TIMEOUT_MS: u32 = 5_000;

/// Errors raised while opening or operating the `SQLite` store.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// The database file or its parent directory could not be prepared.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// The underlying `SQLite` engine reported a failure.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// A stored record failed its hash check on load.
    #[error("sqlite store corruption: {0}")]
    Corrupt(String),
    /// The stored schema version does not match what this build expects.
    #[error("sqlite store version mismatch: found {found}, expected {expected}")]
    VersionMismatch {
        /// Schema version found in the database.
        found: i64,
        /// Schema version this build expects.
        expected: i64,
    },
    /// A record's shape is invalid independent of storage concerns.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) => Self::Io(message),
            SqliteStoreError::Corrupt(message) => Self::Io(format!("corrupt record: {message}")),
            SqliteStoreError::VersionMismatch { found, expected } => Self::Io(format!(
                "schema version mismatch: found {found}, expected {expected}"
            )),
            SqliteStoreError::Invalid(message) => Self::InvalidRecord(message),
        }
    }
}

/// `SQLite`-backed decision store with WAL support (§4.1).
///
/// # Invariants
/// - All connection access is serialized through a mutex; `SQLite`'s own
///   locking still applies underneath but this avoids cross-thread misuse of
///   a single `rusqlite::Connection`.
/// - Loads verify the stored hash before deserializing the record body.
pub struct SqliteStore {
    connection: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (creating if absent) a `SQLite`-backed store at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] if the database cannot be opened,
    /// initialized, or its schema version does not match this build.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SqliteStoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|err| SqliteStoreError::Io(err.to_string()))?;
            }
        }
        let mut connection =
            Connection::open(path).map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        initialize_schema(&mut connection)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    /// Opens an in-memory store, used by tests and short-lived processes.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] if the schema cannot be initialized.
    pub fn open_in_memory() -> Result<Self, SqliteStoreError> {
        let mut connection =
            Connection::open_in_memory().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        initialize_schema(&mut connection)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, SqliteStoreError> {
        self.connection
            .lock()
            .map_err(|_| SqliteStoreError::Db("store mutex poisoned".to_string()))
    }
}

/// Initializes pragmas and the schema, verifying the stored schema version
/// matches [`SCHEMA_VERSION`] on a pre-existing database.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    connection
        .pragma_update(None, "journal_mode", "wal")
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .pragma_update(None, "synchronous", "full")
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .busy_timeout(std::time::Duration::from_millis(u64::from(DEFAULT_BUSY_TIMEOUT_MS)))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;

    let tx = connection.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_meta (version INTEGER NOT NULL);
         CREATE TABLE IF NOT EXISTS decisions (
             id TEXT PRIMARY KEY,
             category TEXT NOT NULL,
             stakes TEXT NOT NULL,
             status TEXT NOT NULL,
             agent TEXT NOT NULL,
             project TEXT,
             created_at_unix INTEGER NOT NULL,
             has_outcome INTEGER NOT NULL,
             record_hash TEXT NOT NULL,
             record_json TEXT NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_decisions_category ON decisions(category);
         CREATE INDEX IF NOT EXISTS idx_decisions_stakes ON decisions(stakes);
         CREATE INDEX IF NOT EXISTS idx_decisions_status ON decisions(status);
         CREATE INDEX IF NOT EXISTS idx_decisions_agent ON decisions(agent);
         CREATE INDEX IF NOT EXISTS idx_decisions_project ON decisions(project);
         CREATE INDEX IF NOT EXISTS idx_decisions_created_at ON decisions(created_at_unix);",
    )
    .map_err(|err| SqliteStoreError::Db(err.to_string()))?;

    let stored_version: Option<i64> =
        tx.query_row("SELECT version FROM schema_meta LIMIT 1", [], |row| row.get(0))
            .optional()
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    match stored_version {
        None => {
            tx.execute("INSERT INTO schema_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        }
        Some(found) if found != SCHEMA_VERSION => {
            return Err(SqliteStoreError::VersionMismatch {
                found,
                expected: SCHEMA_VERSION,
            });
        }
        Some(_) => {}
    }
    tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(())
}

/// Canonicalizes `record` and hashes the result, for storage and corruption
/// detection (mirrors the content-addressing scheme used for decision IDs).
fn canonicalize_and_hash(record: &DecisionRecord) -> Result<(Vec<u8>, String), SqliteStoreError> {
    let json = serde_jcs::to_vec(record)
        .map_err(|err| SqliteStoreError::Invalid(format!("failed to canonicalize record: {err}")))?;
    let mut hasher = Sha256::new();
    hasher.update(&json);
    let hash = hex_encode(&hasher.finalize());
    Ok((json, hash))
}

fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

const fn category_str(category: Category) -> &'static str {
    match category {
        Category::Architecture => "architecture",
        Category::Process => "process",
        Category::Integration => "integration",
        Category::Tooling => "tooling",
        Category::Security => "security",
    }
}

const fn stakes_str(stakes: Stakes) -> &'static str {
    match stakes {
        Stakes::Low => "low",
        Stakes::Medium => "medium",
        Stakes::High => "high",
        Stakes::Critical => "critical",
    }
}

const fn status_str(status: Status) -> &'static str {
    match status {
        Status::Pending => "pending",
        Status::Reviewed => "reviewed",
        Status::Abandoned => "abandoned",
    }
}

/// Fields that become immutable once a record is `reviewed` (§3.1, §4.1):
/// the core assertion, its classification, stated confidence, and reasons.
/// Outcome-related fields and graph edges (`related`) may still change.
fn assertion_fields_changed(existing: &DecisionRecord, incoming: &DecisionRecord) -> Option<&'static str> {
    if existing.decision != incoming.decision {
        return Some("decision");
    }
    if existing.category != incoming.category {
        return Some("category");
    }
    if existing.stakes != incoming.stakes {
        return Some("stakes");
    }
    if (existing.confidence - incoming.confidence).abs() > f64::EPSILON {
        return Some("confidence");
    }
    if existing.reasons != incoming.reasons {
        return Some("reasons");
    }
    None
}

impl Store for SqliteStore {
    fn put(&self, record: DecisionRecord) -> Result<PutOutcome, StoreError> {
        let connection = self.lock()?;
        let existing: Option<String> = connection
            .query_row(
                "SELECT record_json FROM decisions WHERE id = ?1",
                params![record.id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;

        let outcome = if let Some(existing_json) = existing {
            let existing_record: DecisionRecord = serde_json::from_str(&existing_json)
                .map_err(|err| SqliteStoreError::Corrupt(err.to_string()))?;
            if matches!(existing_record.status, Status::Reviewed) {
                if let Some(field) = assertion_fields_changed(&existing_record, &record) {
                    return Err(StoreError::ImmutableField(field.to_string()));
                }
            }
            PutOutcome::Updated
        } else {
            PutOutcome::Created
        };

        let (_json, hash) = canonicalize_and_hash(&record)?;
        let record_json = serde_json::to_string(&record)
            .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
        let created_at_unix = record.created_at.as_offset_date_time().unix_timestamp();
        connection
            .execute(
                "INSERT INTO decisions
                     (id, category, stakes, status, agent, project, created_at_unix,
                      has_outcome, record_hash, record_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(id) DO UPDATE SET
                     category = excluded.category,
                     stakes = excluded.stakes,
                     status = excluded.status,
                     agent = excluded.agent,
                     project = excluded.project,
                     created_at_unix = excluded.created_at_unix,
                     has_outcome = excluded.has_outcome,
                     record_hash = excluded.record_hash,
                     record_json = excluded.record_json",
                params![
                    record.id.as_str(),
                    category_str(record.category),
                    stakes_str(record.stakes),
                    status_str(record.status),
                    record.recorded_by.as_str(),
                    record.project_context.project,
                    created_at_unix,
                    i64::from(record.outcome.is_some()),
                    hash,
                    record_json,
                ],
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        Ok(outcome)
    }

    fn get(&self, id: &DecisionId) -> Result<DecisionRecord, StoreError> {
        let connection = self.lock()?;
        let row: Option<(String, String)> = connection
            .query_row(
                "SELECT record_json, record_hash FROM decisions WHERE id = ?1",
                params![id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let Some((record_json, stored_hash)) = row else {
            return Err(StoreError::NotFound(id.clone()));
        };
        let record: DecisionRecord = serde_json::from_str(&record_json)
            .map_err(|err| SqliteStoreError::Corrupt(err.to_string()))?;
        let (_json, recomputed_hash) = canonicalize_and_hash(&record)?;
        if recomputed_hash != stored_hash {
            return Err(SqliteStoreError::Corrupt(format!(
                "hash mismatch for decision {}",
                id.as_str()
            ))
            .into());
        }
        Ok(record)
    }

    fn list(
        &self,
        filter: &DecisionFilter,
        page: PageRequest,
    ) -> Result<Page<DecisionRecord>, StoreError> {
        let page = page.clamped();
        let connection = self.lock()?;
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(category) = filter.category {
            clauses.push(format!("category = ?{}", values.len() + 1));
            values.push(Box::new(category_str(category).to_string()));
        }
        if let Some(stakes) = filter.stakes {
            clauses.push(format!("stakes = ?{}", values.len() + 1));
            values.push(Box::new(stakes_str(stakes).to_string()));
        }
        if let Some(status) = filter.status {
            clauses.push(format!("status = ?{}", values.len() + 1));
            values.push(Box::new(status_str(status).to_string()));
        }
        if let Some(agent) = &filter.agent {
            clauses.push(format!("agent = ?{}", values.len() + 1));
            values.push(Box::new(agent.as_str().to_string()));
        }
        if let Some(project) = &filter.project {
            clauses.push(format!("project = ?{}", values.len() + 1));
            values.push(Box::new(project.clone()));
        }
        if let Some(has_outcome) = filter.has_outcome {
            clauses.push(format!("has_outcome = ?{}", values.len() + 1));
            values.push(Box::new(i64::from(has_outcome)));
        }
        if let Some(from) = filter.date_range.from {
            clauses.push(format!("created_at_unix >= ?{}", values.len() + 1));
            values.push(Box::new(from.as_offset_date_time().unix_timestamp()));
        }
        if let Some(to) = filter.date_range.to {
            clauses.push(format!("created_at_unix <= ?{}", values.len() + 1));
            values.push(Box::new(to.as_offset_date_time().unix_timestamp()));
        }

        let where_clause =
            if clauses.is_empty() { String::new() } else { format!("WHERE {}", clauses.join(" AND ")) };
        let sql = format!(
            "SELECT record_json FROM decisions {where_clause} ORDER BY created_at_unix DESC"
        );
        let mut stmt = connection.prepare(&sql).map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(AsRef::as_ref).collect();
        let rows = stmt
            .query_map(param_refs.as_slice(), |row| row.get::<_, String>(0))
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;

        let mut matched = Vec::new();
        for row in rows {
            let record_json = row.map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            let record: DecisionRecord = serde_json::from_str(&record_json)
                .map_err(|err| SqliteStoreError::Corrupt(err.to_string()))?;
            if !filter.tags.is_empty() && !filter.tags.iter().any(|tag| record.tags.contains(tag)) {
                continue;
            }
            matched.push(record);
        }

        let total = matched.len();
        let items = matched.into_iter().skip(page.offset).take(page.limit).collect();
        Ok(Page {
            items,
            total,
            offset: page.offset,
        })
    }

    fn reset(&self) -> Result<(), StoreError> {
        let connection = self.lock()?;
        connection
            .execute("DELETE FROM decisions", [])
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use decision_intel_core::AgentId as AgentIdType;
    use decision_intel_core::Bridge;
    use decision_intel_core::BridgeMethod;
    use decision_intel_core::DeliberationTrace;
    use decision_intel_core::Outcome;
    use decision_intel_core::ProjectContext;
    use decision_intel_core::Timestamp;

    use super::*;

    fn sample(id: &str, decision: &str, status: Status) -> DecisionRecord {
        DecisionRecord {
            id: DecisionId::parse(id).expect("valid id"),
            created_at: Timestamp::now(),
            updated_at: Timestamp::now(),
            reviewed_at: matches!(status, Status::Reviewed).then(Timestamp::now),
            recorded_by: AgentIdType::new("agent-1"),
            decision: decision.to_string(),
            confidence: 0.8,
            category: Category::Architecture,
            stakes: Stakes::Medium,
            context: None,
            status,
            outcome: matches!(status, Status::Reviewed).then_some(Outcome::Success),
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
    fn put_then_get_round_trips() {
        let store = SqliteStore::open_in_memory().expect("open");
        let record = sample("0a1b2c3d", "adopt retries", Status::Pending);
        assert_eq!(store.put(record.clone()).expect("put"), PutOutcome::Created);
        let fetched = store.get(&record.id).expect("get");
        assert_eq!(fetched, record);
    }

    #[test]
    fn put_is_idempotent_by_id() {
        let store = SqliteStore::open_in_memory().expect("open");
        let record = sample("0a1b2c3d", "adopt retries", Status::Pending);
        assert_eq!(store.put(record.clone()).expect("put"), PutOutcome::Created);
        assert_eq!(store.put(record).expect("put"), PutOutcome::Updated);
    }

    #[test]
    fn reviewed_record_rejects_assertion_mutation() {
        let store = SqliteStore::open_in_memory().expect("open");
        let record = sample("0a1b2c3d", "adopt retries", Status::Reviewed);
        store.put(record.clone()).expect("put");
        let mut mutated = record;
        mutated.decision = "rewritten".to_string();
        let err = store.put(mutated).expect_err("should reject");
        assert!(matches!(err, StoreError::ImmutableField(field) if field == "decision"));
    }

    #[test]
    fn get_missing_id_returns_not_found() {
        let store = SqliteStore::open_in_memory().expect("open");
        let id = DecisionId::parse("ffffffff").expect("valid id");
        let err = store.get(&id).expect_err("should be missing");
        assert!(matches!(err, StoreError::NotFound(missing) if missing == id));
    }

    #[test]
    fn list_filters_by_status_and_paginates() {
        let store = SqliteStore::open_in_memory().expect("open");
        store.put(sample("00000001", "a", Status::Pending)).expect("put");
        store.put(sample("00000002", "b", Status::Reviewed)).expect("put");
        store.put(sample("00000003", "c", Status::Reviewed)).expect("put");

        let filter = DecisionFilter {
            status: Some(Status::Reviewed),
            ..DecisionFilter::default()
        };
        let page = store
            .list(&filter, PageRequest { offset: 0, limit: 1 })
            .expect("list");
        assert_eq!(page.total, 2);
        assert_eq!(page.items.len(), 1);
    }

    #[test]
    fn reset_clears_all_records() {
        let store = SqliteStore::open_in_memory().expect("open");
        store.put(sample("00000001", "a", Status::Pending)).expect("put");
        store.reset().expect("reset");
        let page = store
            .list(&DecisionFilter::default(), PageRequest::default())
            .expect("list");
        assert_eq!(page.total, 0);
    }

    #[test]
    fn open_on_disk_persists_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("decisions.sqlite3");
        {
            let store = SqliteStore::open(&path).expect("open");
            store.put(sample("0a1b2c3d", "adopt retries", Status::Pending)).expect("put");
        }
        let reopened = SqliteStore::open(&path).expect("reopen");
        let id = DecisionId::parse("0a1b2c3d").expect("valid id");
        assert!(reopened.get(&id).is_ok());
    }
}
