// decision-intel-guardrails/src/loader.rs
// ============================================================================
// Module: Guardrail Loading & TTL Cache
// Description: Scans a guardrail source and caches the result for 5 minutes
//              (§4.6).
// Purpose: Decouple "where guardrail documents come from" from the engine,
//          and keep the previous snapshot in force if a refresh fails
//          (§7: "Guardrail loading errors during periodic refresh keep the
//          previous snapshot in force and log a degradation event").
// Dependencies: decision-intel-core, std::sync
// ============================================================================

use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use thiserror::Error;

use crate::guardrail::Guardrail;

/// Default cache TTL for loaded guardrails (§4.3, §4.6: "cached for 5
/// minutes").
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Errors raised while loading guardrail documents.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The underlying source failed (file I/O, network, parse error).
    #[error("guardrail source error: {0}")]
    Source(String),
}

/// A source of guardrail documents (a config directory, a remote registry,
/// or — in tests — a static list).
pub trait GuardrailSource: Send + Sync {
    /// Loads the full current set of guardrails.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`] when the source cannot be read or parsed.
    fn load(&self) -> Result<Vec<Guardrail>, LoadError>;
}

/// A source backed by an in-memory list, used by tests and by callers that
/// manage guardrail documents themselves.
pub struct StaticGuardrailSource {
    guardrails: Vec<Guardrail>,
}

impl StaticGuardrailSource {
    /// Creates a source that always returns `guardrails`.
    #[must_use]
    pub fn new(guardrails: Vec<Guardrail>) -> Self {
        Self { guardrails }
    }
}

impl GuardrailSource for StaticGuardrailSource {
    fn load(&self) -> Result<Vec<Guardrail>, LoadError> {
        Ok(self.guardrails.clone())
    }
}

struct Snapshot {
    guardrails: Vec<Guardrail>,
    loaded_at: Instant,
}

/// A TTL-cached guardrail loader (§4.6).
///
/// Invalidation is explicit (via [`CachedGuardrailLoader::invalidate`]) or
/// TTL-driven. On a failed refresh the previous snapshot, if any, remains
/// in force and the failure is surfaced through the return value so the
/// caller can log a degradation event (§7) without losing availability.
pub struct CachedGuardrailLoader {
    source: Box<dyn GuardrailSource>,
    ttl: Duration,
    snapshot: Mutex<Option<Snapshot>>,
}

/// Outcome of a [`CachedGuardrailLoader::get`] call.
pub struct LoadOutcome {
    /// The guardrails now in force (fresh, or the stale previous snapshot).
    pub guardrails: Vec<Guardrail>,
    /// Set when the cache was refreshed this call but the refresh failed
    /// and a stale snapshot was kept in force.
    pub degraded: Option<LoadError>,
}

impl CachedGuardrailLoader {
    /// Builds a loader with the default TTL.
    #[must_use]
    pub fn new(source: impl GuardrailSource + 'static) -> Self {
        Self::with_ttl(source, DEFAULT_CACHE_TTL)
    }

    /// Builds a loader with an explicit TTL.
    #[must_use]
    pub fn with_ttl(source: impl GuardrailSource + 'static, ttl: Duration) -> Self {
        Self {
            source: Box::new(source),
            ttl,
            snapshot: Mutex::new(None),
        }
    }

    /// Forces the next [`Self::get`] call to refresh regardless of TTL.
    pub fn invalidate(&self) {
        if let Ok(mut guard) = self.snapshot.lock() {
            *guard = None;
        }
    }

    /// Returns the currently-cached guardrails, refreshing first if the
    /// cache is empty or has aged past the TTL.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`] only when there is no previous snapshot to
    /// fall back on (i.e. on the very first load).
    pub fn get(&self) -> Result<LoadOutcome, LoadError> {
        let mut guard = self
            .snapshot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let needs_refresh = match guard.as_ref() {
            Some(snapshot) => snapshot.loaded_at.elapsed() >= self.ttl,
            None => true,
        };

        if !needs_refresh {
            let guardrails = guard
                .as_ref()
                .map(|snapshot| snapshot.guardrails.clone())
                .unwrap_or_default();
            return Ok(LoadOutcome {
                guardrails,
                degraded: None,
            });
        }

        match self.source.load() {
            Ok(fresh) => {
                *guard = Some(Snapshot {
                    guardrails: fresh.clone(),
                    loaded_at: Instant::now(),
                });
                Ok(LoadOutcome {
                    guardrails: fresh,
                    degraded: None,
                })
            }
            Err(err) => match guard.as_ref() {
                Some(stale) => Ok(LoadOutcome {
                    guardrails: stale.guardrails.clone(),
                    degraded: Some(err),
                }),
                None => Err(err),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::condition::Condition;
    use crate::condition::FieldCondition;
    use crate::condition::Operator;
    use crate::guardrail::Action;

    fn sample_guardrail() -> Guardrail {
        Guardrail {
            id: "g1".to_string(),
            description: "sample".to_string(),
            scope: None,
            conditions: vec![],
            requirements: vec![crate::guardrail::Requirement {
                description: "stakes present".to_string(),
                check: Condition::Field(FieldCondition {
                    field: "stakes".to_string(),
                    operator: Operator::Ne,
                    value: serde_json::Value::Null,
                }),
            }],
            action: Action::Block,
            message: "stakes required".to_string(),
        }
    }

    struct CountingSource {
        calls: std::sync::Arc<AtomicUsize>,
        fail_after: Option<usize>,
    }

    impl GuardrailSource for CountingSource {
        fn load(&self) -> Result<Vec<Guardrail>, LoadError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_after == Some(call) {
                return Err(LoadError::Source("boom".to_string()));
            }
            Ok(vec![sample_guardrail()])
        }
    }

    #[test]
    fn caches_within_ttl() {
        let calls = std::sync::Arc::new(AtomicUsize::new(0));
        let loader = CachedGuardrailLoader::with_ttl(
            CountingSource {
                calls: calls.clone(),
                fail_after: None,
            },
            Duration::from_secs(300),
        );
        loader.get().expect("first load");
        loader.get().expect("second load");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn degrades_to_stale_snapshot_on_refresh_failure() {
        let calls = std::sync::Arc::new(AtomicUsize::new(0));
        let loader = CachedGuardrailLoader::with_ttl(
            CountingSource {
                calls: calls.clone(),
                fail_after: Some(1),
            },
            Duration::from_millis(0),
        );
        loader.get().expect("first load succeeds");
        let outcome = loader.get().expect("second load falls back to stale");
        assert!(outcome.degraded.is_some());
        assert_eq!(outcome.guardrails.len(), 1);
    }
}
