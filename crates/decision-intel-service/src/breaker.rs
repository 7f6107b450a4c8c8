// decision-intel-service/src/breaker.rs
// ============================================================================
// Module: Circuit Breaker Manager
// Description: Scoped failure-rate breakers with journal persistence
//              (§3.4, §4.7).
// Purpose: Block risky actions automatically once recent outcomes in a
//          scope turn bad, and recover without manual intervention.
// Dependencies: decision-intel-core, decision-intel-events, serde_json,
//               std::collections, std::fs, std::sync
// ============================================================================

//! ## Overview
//! A breaker's `scope` is one of `global`, `category:<cat>`, `stakes:<s>`,
//! `agent:<id>`, or `tag:<t>` (§3.4). Each scope keeps a sliding deque of
//! monotonic failure timestamps; the deque only ever holds timestamps within
//! the failure window, and its length never exceeds the trip threshold
//! (§3.4 invariants). State transitions follow §4.7's table exactly. Every
//! mutating transition is appended to a JSON-lines journal before it is
//! applied in memory, so a restart can replay history and recompute state
//! from persisted wall-clock times (§4.7: "persisted wall-clock times
//! compute elapsed cooldowns; runtime comparisons use the monotonic clock").

use std::collections::HashMap;
use std::collections::VecDeque;
use std::fs::File;
use std::fs::OpenOptions;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Write as _;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use decision_intel_core::Category;
use decision_intel_core::Stakes;
use decision_intel_core::Timestamp;
use decision_intel_events::NotificationBroker;
use decision_intel_events::NotificationEvent;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

fn category_key(category: Category) -> &'static str {
    match category {
        Category::Architecture => "architecture",
        Category::Process => "process",
        Category::Integration => "integration",
        Category::Tooling => "tooling",
        Category::Security => "security",
    }
}

fn stakes_key(stakes: Stakes) -> &'static str {
    match stakes {
        Stakes::Low => "low",
        Stakes::Medium => "medium",
        Stakes::High => "high",
        Stakes::Critical => "critical",
    }
}

/// Default number of failures within the window that trips a breaker
/// (§3.4).
pub const DEFAULT_THRESHOLD: usize = 5;
/// Default sliding window over which failures are counted (§3.4).
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(15 * 60);
/// Default cooldown before an open breaker becomes eligible to probe
/// (§3.4).
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5 * 60);

/// Observable breaker state (§3.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// A request context used to determine which scopes a breaker check applies
/// to (§3.4): `global` always applies; the rest apply when the matching
/// field is present.
#[derive(Debug, Clone, Default)]
pub struct BreakerContext {
    pub category: Option<Category>,
    pub stakes: Option<Stakes>,
    pub agent_id: Option<String>,
    pub tags: Vec<String>,
}

impl BreakerContext {
    /// Every scope key this context touches, most-restrictive first
    /// (§9: agent/tag scopes before category/stakes before global).
    #[must_use]
    pub fn matching_scopes(&self) -> Vec<String> {
        let mut scopes = Vec::new();
        if let Some(agent_id) = &self.agent_id {
            scopes.push(format!("agent:{agent_id}"));
        }
        for tag in &self.tags {
            scopes.push(format!("tag:{tag}"));
        }
        if let Some(category) = self.category {
            scopes.push(format!("category:{}", category_key(category)));
        }
        if let Some(stakes) = self.stakes {
            scopes.push(format!("stakes:{}", stakes_key(stakes)));
        }
        scopes.push("global".to_string());
        scopes
    }
}

/// Result of a breaker check against a context (§4.7).
#[derive(Debug, Clone)]
pub enum BreakerCheck {
    /// No matching scope is open; the probe slot (if any) was claimed.
    Allowed,
    /// A matching scope is open or half-open with a probe already in
    /// flight.
    Blocked(BreakerViolation),
}

/// Structured detail surfaced to callers when a breaker blocks an action
/// (§7: "structured block reason").
#[derive(Debug, Clone, Serialize)]
pub struct BreakerViolation {
    pub scope: String,
    pub state: BreakerState,
    pub failure_count: usize,
    pub suggestion: String,
}

#[derive(Debug, Clone)]
struct BreakerRecord {
    state: BreakerState,
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

impl BreakerRecord {
    fn closed() -> Self {
        Self { state: BreakerState::Closed, failures: VecDeque::new(), opened_at: None, probe_in_flight: false }
    }
}

/// A journaled breaker transition, replayed on startup (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct JournalEntry {
    scope: String,
    event: JournalEvent,
    /// Wall-clock time the event was recorded, used to recompute elapsed
    /// cooldowns on replay.
    at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
enum JournalEvent {
    Failure,
    Success,
    Opened { failure_count: usize },
    ProbeStarted,
    ProbeSucceeded,
    ProbeFailed,
    ManualReset { probe_first: bool },
}

#[derive(Error, Debug)]
pub enum BreakerError {
    #[error("circuit breaker journal io error: {0}")]
    Io(String),
}

struct Inner {
    breakers: HashMap<String, BreakerRecord>,
}

/// Scoped circuit breaker manager (§3.4, §4.7). Holds one lock across all
/// scopes, since the scope count is small (low hundreds, §5).
pub struct CircuitBreakerManager {
    inner: Mutex<Inner>,
    threshold: usize,
    window: Duration,
    cooldown: Duration,
    journal_path: Option<PathBuf>,
    broker: Option<NotificationBroker>,
}

impl CircuitBreakerManager {
    /// Builds a manager with default threshold/window/cooldown and no
    /// persistence or notifications.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner { breakers: HashMap::new() }),
            threshold: DEFAULT_THRESHOLD,
            window: DEFAULT_WINDOW,
            cooldown: DEFAULT_COOLDOWN,
            journal_path: None,
            broker: None,
        }
    }

    #[must_use]
    pub fn with_thresholds(mut self, threshold: usize, window: Duration, cooldown: Duration) -> Self {
        self.threshold = threshold;
        self.window = window;
        self.cooldown = cooldown;
        self
    }

    #[must_use]
    pub fn with_broker(mut self, broker: NotificationBroker) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Attaches a journal file, replaying any existing entries to
    /// reconstruct in-memory state (§4.7).
    ///
    /// # Errors
    ///
    /// Returns [`BreakerError::Io`] if the journal exists but cannot be read.
    pub fn with_journal(mut self, path: impl Into<PathBuf>) -> Result<Self, BreakerError> {
        let path = path.into();
        if path.exists() {
            let file = File::open(&path).map_err(|err| BreakerError::Io(err.to_string()))?;
            let reader = BufReader::new(file);
            let now_wall = Timestamp::now();
            let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            for line in reader.lines() {
                let line = line.map_err(|err| BreakerError::Io(err.to_string()))?;
                if line.trim().is_empty() {
                    continue;
                }
                if let Ok(entry) = serde_json::from_str::<JournalEntry>(&line) {
                    replay_entry(&mut inner.breakers, &entry, &now_wall);
                }
            }
            drop(inner);
        }
        self.journal_path = Some(path);
        Ok(self)
    }

    /// Records a failure outcome for every scope in `context`, possibly
    /// tripping one or more breakers (§4.7: "failures increment the deque
    /// of every scope key the decision matches").
    pub fn record_failure(&self, context: &BreakerContext, at: Timestamp) {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        for scope in context.matching_scopes() {
            let record = inner.breakers.entry(scope.clone()).or_insert_with(BreakerRecord::closed);
            self.append(&scope, JournalEvent::Failure, at);
            record.failures.push_back(now);
            while let Some(&front) = record.failures.front() {
                if now.duration_since(front) > self.window {
                    record.failures.pop_front();
                } else {
                    break;
                }
            }
            if record.state == BreakerState::Closed && record.failures.len() >= self.threshold {
                record.state = BreakerState::Open;
                record.opened_at = Some(now);
                let failure_count = record.failures.len();
                self.append(&scope, JournalEvent::Opened { failure_count }, at);
                if let Some(broker) = &self.broker {
                    let _ = broker.notify(&NotificationEvent::BreakerOpened { scope: scope.clone(), opened_at: at, failure_count });
                }
            }
        }
    }

    /// Records a success outcome, clearing the failure deque for any
    /// matching scope still closed (§4.7).
    pub fn record_success(&self, context: &BreakerContext, at: Timestamp) {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        for scope in context.matching_scopes() {
            if let Some(record) = inner.breakers.get_mut(&scope) {
                if record.state == BreakerState::Closed {
                    record.failures.clear();
                    self.append(&scope, JournalEvent::Success, at);
                }
            }
        }
    }

    /// Reviews a half-open probe outcome, completing the half-open state
    /// (§4.7: `half_open -> closed` on success, `half_open -> open` on
    /// failure).
    pub fn review_probe(&self, scope: &str, succeeded: bool, at: Timestamp) {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(record) = inner.breakers.get_mut(scope) {
            if record.state == BreakerState::HalfOpen {
                record.probe_in_flight = false;
                if succeeded {
                    record.state = BreakerState::Closed;
                    record.failures.clear();
                    record.opened_at = None;
                    self.append(scope, JournalEvent::ProbeSucceeded, at);
                } else {
                    record.state = BreakerState::Open;
                    record.opened_at = Some(Instant::now());
                    self.append(scope, JournalEvent::ProbeFailed, at);
                }
            }
        }
    }

    /// Manually resets a breaker (§4.7: `open -> closed` or
    /// `open -> half_open` with `probe_first`).
    pub fn manual_reset(&self, scope: &str, probe_first: bool, at: Timestamp) {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let record = inner.breakers.entry(scope.to_string()).or_insert_with(BreakerRecord::closed);
        record.failures.clear();
        record.opened_at = None;
        record.probe_in_flight = false;
        record.state = if probe_first { BreakerState::HalfOpen } else { BreakerState::Closed };
        self.append(scope, JournalEvent::ManualReset { probe_first }, at);
    }

    /// Checks whether `context` is currently blocked, iterating matching
    /// scopes most-restrictive-first and lazily transitioning `open` to
    /// `half_open` once the cooldown has elapsed (§4.7, §9).
    pub fn check(&self, context: &BreakerContext, at: Timestamp) -> BreakerCheck {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        for scope in context.matching_scopes() {
            let Some(record) = inner.breakers.get_mut(&scope) else { continue };
            if record.state == BreakerState::Open {
                if let Some(opened_at) = record.opened_at {
                    if now.duration_since(opened_at) >= self.cooldown {
                        record.state = BreakerState::HalfOpen;
                        self.append(&scope, JournalEvent::ProbeStarted, at);
                    }
                }
            }
            match record.state {
                BreakerState::Open => {
                    return BreakerCheck::Blocked(BreakerViolation {
                        scope,
                        state: BreakerState::Open,
                        failure_count: record.failures.len(),
                        suggestion: "wait for the cooldown to elapse or reset the breaker manually".to_string(),
                    });
                }
                BreakerState::HalfOpen => {
                    if record.probe_in_flight {
                        return BreakerCheck::Blocked(BreakerViolation {
                            scope,
                            state: BreakerState::HalfOpen,
                            failure_count: record.failures.len(),
                            suggestion: "a probe is already in flight for this scope".to_string(),
                        });
                    }
                    record.probe_in_flight = true;
                    return BreakerCheck::Allowed;
                }
                BreakerState::Closed => {}
            }
        }
        BreakerCheck::Allowed
    }

    /// Snapshot of a single scope's state, used by `getCircuitState` (§6).
    #[must_use]
    pub fn state_of(&self, scope: &str) -> Option<(BreakerState, usize)> {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.breakers.get(scope).map(|record| (record.state, record.failures.len()))
    }

    fn append(&self, scope: &str, event: JournalEvent, at: Timestamp) {
        let Some(path) = &self.journal_path else { return };
        let entry = JournalEntry { scope: scope.to_string(), event, at };
        let Ok(payload) = serde_json::to_string(&entry) else { return };
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

impl Default for CircuitBreakerManager {
    fn default() -> Self {
        Self::new()
    }
}

fn replay_entry(breakers: &mut HashMap<String, BreakerRecord>, entry: &JournalEntry, now_wall: &Timestamp) {
    let record = breakers.entry(entry.scope.clone()).or_insert_with(BreakerRecord::closed);
    let elapsed = Duration::from_millis(now_wall.millis_since(&entry.at).max(0) as u64);
    let synthetic_instant = Instant::now().checked_sub(elapsed).unwrap_or_else(Instant::now);
    match &entry.event {
        JournalEvent::Failure => record.failures.push_back(synthetic_instant),
        JournalEvent::Success => {
            if record.state == BreakerState::Closed {
                record.failures.clear();
            }
        }
        JournalEvent::Opened { .. } => {
            record.state = BreakerState::Open;
            record.opened_at = Some(synthetic_instant);
        }
        JournalEvent::ProbeStarted => record.state = BreakerState::HalfOpen,
        JournalEvent::ProbeSucceeded => {
            record.state = BreakerState::Closed;
            record.failures.clear();
            record.opened_at = None;
        }
        JournalEvent::ProbeFailed => {
            record.state = BreakerState::Open;
            record.opened_at = Some(synthetic_instant);
        }
        JournalEvent::ManualReset { probe_first } => {
            record.failures.clear();
            record.opened_at = None;
            record.probe_in_flight = false;
            record.state = if *probe_first { BreakerState::HalfOpen } else { BreakerState::Closed };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> BreakerContext {
        BreakerContext { category: None, stakes: None, agent_id: Some("agent-1".to_string()), tags: Vec::new() }
    }

    #[test]
    fn closed_stays_allowed_below_threshold() {
        let manager = CircuitBreakerManager::new().with_thresholds(5, Duration::from_secs(900), Duration::from_secs(300));
        let context = ctx();
        for _ in 0..4 {
            manager.record_failure(&context, Timestamp::now());
        }
        assert!(matches!(manager.check(&context, Timestamp::now()), BreakerCheck::Allowed));
    }

    #[test]
    fn threshold_failures_trip_to_open() {
        let manager = CircuitBreakerManager::new().with_thresholds(3, Duration::from_secs(900), Duration::from_secs(300));
        let context = ctx();
        for _ in 0..3 {
            manager.record_failure(&context, Timestamp::now());
        }
        assert!(matches!(manager.check(&context, Timestamp::now()), BreakerCheck::Blocked(_)));
    }

    #[test]
    fn manual_reset_closes_breaker() {
        let manager = CircuitBreakerManager::new().with_thresholds(1, Duration::from_secs(900), Duration::from_secs(300));
        let context = ctx();
        manager.record_failure(&context, Timestamp::now());
        assert!(matches!(manager.check(&context, Timestamp::now()), BreakerCheck::Blocked(_)));
        manager.manual_reset("agent:agent-1", false, Timestamp::now());
        assert!(matches!(manager.check(&context, Timestamp::now()), BreakerCheck::Allowed));
    }

    #[test]
    fn success_in_closed_state_clears_deque() {
        let manager = CircuitBreakerManager::new().with_thresholds(3, Duration::from_secs(900), Duration::from_secs(300));
        let context = ctx();
        manager.record_failure(&context, Timestamp::now());
        manager.record_failure(&context, Timestamp::now());
        manager.record_success(&context, Timestamp::now());
        manager.record_failure(&context, Timestamp::now());
        manager.record_failure(&context, Timestamp::now());
        assert!(matches!(manager.check(&context, Timestamp::now()), BreakerCheck::Allowed));
    }

    #[test]
    fn journal_replay_reopens_breaker() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("breakers.jsonl");
        {
            let manager = CircuitBreakerManager::new()
                .with_thresholds(2, Duration::from_secs(900), Duration::from_secs(300))
                .with_journal(&path)
                .expect("journal open");
            let context = ctx();
            manager.record_failure(&context, Timestamp::now());
            manager.record_failure(&context, Timestamp::now());
            assert!(matches!(manager.check(&context, Timestamp::now()), BreakerCheck::Blocked(_)));
        }
        let reloaded = CircuitBreakerManager::new()
            .with_thresholds(2, Duration::from_secs(900), Duration::from_secs(300))
            .with_journal(&path)
            .expect("journal reopen");
        assert!(matches!(reloaded.check(&ctx(), Timestamp::now()), BreakerCheck::Blocked(_)));
    }
}
