// decision-intel-service/src/tracker.rs
// ============================================================================
// Module: Deliberation Tracker
// Description: Composite-keyed (agent, decision) session state accumulating
//              inputs across calls (§3.2, §4.5).
// Purpose: Auto-capture the reasoning trail a dispatcher method observed so
//          `recordDecision` can attach it without client cooperation.
// Dependencies: decision-intel-core, std::collections, std::sync, tokio
// ============================================================================

//! ## Overview
//! [`DeliberationTracker`] is the only process-wide mutable state owned by
//! this crate (§9). It is keyed by `(agent_id, decision_id | "pending")`
//! (§3.2) and sharded by a hash of `agent_id` into [`SHARD_COUNT`] mutexes
//! (§4.5, §5) so concurrent agents rarely contend. Every method copies data
//! out and releases its shard lock before returning; no I/O happens while a
//! shard lock is held (§5).

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::Hash;
use std::hash::Hasher;
use std::sync::Mutex;
use std::time::Duration;

use decision_intel_core::AgentId;
use decision_intel_core::DeliberationInput;
use decision_intel_core::Timestamp;

/// Number of independent shard mutexes (§4.5: "e.g. 32").
pub const SHARD_COUNT: usize = 32;
/// Session idle TTL before the sweeper evicts it (§3.2, §4.5).
pub const SESSION_TTL: Duration = Duration::from_secs(5 * 60);
/// Maximum inputs retained per session; oldest is dropped with a warning
/// once exceeded (§4.5).
pub const MAX_INPUTS_PER_SESSION: usize = 64;

/// The literal decision-id key used for inputs accumulated before a
/// decision exists (§3.2).
pub const PENDING: &str = "pending";

/// Composite tracker key (§3.2).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TrackerKey {
    agent_id: AgentId,
    decision_id: String,
}

/// A tracker session: accumulated inputs plus lifecycle timestamps (§3.2).
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Accumulated deliberation inputs, oldest first.
    pub inputs: Vec<DeliberationInput>,
    /// When this session was first created.
    pub started_at: Timestamp,
    /// When this session last received an input.
    pub last_touched_at: Timestamp,
}

impl Session {
    fn new(now: Timestamp) -> Self {
        Self {
            inputs: Vec::new(),
            started_at: now,
            last_touched_at: now,
        }
    }

    fn is_expired(&self, now: Timestamp, ttl: Duration) -> bool {
        now.millis_since(&self.last_touched_at) >= i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
    }
}

struct Shard {
    sessions: Mutex<HashMap<TrackerKey, Session>>,
}

/// The sharded (agent, decision) deliberation session map (§3.2, §4.5).
pub struct DeliberationTracker {
    shards: Vec<Shard>,
    ttl: Duration,
}

impl DeliberationTracker {
    /// Builds a tracker with the default shard count and TTL.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(SHARD_COUNT, SESSION_TTL)
    }

    /// Builds a tracker with an explicit shard count and TTL, used by tests
    /// that need a short TTL or a single shard for deterministic ordering.
    #[must_use]
    pub fn with_config(shard_count: usize, ttl: Duration) -> Self {
        let shard_count = shard_count.max(1);
        let shards = (0..shard_count)
            .map(|_| Shard { sessions: Mutex::new(HashMap::new()) })
            .collect();
        Self { shards, ttl }
    }

    /// Appends `input` to the session for `(agent_id, decision_id)`,
    /// creating it if absent, and refreshes `last_touched_at` (§4.5).
    ///
    /// When the session already holds [`MAX_INPUTS_PER_SESSION`] inputs, the
    /// oldest is dropped and a warning is logged (§4.5).
    pub fn track_input(&self, agent_id: &AgentId, decision_id: &str, input: DeliberationInput, now: Timestamp) {
        let key = TrackerKey { agent_id: agent_id.clone(), decision_id: decision_id.to_string() };
        let shard = self.shard_for(agent_id);
        let mut sessions = shard.sessions.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let session = sessions.entry(key).or_insert_with(|| Session::new(now));
        if session.inputs.len() >= MAX_INPUTS_PER_SESSION {
            session.inputs.remove(0);
            tracing::warn!(agent = %agent_id, decision_id, "tracker session input cap reached, dropping oldest input");
        }
        session.inputs.push(input);
        session.last_touched_at = now;
    }

    /// Atomically returns and removes the session for
    /// `(agent_id, decision_id)` (§4.5).
    #[must_use]
    pub fn consume(&self, agent_id: &AgentId, decision_id: &str) -> Option<Session> {
        let key = TrackerKey { agent_id: agent_id.clone(), decision_id: decision_id.to_string() };
        let shard = self.shard_for(agent_id);
        let mut sessions = shard.sessions.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        sessions.remove(&key)
    }

    /// Returns a read-only snapshot of the session for
    /// `(agent_id, decision_id)` without consuming it (§4.5).
    #[must_use]
    pub fn peek(&self, agent_id: &AgentId, decision_id: &str) -> Option<Session> {
        let key = TrackerKey { agent_id: agent_id.clone(), decision_id: decision_id.to_string() };
        let shard = self.shard_for(agent_id);
        let sessions = shard.sessions.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        sessions.get(&key).cloned()
    }

    /// Evicts every session whose `last_touched_at` is older than the
    /// configured TTL as of `now`, returning the number evicted (§4.5).
    pub fn sweep_expired(&self, now: Timestamp) -> usize {
        let mut evicted = 0;
        for shard in &self.shards {
            let mut sessions = shard.sessions.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let before = sessions.len();
            sessions.retain(|_, session| !session.is_expired(now, self.ttl));
            evicted += before - sessions.len();
        }
        evicted
    }

    fn shard_for(&self, agent_id: &AgentId) -> &Shard {
        let mut hasher = DefaultHasher::new();
        agent_id.hash(&mut hasher);
        let index = (hasher.finish() as usize) % self.shards.len();
        &self.shards[index]
    }
}

impl Default for DeliberationTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(text: &str, source: &str, at: Timestamp) -> DeliberationInput {
        DeliberationInput {
            id: decision_intel_core::InputId::new(format!("{source}-{text}")),
            text: text.to_string(),
            source: source.to_string(),
            timestamp: at,
        }
    }

    #[test]
    fn track_then_consume_returns_inputs_in_order() {
        let tracker = DeliberationTracker::new();
        let agent = AgentId::new("a1");
        let t0 = Timestamp::now();
        tracker.track_input(&agent, PENDING, input("first", "queryDecisions", t0), t0);
        tracker.track_input(&agent, PENDING, input("second", "checkGuardrails", t0), t0);
        let session = tracker.consume(&agent, PENDING).expect("session present");
        assert_eq!(session.inputs.len(), 2);
        assert_eq!(session.inputs[0].source, "queryDecisions");
        assert_eq!(session.inputs[1].source, "checkGuardrails");
        assert!(tracker.consume(&agent, PENDING).is_none());
    }

    #[test]
    fn distinct_agents_do_not_share_sessions() {
        let tracker = DeliberationTracker::new();
        let now = Timestamp::now();
        tracker.track_input(&AgentId::new("a1"), PENDING, input("x", "queryDecisions", now), now);
        assert!(tracker.peek(&AgentId::new("a2"), PENDING).is_none());
    }

    #[test]
    fn input_cap_drops_oldest() {
        let tracker = DeliberationTracker::with_config(1, SESSION_TTL);
        let agent = AgentId::new("a1");
        let now = Timestamp::now();
        for i in 0..(MAX_INPUTS_PER_SESSION + 5) {
            tracker.track_input(&agent, PENDING, input(&i.to_string(), "queryDecisions", now), now);
        }
        let session = tracker.peek(&agent, PENDING).expect("session present");
        assert_eq!(session.inputs.len(), MAX_INPUTS_PER_SESSION);
        assert_eq!(session.inputs[0].text, "5");
    }

    #[test]
    fn sweeper_evicts_sessions_past_ttl() {
        let tracker = DeliberationTracker::with_config(1, Duration::from_millis(100));
        let agent = AgentId::new("a1");
        let t0 = Timestamp::now();
        tracker.track_input(&agent, PENDING, input("x", "queryDecisions", t0), t0);
        let later = t0.plus_millis(500);
        let evicted = tracker.sweep_expired(later);
        assert_eq!(evicted, 1);
        assert!(tracker.peek(&agent, PENDING).is_none());
    }

    #[test]
    fn separate_decision_ids_for_same_agent_are_independent_sessions() {
        let tracker = DeliberationTracker::new();
        let agent = AgentId::new("a1");
        let now = Timestamp::now();
        tracker.track_input(&agent, PENDING, input("x", "queryDecisions", now), now);
        tracker.track_input(&agent, "0a1b2c3d", input("y", "recordThought", now), now);
        assert_eq!(tracker.peek(&agent, PENDING).expect("pending").inputs.len(), 1);
        assert_eq!(tracker.peek(&agent, "0a1b2c3d").expect("explicit").inputs.len(), 1);
    }
}
