// decision-intel-events/src/event.rs
// ============================================================================
// Module: Notification Events
// Description: The event shapes emitted by the breaker manager and guardrail
//              loader (§4.6, §4.7).
// Purpose: Give sinks a stable, typed event to deliver.
// Dependencies: decision-intel-core
// ============================================================================

use decision_intel_core::Timestamp;

/// A notification raised by a server-side component for an external
/// subscriber (logs, alerting, webhooks).
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationEvent {
    /// A circuit breaker transitioned from `closed`/`half_open` to `open`
    /// (§4.7: "when a breaker opens, emit an event").
    BreakerOpened {
        /// The scope key that tripped.
        scope: String,
        /// When the breaker opened.
        opened_at: Timestamp,
        /// Number of failures that triggered the trip.
        failure_count: usize,
    },
    /// A guardrail cache refresh failed and fell back to a stale snapshot
    /// (§7: "Guardrail loading errors during periodic refresh keep the
    /// previous snapshot in force and log a degradation event").
    GuardrailsDegraded {
        /// The underlying load failure, as text.
        reason: String,
    },
}

impl NotificationEvent {
    /// The debounce scope key for this event (§4.7: "debounce per scope to
    /// one event every 60 s"). Guardrail degradation events share a single
    /// global scope since they are not tied to a guardrail scope.
    #[must_use]
    pub fn debounce_key(&self) -> &str {
        match self {
            Self::BreakerOpened { scope, .. } => scope,
            Self::GuardrailsDegraded { .. } => "guardrails",
        }
    }
}
