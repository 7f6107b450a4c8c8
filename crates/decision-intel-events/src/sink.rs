// decision-intel-events/src/sink.rs
// ============================================================================
// Module: Event Sinks
// Description: Sink trait and reference implementations for event delivery.
// Purpose: Deliver notification events to concrete external targets.
// Dependencies: decision-intel-core, thiserror, tokio, tracing
// ============================================================================

//! ## Overview
//! Sinks deliver [`crate::event::NotificationEvent`] values to whatever is
//! listening (structured logs, an in-process channel). Implementations must
//! fail closed: a delivery error never silently drops the event from the
//! caller's perspective.

use thiserror::Error;

use crate::event::NotificationEvent;

/// Errors emitted by event sinks.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink's delivery channel was closed or otherwise unavailable.
    #[error("event sink delivery failed: {0}")]
    DeliveryFailed(String),
}

/// Delivers notification events to a concrete target.
pub trait EventSink: Send + Sync {
    /// Delivers `event`.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] when delivery fails.
    fn emit(&self, event: &NotificationEvent) -> Result<(), SinkError>;
}

/// A sink that records events as structured log lines via `tracing`.
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    /// Creates a new log sink.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&self, event: &NotificationEvent) -> Result<(), SinkError> {
        match event {
            NotificationEvent::BreakerOpened {
                scope,
                opened_at,
                failure_count,
            } => {
                tracing::warn!(
                    scope = %scope,
                    opened_at = %opened_at,
                    failure_count,
                    "circuit breaker opened"
                );
            }
            NotificationEvent::GuardrailsDegraded { reason } => {
                tracing::warn!(reason = %reason, "guardrail refresh degraded to stale snapshot");
            }
        }
        Ok(())
    }
}

/// A sink that forwards events onto an unbounded channel, for callers that
/// want to consume events programmatically (webhooks, SSE, tests).
pub struct ChannelEventSink {
    sender: tokio::sync::mpsc::UnboundedSender<NotificationEvent>,
}

impl ChannelEventSink {
    /// Creates a channel sink and returns it alongside the receiving end.
    #[must_use]
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<NotificationEvent>) {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: &NotificationEvent) -> Result<(), SinkError> {
        self.sender
            .send(event.clone())
            .map_err(|err| SinkError::DeliveryFailed(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use decision_intel_core::Timestamp;

    #[test]
    fn log_sink_never_fails() {
        let sink = LogEventSink::new();
        let event = NotificationEvent::BreakerOpened {
            scope: "stakes:high".to_string(),
            opened_at: Timestamp::now(),
            failure_count: 3,
        };
        assert!(sink.emit(&event).is_ok());
    }

    #[test]
    fn channel_sink_forwards_events() {
        let (sink, mut receiver) = ChannelEventSink::new();
        let event = NotificationEvent::GuardrailsDegraded {
            reason: "source unreachable".to_string(),
        };
        sink.emit(&event).expect("emit");
        assert_eq!(receiver.try_recv().expect("received"), event);
    }
}
