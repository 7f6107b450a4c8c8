// decision-intel-events/src/broker.rs
// ============================================================================
// Module: Notification Broker
// Description: Debounced fan-out of notification events to configured sinks
//              (§4.7).
// Purpose: Give the breaker manager and guardrail loader a single place to
//          report events without re-implementing debounce.
// Dependencies: decision-intel-core, std::sync, std::time
// ============================================================================

//! ## Overview
//! [`NotificationBroker`] holds one or more [`EventSink`]s and a debounce
//! table keyed by [`NotificationEvent::debounce_key`]. An event is delivered
//! to every sink at most once per debounce window for its key (§4.7: "emit
//! an event; debounce per scope to one event every 60 s").

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use crate::event::NotificationEvent;
use crate::sink::EventSink;
use crate::sink::SinkError;

/// Default debounce window (§4.7).
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_secs(60);

/// Fans a notification event out to every configured sink, debounced per
/// event key (§4.7).
pub struct NotificationBroker {
    sinks: Vec<Box<dyn EventSink>>,
    window: Duration,
    last_emitted: Mutex<HashMap<String, Instant>>,
}

impl NotificationBroker {
    /// Builds a broker with the default 60-second debounce window.
    #[must_use]
    pub fn new(sinks: Vec<Box<dyn EventSink>>) -> Self {
        Self::with_window(sinks, DEFAULT_DEBOUNCE_WINDOW)
    }

    /// Builds a broker with an explicit debounce window (used by tests that
    /// need a deterministic or zero window).
    #[must_use]
    pub fn with_window(sinks: Vec<Box<dyn EventSink>>, window: Duration) -> Self {
        Self {
            sinks,
            window,
            last_emitted: Mutex::new(HashMap::new()),
        }
    }

    /// Delivers `event` to every sink unless its debounce key was emitted
    /// within the window, in which case the event is silently dropped.
    ///
    /// # Errors
    ///
    /// Returns the first [`SinkError`] encountered; subsequent sinks are
    /// still attempted so one failing sink does not suppress the others.
    pub fn notify(&self, event: &NotificationEvent) -> Result<(), SinkError> {
        if !self.should_emit(event.debounce_key()) {
            return Ok(());
        }
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(err) = sink.emit(event) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn should_emit(&self, key: &str) -> bool {
        let mut last_emitted = self
            .last_emitted
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let now = Instant::now();
        let should_emit = match last_emitted.get(key) {
            Some(last) => now.duration_since(*last) >= self.window,
            None => true,
        };
        if should_emit {
            last_emitted.insert(key.to_string(), now);
        }
        should_emit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::ChannelEventSink;
    use decision_intel_core::Timestamp;

    fn sample_event(scope: &str) -> NotificationEvent {
        NotificationEvent::BreakerOpened {
            scope: scope.to_string(),
            opened_at: Timestamp::now(),
            failure_count: 3,
        }
    }

    #[test]
    fn second_notify_within_window_is_debounced() {
        let (sink, mut receiver) = ChannelEventSink::new();
        let broker = NotificationBroker::with_window(vec![Box::new(sink)], Duration::from_secs(60));
        broker.notify(&sample_event("stakes:high")).expect("first notify");
        broker.notify(&sample_event("stakes:high")).expect("second notify");
        assert!(receiver.try_recv().is_ok());
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn distinct_scopes_are_not_debounced_against_each_other() {
        let (sink, mut receiver) = ChannelEventSink::new();
        let broker = NotificationBroker::with_window(vec![Box::new(sink)], Duration::from_secs(60));
        broker.notify(&sample_event("stakes:high")).expect("first notify");
        broker.notify(&sample_event("stakes:critical")).expect("second notify");
        assert!(receiver.try_recv().is_ok());
        assert!(receiver.try_recv().is_ok());
    }

    #[test]
    fn zero_window_never_debounces() {
        let (sink, mut receiver) = ChannelEventSink::new();
        let broker = NotificationBroker::with_window(vec![Box::new(sink)], Duration::from_secs(0));
        broker.notify(&sample_event("stakes:high")).expect("first notify");
        broker.notify(&sample_event("stakes:high")).expect("second notify");
        assert!(receiver.try_recv().is_ok());
        assert!(receiver.try_recv().is_ok());
    }
}
