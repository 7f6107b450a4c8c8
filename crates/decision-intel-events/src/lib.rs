// decision-intel-events/src/lib.rs
// ============================================================================
// Module: Decision Intelligence Events
// Description: Public API surface for notification events and delivery
//              (§4.6, §4.7).
// Purpose: Expose the event shapes, sink trait, and debounced broker shared
//          by the circuit breaker manager and guardrail loader.
// Dependencies: crate::{broker, event, sink}
// ============================================================================

//! ## Overview
//! `decision-intel-events` is the notification surface described in §4.7
//! ("when a breaker opens, emit an event; debounce per scope to one event
//! every 60 s") and §7 ("log a degradation event" on guardrail refresh
//! failure). It does not know about breakers or guardrails directly — it
//! only defines the event shapes, a sink trait, and a debounced broker that
//! other crates drive.

pub mod broker;
pub mod event;
pub mod sink;

pub use broker::DEFAULT_DEBOUNCE_WINDOW;
pub use broker::NotificationBroker;
pub use event::NotificationEvent;
pub use sink::ChannelEventSink;
pub use sink::EventSink;
pub use sink::LogEventSink;
pub use sink::SinkError;
