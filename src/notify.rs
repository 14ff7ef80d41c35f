//! Event notification
//!
//! The engine emits [`DomainEvent`]s after durable state changes. Dispatch is
//! fire-and-forget: a notifier must never fail the operation that produced
//! the event.

use tracing::info;

use crate::domain::events::DomainEvent;

/// Sink for domain events. Implementations must be cheap and infallible;
/// anything slow belongs behind a channel.
pub trait Notifier: Send + Sync {
    fn dispatch(&self, event: &DomainEvent);
}

/// Logs each event as a structured tracing record. The default sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn dispatch(&self, event: &DomainEvent) {
        match serde_json::to_string(event) {
            Ok(payload) => info!(event = event.name(), %payload, "domain event"),
            Err(_) => info!(event = event.name(), "domain event"),
        }
    }
}

/// Discards all events. Used in tests that assert on state, not signals.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn dispatch(&self, _event: &DomainEvent) {}
}
