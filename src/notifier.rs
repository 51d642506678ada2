//! Fire-and-forget delivery of domain events.
//!
//! Services hand events over only after their transaction has committed.
//! Delivery failures are logged and otherwise ignored.

use crate::domain::events::DomainEvent;

pub trait Notifier: Send + Sync {
    fn notify(&self, events: Vec<DomainEvent>);
}

/// Drops everything. Used when no broker is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, events: Vec<DomainEvent>) {
        if !events.is_empty() {
            tracing::debug!(count = events.len(), "no notifier configured, dropping events");
        }
    }
}

/// Publishes each event as JSON on `<prefix>.<kind>`, e.g. `storefront.order.placed`.
#[derive(Clone)]
pub struct NatsNotifier {
    client: async_nats::Client,
    subject_prefix: String,
}

impl NatsNotifier {
    pub fn new(client: async_nats::Client, subject_prefix: impl Into<String>) -> Self {
        Self { client, subject_prefix: subject_prefix.into() }
    }

    pub fn subject_for(&self, event: &DomainEvent) -> String { format!("{}.{}", self.subject_prefix, event.kind()) }
}

impl Notifier for NatsNotifier {
    fn notify(&self, events: Vec<DomainEvent>) {
        for event in events {
            let subject = self.subject_for(&event);
            let payload = match serde_json::to_vec(&event) {
                Ok(p) => p,
                Err(e) => { tracing::warn!(%subject, error = %e, "could not encode event"); continue; }
            };
            let client = self.client.clone();
            tokio::spawn(async move {
                if let Err(e) = client.publish(subject.clone(), payload.into()).await {
                    tracing::warn!(%subject, error = %e, "event publish failed");
                }
            });
        }
    }
}
