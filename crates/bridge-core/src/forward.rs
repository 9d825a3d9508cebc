//! Relays manager events onto the events topic.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{trace, warn};

use amibridge_ami_core::AmiEvent;

use crate::addressing;

/// Publish side of the bus, abstracted for forwarding.
///
/// Delivery is at-most-once by contract: a failed publish is reported as an
/// error and the message is gone. Implementations must not queue or retry.
#[async_trait]
pub trait BusPublisher: Send + Sync {
    /// Publish one message at `routing_key` on `exchange`.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> anyhow::Result<()>;
}

/// Tags each manager event with the local host identity and republishes it
/// at the host-specific routing key.
///
/// Events are published in call order; a failed publish logs and drops the
/// event.
pub struct EventForwarder {
    publisher: Arc<dyn BusPublisher>,
    exchange: String,
    routing_key: String,
    host_identity: String,
}

impl EventForwarder {
    /// Create a forwarder publishing at `publish_key(events_key_prefix, host)`.
    pub fn new(
        publisher: Arc<dyn BusPublisher>,
        exchange: impl Into<String>,
        events_key_prefix: &str,
        host_identity: impl Into<String>,
    ) -> Self {
        let host_identity = host_identity.into();
        let routing_key = addressing::publish_key(events_key_prefix, &host_identity);
        EventForwarder {
            publisher,
            exchange: exchange.into(),
            routing_key,
            host_identity,
        }
    }

    /// The routing key events are published at.
    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// Forward one event.
    pub async fn forward(&self, mut event: AmiEvent) {
        event.set_field("srv", self.host_identity.clone());
        let payload = event.to_json().to_string();
        match self
            .publisher
            .publish(&self.exchange, &self.routing_key, payload.as_bytes())
            .await
        {
            Ok(()) => {
                trace!(event = %event.name(), routing_key = %self.routing_key, "Event forwarded");
            }
            Err(error) => {
                warn!(%error, event = %event.name(), "Dropping event after failed publish");
            }
        }
    }
}
