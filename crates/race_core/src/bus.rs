//! Topic-based fan-out of race events.
//!
//! One topic per race group. Every subscriber opens its own bounded channel on the
//! topic, so each viewer sees every event. Publishing is best-effort: a bounded
//! number of retries, then the event is logged and dropped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::config::BusConfig;
use crate::error::{EngineError, EngineResult};
use crate::events::RaceEvent;
use crate::retry::with_fixed_retries;

pub mod memory;
pub mod subscription;

pub use memory::InMemoryTransport;
pub use subscription::{Delivery, Subscription};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// Message transport underneath the event bus. Payloads are JSON-encoded events.
#[async_trait]
pub trait BroadcastTransport: Send + Sync {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), TransportError>;

    /// Opens an exclusive channel bound to `topic`. The receiver closing means the
    /// connection was lost.
    async fn open(&self, topic: &str, capacity: usize) -> Result<mpsc::Receiver<String>, TransportError>;
}

pub fn topic_for(race_group_id: u64) -> String {
    format!("race_events_{race_group_id}")
}

#[derive(Clone)]
pub struct EventBus {
    transport: Arc<dyn BroadcastTransport>,
    config: BusConfig,
}

impl EventBus {
    pub fn new(transport: Arc<dyn BroadcastTransport>, config: BusConfig) -> Self {
        Self { transport, config }
    }

    pub fn in_memory(config: BusConfig) -> Self {
        Self::new(Arc::new(InMemoryTransport::new()), config)
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Publishes `event` to the race group's topic. Returns `false` if every attempt
    /// failed; the failure is logged and never propagated.
    pub async fn publish(&self, race_group_id: u64, event: &RaceEvent) -> bool {
        match self.try_publish(race_group_id, event).await {
            Ok(()) => true,
            Err(err) => {
                error!(event = event.event_type(), error = %err, "dropping event");
                false
            }
        }
    }

    /// Publishes with bounded retries and reports exhaustion as
    /// [`EngineError::BroadcastDeliveryFailure`].
    pub async fn try_publish(&self, race_group_id: u64, event: &RaceEvent) -> EngineResult<()> {
        let topic = topic_for(race_group_id);
        let payload = match serde_json::to_string(event) {
            Ok(p) => p,
            Err(err) => {
                warn!(topic = %topic, event = event.event_type(), error = %err, "event encoding failed");
                return Err(EngineError::BroadcastDeliveryFailure { topic });
            }
        };

        let delay = Duration::from_millis(self.config.publish_retry_delay_ms);
        let result = with_fixed_retries(self.config.publish_attempts, delay, |attempt| {
            if attempt > 1 {
                warn!(topic = %topic, event = event.event_type(), attempt, "retrying publish");
            }
            let transport = Arc::clone(&self.transport);
            let topic = topic.clone();
            let payload = payload.clone();
            async move { transport.publish(&topic, payload).await }
        })
        .await;

        match result {
            Ok(()) => {
                debug!(topic = %topic, event = event.event_type(), "published");
                Ok(())
            }
            Err(err) => {
                warn!(
                    topic = %topic,
                    event = event.event_type(),
                    attempts = self.config.publish_attempts,
                    error = %err,
                    "publish retries exhausted"
                );
                Err(EngineError::BroadcastDeliveryFailure { topic })
            }
        }
    }

    /// Opens a subscription on the race group's topic. The first delivery is always
    /// `connected`.
    pub async fn subscribe(&self, race_group_id: u64) -> Subscription {
        Subscription::open(Arc::clone(&self.transport), race_group_id, self.config.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_report_the_topic() {
        let transport = Arc::new(InMemoryTransport::new());
        let bus = EventBus::new(transport.clone(), BusConfig::default());
        let event = RaceEvent::Connected { race_group_id: 4 };

        transport.fail_next_publishes(bus.config().publish_attempts);
        match bus.try_publish(4, &event).await {
            Err(EngineError::BroadcastDeliveryFailure { topic }) => assert_eq!(topic, "race_events_4"),
            other => panic!("expected delivery failure, got {other:?}"),
        }

        transport.fail_next_publishes(bus.config().publish_attempts);
        assert!(!bus.publish(4, &event).await);
        assert!(bus.try_publish(4, &event).await.is_ok());
    }
}
