use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

use super::{BroadcastTransport, TransportError};

/// In-process fan-out transport for single-process deployments and tests.
#[derive(Debug, Default)]
pub struct InMemoryTransport {
    topics: DashMap<String, Vec<mpsc::Sender<String>>>,
    failing_publishes: AtomicU32,
    refuse_opens: AtomicU32,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live subscriber channels on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|subs| subs.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }

    /// Makes the next `n` publishes fail.
    pub fn fail_next_publishes(&self, n: u32) {
        self.failing_publishes.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` opens fail.
    pub fn refuse_next_opens(&self, n: u32) {
        self.refuse_opens.store(n, Ordering::SeqCst);
    }

    /// Drops every channel on `topic`, as a broker restart would.
    pub fn disconnect(&self, topic: &str) {
        self.topics.remove(topic);
    }

    fn take_fault(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl BroadcastTransport for InMemoryTransport {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), TransportError> {
        if Self::take_fault(&self.failing_publishes) {
            return Err(TransportError::Unavailable("injected publish failure".to_string()));
        }
        let Some(mut subs) = self.topics.get_mut(topic) else {
            return Ok(());
        };
        subs.retain(|tx| match tx.try_send(payload.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(topic, "subscriber queue full; dropping event for that subscriber");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
        Ok(())
    }

    async fn open(&self, topic: &str, capacity: usize) -> Result<mpsc::Receiver<String>, TransportError> {
        if Self::take_fault(&self.refuse_opens) {
            return Err(TransportError::Unavailable("injected open failure".to_string()));
        }
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.topics.entry(topic.to_string()).or_default().push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_subscriber_receives_every_message() {
        let transport = InMemoryTransport::new();
        let mut a = transport.open("race_events_1", 8).await.expect("open");
        let mut b = transport.open("race_events_1", 8).await.expect("open");
        let mut other = transport.open("race_events_2", 8).await.expect("open");

        transport.publish("race_events_1", "m1".to_string()).await.expect("publish");
        transport.publish("race_events_1", "m2".to_string()).await.expect("publish");

        for rx in [&mut a, &mut b] {
            assert_eq!(rx.recv().await.as_deref(), Some("m1"));
            assert_eq!(rx.recv().await.as_deref(), Some("m2"));
        }
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_subscribers_are_cleaned_up() {
        let transport = InMemoryTransport::new();
        let rx = transport.open("t", 4).await.expect("open");
        let _kept = transport.open("t", 4).await.expect("open");
        drop(rx);

        transport.publish("t", "x".to_string()).await.expect("publish");
        assert_eq!(transport.subscriber_count("t"), 1);
    }

    #[tokio::test]
    async fn full_subscriber_does_not_block_publisher() {
        let transport = InMemoryTransport::new();
        let mut slow = transport.open("t", 1).await.expect("open");
        transport.publish("t", "first".to_string()).await.expect("publish");
        transport.publish("t", "second".to_string()).await.expect("publish");

        assert_eq!(slow.recv().await.as_deref(), Some("first"));
        assert!(slow.try_recv().is_err());
        assert_eq!(transport.subscriber_count("t"), 1);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let transport = InMemoryTransport::new();
        transport.fail_next_publishes(1);
        assert!(transport.publish("t", "x".to_string()).await.is_err());
        assert!(transport.publish("t", "x".to_string()).await.is_ok());
    }
}
