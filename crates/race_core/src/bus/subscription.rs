use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, Stream};
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::{topic_for, BroadcastTransport};
use crate::config::BusConfig;
use crate::events::RaceEvent;

/// One item of a subscription.
#[derive(Clone, Debug, PartialEq)]
pub enum Delivery {
    Event(RaceEvent),
    /// Nothing arrived within the heartbeat window.
    Idle,
}

/// A viewer's stream of events for one race group.
///
/// Starts with `connected`, yields [`Delivery::Idle`] whenever the heartbeat window
/// passes quietly, reconnects with linear backoff when the channel is lost, and ends
/// after `race_ended` or `error`.
pub struct Subscription {
    transport: Arc<dyn BroadcastTransport>,
    race_group_id: u64,
    topic: String,
    config: BusConfig,
    heartbeat: Duration,
    rx: Option<mpsc::Receiver<String>>,
    greeted: bool,
    finished: bool,
    reconnect_attempt: u32,
    reconnect_pending: bool,
}

impl Subscription {
    pub(crate) async fn open(transport: Arc<dyn BroadcastTransport>, race_group_id: u64, config: BusConfig) -> Self {
        let topic = topic_for(race_group_id);
        let rx = match transport.open(&topic, config.subscriber_capacity).await {
            Ok(rx) => Some(rx),
            Err(err) => {
                warn!(topic = %topic, error = %err, "subscription open failed; will reconnect");
                None
            }
        };
        Self {
            transport,
            race_group_id,
            topic,
            heartbeat: Duration::from_secs(config.heartbeat_secs),
            config,
            rx,
            greeted: false,
            finished: false,
            reconnect_attempt: 0,
            reconnect_pending: false,
        }
    }

    /// Shortens or lengthens the idle window, e.g. to 5 s for a tight polling loop.
    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn race_group_id(&self) -> u64 {
        self.race_group_id
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Next delivery, or `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<Delivery> {
        if self.finished {
            return None;
        }
        if !self.greeted {
            self.greeted = true;
            return Some(Delivery::Event(RaceEvent::Connected {
                race_group_id: self.race_group_id,
            }));
        }

        loop {
            let Some(rx) = self.rx.as_mut() else {
                if let Some(event) = self.reconnect().await {
                    return Some(Delivery::Event(event));
                }
                continue;
            };

            match tokio::time::timeout(self.heartbeat, rx.recv()).await {
                Err(_) => return Some(Delivery::Idle),
                Ok(None) => {
                    warn!(topic = %self.topic, "subscription channel lost");
                    self.rx = None;
                }
                Ok(Some(raw)) => match serde_json::from_str::<RaceEvent>(&raw) {
                    Ok(event) => {
                        if event.is_terminal() {
                            self.finished = true;
                        }
                        return Some(Delivery::Event(event));
                    }
                    Err(err) => warn!(topic = %self.topic, error = %err, "skipping undecodable message"),
                },
            }
        }
    }

    /// One step of the reconnect loop. Returns an event to surface, or `None` when the
    /// channel was re-established.
    async fn reconnect(&mut self) -> Option<RaceEvent> {
        if self.reconnect_pending {
            self.reconnect_pending = false;
            let backoff = Duration::from_millis(self.config.reconnect_backoff_ms * u64::from(self.reconnect_attempt));
            tokio::time::sleep(backoff).await;
            match self.transport.open(&self.topic, self.config.subscriber_capacity).await {
                Ok(rx) => {
                    info!(topic = %self.topic, attempt = self.reconnect_attempt, "subscription reconnected");
                    self.rx = Some(rx);
                    self.reconnect_attempt = 0;
                    return None;
                }
                Err(err) => warn!(topic = %self.topic, attempt = self.reconnect_attempt, error = %err, "reconnect failed"),
            }
        }

        self.reconnect_attempt += 1;
        if self.reconnect_attempt > self.config.reconnect_attempts {
            self.finished = true;
            return Some(RaceEvent::Error {
                code: "connection_lost".to_string(),
                message: format!(
                    "gave up on {} after {} reconnect attempts",
                    self.topic, self.config.reconnect_attempts
                ),
            });
        }
        self.reconnect_pending = true;
        Some(RaceEvent::Reconnecting {
            attempt: self.reconnect_attempt,
        })
    }

    /// Deliveries as a stream.
    pub fn into_stream(self) -> impl Stream<Item = Delivery> + Send {
        stream::unfold(self, |mut sub| async move { sub.next().await.map(|d| (d, sub)) })
    }

    /// Events as a stream, with idle windows rendered as `heartbeat` events.
    pub fn into_events(self) -> impl Stream<Item = RaceEvent> + Send {
        stream::unfold(self, |mut sub| async move {
            let event = match sub.next().await? {
                Delivery::Event(event) => event,
                Delivery::Idle => RaceEvent::Heartbeat { timestamp: Utc::now() },
            };
            Some((event, sub))
        })
    }
}
