use std::sync::Arc;
use std::time::Duration;

use race_core::bus::{Delivery, EventBus, InMemoryTransport, Subscription};
use race_core::clock::{Clock, ManualClock};
use race_core::config::EngineConfig;
use race_core::events::RaceEvent;
use race_core::persistence::{InMemoryRaceRepository, RaceParticipant, RaceRepository};
use race_core::race::{EngineDeps, RaceService};
use race_core::state::BotState;
use race_core::store::{InMemoryKeyValueStore, StateStore};
use race_core::test_helpers::{test_start, ManualDelayQueue, ScriptedBusProvider, ScriptedRailProvider};
use race_core::transit::catalog::StationCatalog;
use race_core::transit::direction::DirectionResolver;
use race_core::transit::poller::TransitPoller;
use race_core::transit::resolver::LegResolver;
use race_core::transit::{BusProvider, RailProvider};

/// Builder for an engine on in-memory infrastructure and a manual clock.
#[derive(Default)]
pub struct RaceFixtureBuilder {
    config: EngineConfig,
    bus: Option<Arc<ScriptedBusProvider>>,
    rail: Option<Arc<ScriptedRailProvider>>,
    catalog: StationCatalog,
}

impl RaceFixtureBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_bus(mut self, bus: Arc<ScriptedBusProvider>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_rail(mut self, rail: Arc<ScriptedRailProvider>) -> Self {
        self.rail = Some(rail);
        self
    }

    pub fn with_catalog(mut self, catalog: StationCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn build(self) -> RaceFixture {
        let clock = ManualClock::new(test_start());
        let queue = Arc::new(ManualDelayQueue::new(clock.clone()));
        let transport = Arc::new(InMemoryTransport::new());
        let kv = Arc::new(InMemoryKeyValueStore::new());
        let repository = Arc::new(InMemoryRaceRepository::new());
        let store = StateStore::new(kv.clone(), self.config.store.clone());
        let bus = EventBus::new(transport.clone(), self.config.bus.clone());

        let bus_provider = self.bus.clone().map(|b| b as Arc<dyn BusProvider>);
        let rail_provider = self.rail.clone().map(|r| r as Arc<dyn RailProvider>);
        let resolver = LegResolver::new(
            bus_provider.clone(),
            DirectionResolver::new(Arc::new(self.catalog)),
            &self.config.provider,
        );
        let poller = TransitPoller::new(bus_provider, rail_provider, self.config.provider.call_timeout());

        let service = RaceService::new(EngineDeps {
            config: self.config,
            store: store.clone(),
            bus,
            repository: repository.clone(),
            resolver,
            poller,
            delay_queue: queue.clone(),
            clock: Arc::new(clock.clone()),
        });

        RaceFixture {
            clock,
            queue,
            transport,
            kv,
            repository,
            store,
            service,
            bus: self.bus,
        }
    }
}

pub struct RaceFixture {
    pub clock: ManualClock,
    pub queue: Arc<ManualDelayQueue>,
    pub transport: Arc<InMemoryTransport>,
    pub kv: Arc<InMemoryKeyValueStore>,
    pub repository: Arc<InMemoryRaceRepository>,
    pub store: StateStore,
    pub service: RaceService,
    pub bus: Option<Arc<ScriptedBusProvider>>,
}

impl RaceFixture {
    pub fn fallback_only() -> Self {
        RaceFixtureBuilder::new().build()
    }

    /// Seconds since the race clock started.
    pub fn elapsed_secs(&self) -> i64 {
        (self.clock.now() - test_start()).num_seconds()
    }

    /// Runs every tick due up to `secs` after the start.
    pub async fn run_to(&self, secs: i64) -> usize {
        self.queue
            .run_until(test_start() + chrono::Duration::seconds(secs))
            .await
    }

    pub async fn bot_state(&self, participant_id: u64) -> Option<BotState> {
        self.service.bot_state(participant_id).await.expect("bot state read")
    }

    pub async fn participant(&self, participant_id: u64) -> RaceParticipant {
        self.repository
            .participant(participant_id)
            .await
            .expect("repository read")
            .expect("participant exists")
    }

    pub async fn subscribe(&self, race_group_id: u64) -> Subscription {
        self.service
            .subscribe(race_group_id)
            .await
            .with_heartbeat(Duration::from_millis(50))
    }
}

/// Events buffered on `subscription`, stopping at the first idle window or the end
/// of the stream.
pub async fn drain(subscription: &mut Subscription) -> Vec<RaceEvent> {
    let mut events = Vec::new();
    while let Some(Delivery::Event(event)) = subscription.next().await {
        events.push(event);
    }
    events
}
