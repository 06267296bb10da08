//! Entry points used by the API layer: start, finish, cancel, and watch a race.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::RaceCoordinator;
use crate::bus::{EventBus, Subscription};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::itinerary::Leg;
use crate::persistence::{NewParticipant, ParticipantKind, RaceRepository};
use crate::schedule::{DelayQueue, TickRegistry};
use crate::state::{bot_state_key, transit_refs_key, BotState};
use crate::store::StateStore;
use crate::systems::SimulationScheduler;
use crate::transit::poller::TransitPoller;
use crate::transit::resolver::LegResolver;
use crate::transit::ResolvedTransitRefs;

/// Infrastructure the engine runs on.
pub struct EngineDeps {
    pub config: EngineConfig,
    pub store: StateStore,
    pub bus: EventBus,
    pub repository: Arc<dyn RaceRepository>,
    pub resolver: LegResolver,
    pub poller: TransitPoller,
    pub delay_queue: Arc<dyn DelayQueue>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BotEntry {
    pub bot_id: u64,
    pub legs: Vec<Leg>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StartRaceRequest {
    pub user_legs: Vec<Leg>,
    pub bots: Vec<BotEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaceStarted {
    pub race_group_id: u64,
    pub user_participant_id: u64,
    /// In the order of `StartRaceRequest::bots`.
    pub bot_participant_ids: Vec<u64>,
}

pub struct RaceService {
    config: EngineConfig,
    store: StateStore,
    bus: EventBus,
    repository: Arc<dyn RaceRepository>,
    resolver: LegResolver,
    clock: Arc<dyn Clock>,
    coordinator: Arc<RaceCoordinator>,
    scheduler: Arc<SimulationScheduler>,
}

impl RaceService {
    pub fn new(deps: EngineDeps) -> Self {
        let ticks = Arc::new(TickRegistry::new());
        let coordinator = Arc::new(RaceCoordinator::new(
            deps.store.clone(),
            deps.bus.clone(),
            Arc::clone(&deps.repository),
            Arc::clone(&ticks),
            Arc::clone(&deps.clock),
        ));
        let scheduler = Arc::new(SimulationScheduler::new(
            deps.store.clone(),
            Arc::clone(&deps.repository),
            deps.poller,
            deps.delay_queue,
            ticks,
            Arc::clone(&deps.clock),
            Arc::clone(&coordinator),
            deps.config.clone(),
        ));
        Self {
            config: deps.config,
            store: deps.store,
            bus: deps.bus,
            repository: deps.repository,
            resolver: deps.resolver,
            clock: deps.clock,
            coordinator,
            scheduler,
        }
    }

    /// Validates and resolves every itinerary, records the race, and arms each bot's
    /// first tick. Nothing is created when any bot leg fails to resolve.
    pub async fn start_race(&self, request: StartRaceRequest) -> EngineResult<RaceStarted> {
        if request.user_legs.is_empty() {
            return Err(EngineError::InvalidRequest("user itinerary has no legs".to_string()));
        }
        if let Some(bot) = request.bots.iter().find(|b| b.legs.is_empty()) {
            return Err(EngineError::InvalidRequest(format!("bot {} itinerary has no legs", bot.bot_id)));
        }

        let mut resolved: Vec<ResolvedTransitRefs> = Vec::with_capacity(request.bots.len());
        for bot in &request.bots {
            resolved.push(self.resolver.resolve_itinerary(&bot.legs).await?);
        }

        let now = self.clock.now();
        let mut participants = vec![NewParticipant {
            kind: ParticipantKind::User,
            legs: request.user_legs,
        }];
        participants.extend(request.bots.iter().map(|b| NewParticipant {
            kind: ParticipantKind::Bot { bot_id: b.bot_id },
            legs: b.legs.clone(),
        }));
        let created = self.repository.create_race(now, participants).await?;
        let Some((&user_participant_id, bot_participant_ids)) = created.participant_ids.split_first() else {
            return Err(EngineError::Repository("race created without participants".to_string()));
        };

        let ttl = self.store.default_ttl();
        let interval = self.config.interval.default_interval_secs;
        for ((bot, refs), &participant_id) in request.bots.iter().zip(&resolved).zip(bot_participant_ids) {
            let first = &bot.legs[0];
            let state = BotState::start(
                participant_id,
                bot.bot_id,
                created.race_group_id,
                first.mode,
                bot.legs.len(),
                first.start.position(),
                now,
                interval,
            );
            self.store.set(&bot_state_key(participant_id), &state, ttl).await?;
            self.store.set(&transit_refs_key(participant_id), refs, ttl).await?;
        }
        for &participant_id in bot_participant_ids {
            self.scheduler.arm(participant_id, 0);
        }

        info!(
            race_group_id = created.race_group_id,
            bots = bot_participant_ids.len(),
            "race started"
        );
        Ok(RaceStarted {
            race_group_id: created.race_group_id,
            user_participant_id,
            bot_participant_ids: bot_participant_ids.to_vec(),
        })
    }

    /// The user reached the destination. Returns the assigned rank, or `None` if the
    /// user had already ended.
    pub async fn finish_user(&self, user_participant_id: u64) -> EngineResult<Option<u32>> {
        self.coordinator.on_user_finished(user_participant_id).await
    }

    /// Cancels the race; `user_progress` maps user participant ids to their progress.
    pub async fn cancel_race(&self, race_group_id: u64, user_progress: &HashMap<u64, f64>) -> EngineResult<bool> {
        self.coordinator.on_race_canceled(race_group_id, user_progress).await
    }

    pub async fn subscribe(&self, race_group_id: u64) -> Subscription {
        self.bus.subscribe(race_group_id).await
    }

    pub async fn bot_state(&self, participant_id: u64) -> EngineResult<Option<BotState>> {
        Ok(self.store.get(&bot_state_key(participant_id)).await?)
    }

    pub fn scheduler(&self) -> &Arc<SimulationScheduler> {
        &self.scheduler
    }

    pub fn coordinator(&self) -> &Arc<RaceCoordinator> {
        &self.coordinator
    }

    pub fn repository(&self) -> &Arc<dyn RaceRepository> {
        &self.repository
    }
}
