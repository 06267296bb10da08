//! Per-bot tick systems and the self-rescheduling scheduler that drives them.
//!
//! A tick observes live data outside the state lock, then runs one pure step
//! (`walking`, `waiting`, or `riding`) under `update_atomic`. Everything the step
//! decides comes back as a [`StepOutcome`] that the scheduler publishes.

pub(crate) mod riding;
pub(crate) mod transition;
pub(crate) mod waiting;
pub(crate) mod walking;

use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::events::{BotStatusUpdate, RaceEvent, VehicleInfo, VehicleTracking};
use crate::fallback::FallbackEstimator;
use crate::itinerary::Leg;
use crate::persistence::{RaceParticipant, RaceRepository};
use crate::race::RaceCoordinator;
use crate::schedule::{DelayQueue, TickRegistry};
use crate::state::{bot_state_key, transit_refs_key, BotState, BotStatus, TrackingMode, VehicleRef};
use crate::store::StateStore;
use crate::transit::poller::{LiveArrival, LivePosition, TransitPoller};
use crate::transit::{LegRefs, ResolvedTransitRefs};

/// Inputs of one step. Borrowed for the duration of the locked mutation.
pub(crate) struct StepContext<'a> {
    pub now: DateTime<Utc>,
    pub legs: &'a [Leg],
    pub refs: Option<&'a LegRefs>,
    pub config: &'a EngineConfig,
    pub fallback: FallbackEstimator,
}

impl StepContext<'_> {
    pub fn vehicle_info(&self, tracking: VehicleTracking, state: &BotState) -> VehicleInfo {
        let route = self.refs.map(|r| r.route_label().to_string()).or_else(|| {
            self.legs
                .get(state.current_leg_index)
                .and_then(|leg| leg.route_label.clone())
        });
        VehicleInfo {
            tracking,
            route,
            vehicle_ref: state.vehicle_ref.clone(),
            eta_seconds: state.arrival_eta_seconds,
            current_stop: None,
        }
    }
}

/// What a step decided beyond the state mutation itself.
#[derive(Debug, Default)]
pub(crate) struct StepOutcome {
    pub events: Vec<RaceEvent>,
    pub vehicle: Option<VehicleInfo>,
    pub next_interval_secs: u32,
    pub finished: bool,
}

impl StepOutcome {
    pub fn new(next_interval_secs: u32) -> Self {
        Self {
            next_interval_secs,
            ..Self::default()
        }
    }
}

/// Live data gathered before taking the lock.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Observation {
    /// Nothing to observe for this status.
    Nothing,
    /// The leg has no live coverage.
    Untracked,
    Arrival(Option<LiveArrival>),
    Position(Option<LivePosition>),
}

/// Result of one tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another tick is due after this many seconds.
    Rescheduled(u32),
    /// The bot reached its destination during this tick.
    Finished,
    /// The bot is no longer racing; nothing was scheduled.
    Stopped,
}

/// Runs bot ticks and re-arms them through the delay queue.
pub struct SimulationScheduler {
    store: StateStore,
    repository: Arc<dyn RaceRepository>,
    poller: TransitPoller,
    delay_queue: Arc<dyn DelayQueue>,
    ticks: Arc<TickRegistry>,
    clock: Arc<dyn Clock>,
    coordinator: Arc<RaceCoordinator>,
    config: EngineConfig,
    fallback: FallbackEstimator,
}

impl SimulationScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: StateStore,
        repository: Arc<dyn RaceRepository>,
        poller: TransitPoller,
        delay_queue: Arc<dyn DelayQueue>,
        ticks: Arc<TickRegistry>,
        clock: Arc<dyn Clock>,
        coordinator: Arc<RaceCoordinator>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            repository,
            poller,
            delay_queue,
            ticks,
            clock,
            coordinator,
            config,
            fallback: FallbackEstimator,
        }
    }

    pub fn ticks(&self) -> &Arc<TickRegistry> {
        &self.ticks
    }

    /// Schedules the participant's next tick `after_secs` from now, replacing any
    /// pending one.
    pub fn arm(self: &Arc<Self>, participant_id: u64, after_secs: u32) {
        let this = Arc::clone(self);
        let handle = self.delay_queue.schedule(
            Duration::from_secs(u64::from(after_secs)),
            Box::pin(async move {
                this.run_tick(participant_id).await;
            }),
        );
        self.ticks.arm(participant_id, handle);
    }

    /// Runs one tick within the time budgets and re-arms the next one.
    pub async fn run_tick(self: &Arc<Self>, participant_id: u64) {
        let budgets = &self.config.scheduler;
        let soft = Duration::from_secs(budgets.soft_budget_secs);
        let hard = Duration::from_secs(budgets.hard_budget_secs.max(budgets.soft_budget_secs));
        let default_interval = budgets.default_interval_secs;

        let mut tick = pin!(self.tick(participant_id));
        let mut over_soft = false;
        let result = match tokio::time::timeout(soft, &mut tick).await {
            Ok(result) => Ok(result),
            Err(_) => {
                over_soft = true;
                warn!(participant_id, budget_secs = soft.as_secs(), "tick exceeded soft budget");
                tokio::time::timeout(hard - soft, &mut tick)
                    .await
                    .map_err(|_| EngineError::SchedulerTimeout)
            }
        };

        match result {
            Ok(Ok(TickOutcome::Rescheduled(secs))) => {
                let secs = if over_soft { default_interval } else { secs };
                self.arm(participant_id, secs);
            }
            Ok(Ok(TickOutcome::Finished | TickOutcome::Stopped)) => {
                self.ticks.revoke(participant_id);
            }
            Ok(Err(EngineError::StaleOrMissingState)) => {
                debug!(participant_id, "bot state gone; treating bot as ended");
                self.ticks.revoke(participant_id);
                self.discard(participant_id).await;
            }
            Ok(Err(EngineError::LockContention { key })) => {
                debug!(participant_id, key = %key, "state locked; retrying later");
                self.arm(participant_id, default_interval);
            }
            Ok(Err(err)) => {
                warn!(participant_id, error = %err, "tick failed; retrying later");
                self.arm(participant_id, default_interval);
            }
            Err(err) => {
                warn!(participant_id, error = %err, budget_secs = hard.as_secs(), "tick aborted");
                self.arm(participant_id, default_interval);
            }
        }
    }

    /// One observe-step-publish cycle for a bot participant.
    pub async fn tick(&self, participant_id: u64) -> EngineResult<TickOutcome> {
        let Some(participant) = self.running_participant(participant_id).await? else {
            self.discard(participant_id).await;
            return Ok(TickOutcome::Stopped);
        };
        let key = bot_state_key(participant_id);
        let Some(snapshot) = self.store.get::<BotState>(&key).await? else {
            return Err(EngineError::StaleOrMissingState);
        };
        if snapshot.status.is_finished() {
            // Finished in an earlier tick that died before the coordinator ran.
            self.coordinator
                .on_bot_finished(participant_id, snapshot.race_group_id)
                .await?;
            self.discard(participant_id).await;
            return Ok(TickOutcome::Finished);
        }

        // Refs are written with the state at start and share its lifetime.
        let refs_key = transit_refs_key(participant_id);
        let Some(refs) = self.store.get::<ResolvedTransitRefs>(&refs_key).await? else {
            return Err(EngineError::StaleOrMissingState);
        };
        let leg_refs = refs.leg(snapshot.current_leg_index);
        let observation = self.observe(&snapshot, leg_refs).await;

        let ctx = StepContext {
            now: self.clock.now(),
            legs: &participant.legs,
            refs: leg_refs,
            config: &self.config,
            fallback: self.fallback,
        };
        let expected = (snapshot.status, snapshot.current_leg_index);
        let updated = self
            .store
            .update_atomic(&key, self.store.default_ttl(), |state: &mut BotState| {
                if (state.status, state.current_leg_index) != expected {
                    return None;
                }
                let outcome = step(state, &ctx, observation);
                state.next_poll_interval_seconds = outcome.next_interval_secs;
                Some(outcome)
            })
            .await?;

        if updated.is_some() {
            self.store.set(&refs_key, &refs, self.store.default_ttl()).await?;
        }
        let (state, outcome) = match updated {
            None => return Err(EngineError::StaleOrMissingState),
            Some((_, None)) => {
                debug!(participant_id, "state moved since observation; skipping step");
                return Ok(TickOutcome::Rescheduled(self.config.scheduler.default_interval_secs));
            }
            Some((state, Some(outcome))) => (state, outcome),
        };

        let StepOutcome {
            mut events,
            vehicle,
            next_interval_secs,
            finished,
        } = outcome;
        events.push(RaceEvent::BotStatusUpdate(BotStatusUpdate {
            participant_id,
            bot_id: state.bot_id,
            status: state.status,
            leg_index: state.current_leg_index,
            progress_percent: state.progress_percent,
            position: state.current_position,
            vehicle,
            next_update_in: next_interval_secs,
            timestamp: ctx.now,
        }));

        let group = state.race_group_id;
        if !self.coordinator.publish_if_running(participant_id, group, &events).await? {
            debug!(participant_id, race_group_id = group, "race ended during tick; dropping updates");
            self.discard(participant_id).await;
            return Ok(TickOutcome::Stopped);
        }

        if finished {
            info!(participant_id, race_group_id = group, "bot finished");
            self.coordinator.on_bot_finished(participant_id, group).await?;
            self.discard(participant_id).await;
            return Ok(TickOutcome::Finished);
        }
        Ok(TickOutcome::Rescheduled(next_interval_secs))
    }

    async fn observe(&self, snapshot: &BotState, refs: Option<&LegRefs>) -> Observation {
        match snapshot.status {
            BotStatus::Walking | BotStatus::Finished => Observation::Nothing,
            BotStatus::WaitingVehicle(_) => match refs {
                _ if snapshot.tracking_mode == TrackingMode::Fallback => Observation::Nothing,
                Some(refs) if self.poller.supports(refs) => Observation::Arrival(self.poller.poll_arrival(refs).await),
                _ => Observation::Untracked,
            },
            BotStatus::RidingVehicle(_) => match (&snapshot.vehicle_ref, refs) {
                (Some(VehicleRef::Live(vehicle_id)), Some(refs)) if self.poller.supports(refs) => {
                    Observation::Position(self.poller.poll_vehicle_position(refs, vehicle_id).await)
                }
                _ => Observation::Nothing,
            },
        }
    }

    async fn running_participant(&self, participant_id: u64) -> EngineResult<Option<RaceParticipant>> {
        Ok(self
            .repository
            .participant(participant_id)
            .await?
            .filter(|p| p.is_running()))
    }

    async fn discard(&self, participant_id: u64) {
        for key in [bot_state_key(participant_id), transit_refs_key(participant_id)] {
            if let Err(err) = self.store.delete(&key).await {
                warn!(participant_id, key = %key, error = %err, "failed to delete bot keys");
            }
        }
    }
}

fn step(state: &mut BotState, ctx: &StepContext<'_>, observation: Observation) -> StepOutcome {
    match state.status {
        BotStatus::Walking => walking::step(state, ctx),
        BotStatus::WaitingVehicle(_) => waiting::step(state, ctx, observation),
        BotStatus::RidingVehicle(_) => riding::step(state, ctx, observation),
        BotStatus::Finished => transition::finish(state, ctx),
    }
}
