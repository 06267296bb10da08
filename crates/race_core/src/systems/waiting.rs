//! WAITING: poll arrivals at the boarding stop until a vehicle is imminent.

use tracing::{debug, info, warn};

use super::{Observation, StepContext, StepOutcome};
use crate::events::{BotBoarding, RaceEvent, VehicleTracking};
use crate::itinerary::Leg;
use crate::progress::{advance_progress, overall_progress};
use crate::retry::RetryDecision;
use crate::state::{BotState, BotStatus, TrackingMode, VehicleRef};
use crate::systems::transition;
use crate::transit::poller::LiveArrival;

pub(crate) fn step(state: &mut BotState, ctx: &StepContext<'_>, observation: Observation) -> StepOutcome {
    let Some(leg) = ctx.legs.get(state.current_leg_index) else {
        return transition::finish(state, ctx);
    };

    state.current_position = boarding_position(leg);
    // Waiting adds nothing beyond the completed legs.
    state.progress_percent = advance_progress(
        state.progress_percent,
        overall_progress(ctx.legs, state.current_leg_index, 0.0),
    );

    if state.tracking_mode == TrackingMode::Fallback {
        return wait_by_time(state, ctx, leg);
    }

    match observation {
        Observation::Arrival(Some(arrival)) => on_live_arrival(state, ctx, leg, arrival),
        Observation::Arrival(None) => on_missing_arrival(state, ctx, leg),
        Observation::Untracked => {
            state.tracking_mode = TrackingMode::Fallback;
            wait_by_time(state, ctx, leg)
        }
        Observation::Nothing | Observation::Position(_) => wait_by_time(state, ctx, leg),
    }
}

fn on_live_arrival(state: &mut BotState, ctx: &StepContext<'_>, leg: &Leg, arrival: LiveArrival) -> StepOutcome {
    state.retry_count = 0;
    let near = arrival
        .eta_secs
        .is_some_and(|eta| eta <= ctx.config.movement.boarding_eta_secs);
    if arrival.imminent || near {
        return board(state, ctx, leg, VehicleRef::Live(arrival.vehicle_id), VehicleTracking::Live);
    }

    state.arrival_eta_seconds = arrival.eta_secs;
    state.vehicle_ref = Some(VehicleRef::Live(arrival.vehicle_id));
    let mut out = StepOutcome::new(ctx.config.interval.for_eta(arrival.eta_secs));
    out.vehicle = Some(ctx.vehicle_info(VehicleTracking::Live, state));
    out
}

fn on_missing_arrival(state: &mut BotState, ctx: &StepContext<'_>, leg: &Leg) -> StepOutcome {
    state.retry_count += 1;
    match ctx.config.retry.decide(state.retry_count, ctx.now) {
        RetryDecision::Retry { attempt, after_secs } => {
            state.arrival_eta_seconds = None;
            let mut out = StepOutcome::new(after_secs);
            out.vehicle = Some(ctx.vehicle_info(VehicleTracking::Searching, state));
            debug!(
                participant_id = state.participant_id,
                leg_index = state.current_leg_index,
                attempt,
                after_secs,
                "no live arrival; retrying"
            );
            out
        }
        RetryDecision::Exhausted => {
            warn!(
                participant_id = state.participant_id,
                leg_index = state.current_leg_index,
                attempts = state.retry_count,
                "live arrivals unavailable; switching leg to time-based tracking"
            );
            state.retry_count = 0;
            state.tracking_mode = TrackingMode::Fallback;
            wait_by_time(state, ctx, leg)
        }
    }
}

fn wait_by_time(state: &mut BotState, ctx: &StepContext<'_>, leg: &Leg) -> StepOutcome {
    let estimate = ctx.fallback.arrival(leg, state.elapsed_secs(ctx.now));
    if estimate.imminent {
        return board(state, ctx, leg, VehicleRef::Fallback, VehicleTracking::Simulated);
    }
    state.arrival_eta_seconds = Some(estimate.eta_secs);
    state.vehicle_ref = Some(VehicleRef::Fallback);
    let mut out = StepOutcome::new(ctx.config.interval.default_interval_secs);
    out.vehicle = Some(ctx.vehicle_info(VehicleTracking::Simulated, state));
    out
}

fn board(
    state: &mut BotState,
    ctx: &StepContext<'_>,
    leg: &Leg,
    vehicle: VehicleRef,
    tracking: VehicleTracking,
) -> StepOutcome {
    let BotStatus::WaitingVehicle(kind) = state.status else {
        return StepOutcome::new(ctx.config.interval.default_interval_secs);
    };
    state.status = BotStatus::RidingVehicle(kind);
    state.leg_started_at = ctx.now;
    state.vehicle_ref = Some(vehicle);
    state.arrival_eta_seconds = None;
    state.retry_count = 0;

    let station_name = leg
        .ordered_stops
        .first()
        .map(|s| s.name.clone())
        .unwrap_or_else(|| leg.start.name.clone());
    info!(
        participant_id = state.participant_id,
        leg_index = state.current_leg_index,
        station = %station_name,
        "bot boarded"
    );

    let info = ctx.vehicle_info(tracking, state);
    let interval = match tracking {
        VehicleTracking::Live => ctx.config.interval.for_eta(Some(leg.section_time_seconds)),
        _ => ctx.config.interval.default_interval_secs,
    };
    let mut out = StepOutcome::new(interval);
    out.events.push(RaceEvent::BotBoarding(BotBoarding {
        participant_id: state.participant_id,
        bot_id: state.bot_id,
        leg_index: state.current_leg_index,
        station_name,
        vehicle: info.clone(),
        timestamp: ctx.now,
    }));
    out.vehicle = Some(info);
    out
}

fn boarding_position(leg: &Leg) -> crate::geo::Position {
    leg.ordered_stops
        .first()
        .and_then(|s| s.position)
        .unwrap_or_else(|| leg.start.position())
}
