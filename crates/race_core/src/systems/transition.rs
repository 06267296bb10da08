//! End-of-leg bookkeeping shared by walking and riding.

use super::{StepContext, StepOutcome};
use crate::events::{BotAlighting, RaceEvent};
use crate::progress::{advance_progress, overall_progress};
use crate::state::{BotState, BotStatus, TrackingMode};

/// Advances past the current leg and enters the next leg's initial status, or
/// FINISHED when none remain.
pub(crate) fn complete_leg(state: &mut BotState, ctx: &StepContext<'_>) -> StepOutcome {
    let finished_index = state.current_leg_index;
    if let Some(leg) = ctx.legs.get(finished_index) {
        state.current_position = leg.alighting_position();
    }

    state.current_leg_index = (finished_index + 1).min(state.total_legs);
    state.leg_started_at = ctx.now;
    state.vehicle_ref = None;
    state.arrival_eta_seconds = None;
    state.retry_count = 0;
    state.tracking_mode = TrackingMode::Live;

    match ctx.legs.get(state.current_leg_index) {
        Some(next) if state.current_leg_index < state.total_legs => {
            state.status = BotStatus::entering(next.mode);
            state.progress_percent = advance_progress(
                state.progress_percent,
                overall_progress(ctx.legs, state.current_leg_index, 0.0),
            );
            StepOutcome::new(ctx.config.interval.default_interval_secs)
        }
        _ => finish(state, ctx),
    }
}

/// Marks the bot FINISHED with full progress.
pub(crate) fn finish(state: &mut BotState, ctx: &StepContext<'_>) -> StepOutcome {
    state.status = BotStatus::Finished;
    state.current_leg_index = state.total_legs;
    state.progress_percent = 100.0;
    state.vehicle_ref = None;
    state.arrival_eta_seconds = None;
    if let Some(last) = ctx.legs.last() {
        state.current_position = last.end.position();
    }
    let mut out = StepOutcome::new(0);
    out.finished = true;
    out
}

/// Leaves the vehicle at the end of the current leg.
pub(crate) fn alight(state: &mut BotState, ctx: &StepContext<'_>) -> StepOutcome {
    let leg_index = state.current_leg_index;
    let station_name = ctx
        .legs
        .get(leg_index)
        .map(|leg| {
            leg.alighting_stop()
                .map(|s| s.name.clone())
                .unwrap_or_else(|| leg.end.name.clone())
        })
        .unwrap_or_default();

    let mut out = complete_leg(state, ctx);
    out.events.insert(
        0,
        RaceEvent::BotAlighting(BotAlighting {
            participant_id: state.participant_id,
            bot_id: state.bot_id,
            leg_index,
            station_name,
            next_action: state.status,
            timestamp: ctx.now,
        }),
    );
    out
}
