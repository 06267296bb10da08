use super::{transition, StepContext, StepOutcome};
use crate::geo::position_on_leg;
use crate::progress::{advance_progress, overall_progress};
use crate::state::BotState;

pub(crate) fn step(state: &mut BotState, ctx: &StepContext<'_>) -> StepOutcome {
    let Some(leg) = ctx.legs.get(state.current_leg_index) else {
        return transition::finish(state, ctx);
    };

    let elapsed = state.elapsed_secs(ctx.now);
    let section = f64::from(leg.section_time_seconds);
    if elapsed >= section {
        return transition::complete_leg(state, ctx);
    }

    let ratio = if section > 0.0 { elapsed / section } else { 1.0 };
    state.current_position = position_on_leg(&leg.path_geometry, leg.start.position(), leg.end.position(), ratio);
    state.progress_percent = advance_progress(
        state.progress_percent,
        overall_progress(ctx.legs, state.current_leg_index, elapsed),
    );
    StepOutcome::new(ctx.config.interval.default_interval_secs)
}
