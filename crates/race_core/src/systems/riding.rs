//! RIDING: follow the vehicle until the alighting stop.
//!
//! Alighting triggers, first match wins: the short-hop override, the live position
//! reaching the alighting stop, and the time backstop (a fraction of section time
//! when tracking live, the full section time when simulated).

use super::{transition, Observation, StepContext, StepOutcome};
use crate::events::{VehicleInfo, VehicleTracking};
use crate::geo::{position_on_leg, Position};
use crate::itinerary::Leg;
use crate::progress::{advance_progress, overall_progress};
use crate::state::{BotState, BotStatus, VehicleKind, VehicleRef};
use crate::transit::catalog::normalize_station_name;
use crate::transit::LegRefs;
use crate::transit::poller::LivePosition;

pub(crate) fn step(state: &mut BotState, ctx: &StepContext<'_>, observation: Observation) -> StepOutcome {
    let Some(leg) = ctx.legs.get(state.current_leg_index) else {
        return transition::finish(state, ctx);
    };
    let kind = match state.status {
        BotStatus::RidingVehicle(kind) => kind,
        _ => VehicleKind::Bus,
    };
    let elapsed = state.elapsed_secs(ctx.now);
    let section = f64::from(leg.section_time_seconds);
    let movement = &ctx.config.movement;

    if leg.distance_m < movement.short_hop_distance_m && elapsed >= movement.short_hop_elapsed_secs {
        return transition::alight(state, ctx);
    }

    let live = matches!(state.vehicle_ref, Some(VehicleRef::Live(_)));
    let backstop = match kind {
        VehicleKind::Bus => movement.bus_backstop_ratio,
        VehicleKind::Rail => movement.rail_backstop_ratio,
    };

    let reading = match observation {
        Observation::Position(Some(LivePosition::Bus { position, current_stop })) if live => {
            let at_stop = position.distance_m(&alighting_stop(leg, ctx.refs)) <= movement.alight_radius_m;
            Reading {
                ratio: time_ratio(elapsed, section),
                position: Some(position),
                current_stop,
                arrived: at_stop,
                tracking: VehicleTracking::Live,
            }
        }
        Observation::Position(Some(LivePosition::Rail { station_name })) if live => {
            rail_reading(leg, &station_name, time_ratio(elapsed, section))
        }
        Observation::Position(None) if live => Reading {
            ratio: time_ratio(elapsed, section),
            position: None,
            current_stop: None,
            arrived: false,
            tracking: VehicleTracking::Searching,
        },
        _ => {
            let ride = ctx.fallback.ride(leg, elapsed);
            Reading {
                ratio: ride.ratio,
                position: Some(ride.position),
                current_stop: leg.ordered_stops.get(ride.stop_index).map(|s| s.name.clone()),
                arrived: ride.should_alight,
                tracking: VehicleTracking::Simulated,
            }
        }
    };

    let timed_out = reading.tracking != VehicleTracking::Simulated && elapsed >= backstop * section;
    if reading.arrived || timed_out {
        return transition::alight(state, ctx);
    }

    state.current_position = reading.position.unwrap_or_else(|| {
        position_on_leg(
            &leg.path_geometry,
            leg.start.position(),
            leg.alighting_position(),
            reading.ratio,
        )
    });
    state.progress_percent = advance_progress(
        state.progress_percent,
        overall_progress(ctx.legs, state.current_leg_index, reading.ratio * section),
    );

    let remaining = (section - elapsed).max(0.0).ceil() as u32;
    let interval = match reading.tracking {
        VehicleTracking::Live => ctx.config.interval.for_eta(Some(remaining)),
        _ => ctx.config.interval.default_interval_secs,
    };
    let mut out = StepOutcome::new(interval);
    out.vehicle = Some(VehicleInfo {
        current_stop: reading.current_stop,
        ..ctx.vehicle_info(reading.tracking, state)
    });
    out
}

struct Reading {
    ratio: f64,
    position: Option<Position>,
    current_stop: Option<String>,
    arrived: bool,
    tracking: VehicleTracking,
}

/// The resolved station when the route lookup found one, else the itinerary's.
fn alighting_stop(leg: &Leg, refs: Option<&LegRefs>) -> Position {
    match refs {
        Some(LegRefs::Bus { alight, .. }) => alight.position,
        _ => leg.alighting_position(),
    }
}

fn time_ratio(elapsed: f64, section: f64) -> f64 {
    if section > 0.0 {
        (elapsed / section).clamp(0.0, 1.0)
    } else {
        1.0
    }
}

/// Station-based progress wins over time when the train is ahead of schedule.
fn rail_reading(leg: &Leg, station_name: &str, by_time: f64) -> Reading {
    let reported = normalize_station_name(station_name);
    let stops: Vec<String> = leg.ordered_stops.iter().map(|s| normalize_station_name(&s.name)).collect();
    let last = stops.len().saturating_sub(1);
    let index = stops.iter().position(|s| *s == reported);

    let by_station = match index {
        Some(i) if last > 0 => i as f64 / last as f64,
        _ => 0.0,
    };
    let arrived = index.is_some_and(|i| i >= last) || stops.last().is_some_and(|s| *s == reported);
    Reading {
        ratio: by_station.max(by_time).min(1.0),
        position: None,
        current_stop: Some(station_name.to_string()),
        arrived,
        tracking: VehicleTracking::Live,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::itinerary::{LegMode, Place, StopPoint};

    fn rail_leg() -> Leg {
        let place = |name: &str, lon: f64| Place {
            name: name.to_string(),
            lon,
            lat: 37.5,
        };
        let mut leg = Leg::walk(place("문래", 126.89), place("당산", 126.90), 240, 3_000.0);
        leg.mode = LegMode::Rail;
        leg.ordered_stops = ["문래", "영등포구청", "당산역"].into_iter().map(StopPoint::named).collect();
        leg
    }

    #[test]
    fn rail_station_progress_beats_time() {
        let reading = rail_reading(&rail_leg(), "영등포구청", 0.1);
        assert!((reading.ratio - 0.5).abs() < 1e-9);
        assert!(!reading.arrived);
    }

    #[test]
    fn rail_arrival_at_alighting_station() {
        assert!(rail_reading(&rail_leg(), "당산", 0.2).arrived);
        let unknown = rail_reading(&rail_leg(), "합정", 0.3);
        assert!(!unknown.arrived);
        assert!((unknown.ratio - 0.3).abs() < 1e-9);
    }
}
