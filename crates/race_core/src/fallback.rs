//! Time-based movement model used when live provider data is unavailable.

use crate::geo::{position_on_leg, Position};
use crate::itinerary::Leg;
use crate::progress::estimated_stop_index;

const WAIT_SHARE_OF_SECTION: f64 = 0.2;
const MIN_WAIT_SECS: f64 = 60.0;
const MAX_WAIT_SECS: f64 = 300.0;

/// Simulated boarding estimate while waiting at a stop.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FallbackArrival {
    pub eta_secs: u32,
    pub imminent: bool,
}

/// Simulated riding estimate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FallbackRide {
    pub position: Position,
    pub ratio: f64,
    pub stop_index: usize,
    pub should_alight: bool,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FallbackEstimator;

impl FallbackEstimator {
    /// Boarding wait for a leg: 20 % of its section time, clamped to 60..=300 s.
    pub fn boarding_wait_secs(&self, leg: &Leg) -> f64 {
        (f64::from(leg.section_time_seconds) * WAIT_SHARE_OF_SECTION).clamp(MIN_WAIT_SECS, MAX_WAIT_SECS)
    }

    pub fn arrival(&self, leg: &Leg, waited_secs: f64) -> FallbackArrival {
        let remaining = (self.boarding_wait_secs(leg) - waited_secs).max(0.0);
        FallbackArrival {
            eta_secs: remaining.ceil() as u32,
            imminent: remaining <= 0.0,
        }
    }

    /// Riding lasts exactly the section time; position follows the geometry.
    pub fn ride(&self, leg: &Leg, riding_secs: f64) -> FallbackRide {
        let section = f64::from(leg.section_time_seconds);
        let ratio = if section > 0.0 {
            (riding_secs / section).clamp(0.0, 1.0)
        } else {
            1.0
        };
        FallbackRide {
            position: position_on_leg(
                &leg.path_geometry,
                leg.start.position(),
                leg.alighting_position(),
                ratio,
            ),
            ratio,
            stop_index: estimated_stop_index(leg.ordered_stops.len(), ratio),
            should_alight: riding_secs >= section,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::itinerary::{LegMode, Place};

    fn bus_leg(section: u32) -> Leg {
        let start = Place {
            name: "A".to_string(),
            lon: 127.00,
            lat: 37.50,
        };
        let end = Place {
            name: "B".to_string(),
            lon: 127.02,
            lat: 37.50,
        };
        let mut leg = Leg::walk(start, end, section, 1_800.0);
        leg.mode = LegMode::Bus;
        leg
    }

    #[test]
    fn boarding_wait_is_clamped() {
        let est = FallbackEstimator;
        assert_eq!(est.boarding_wait_secs(&bus_leg(100)), 60.0);
        assert_eq!(est.boarding_wait_secs(&bus_leg(600)), 120.0);
        assert_eq!(est.boarding_wait_secs(&bus_leg(3_000)), 300.0);
    }

    #[test]
    fn arrival_becomes_imminent_after_wait() {
        let est = FallbackEstimator;
        let leg = bus_leg(300);
        assert_eq!(est.arrival(&leg, 20.0), FallbackArrival { eta_secs: 40, imminent: false });
        assert!(est.arrival(&leg, 60.0).imminent);
    }

    #[test]
    fn ride_interpolates_and_alights_at_section_time() {
        let est = FallbackEstimator;
        let leg = bus_leg(300);
        let half = est.ride(&leg, 150.0);
        assert!((half.ratio - 0.5).abs() < 1e-9);
        assert!((half.position.lon - 127.01).abs() < 1e-9);
        assert!(!half.should_alight);
        assert!(est.ride(&leg, 300.0).should_alight);
    }
}
