//! Immutable itinerary input supplied by the itinerary collaborator.

use serde::{Deserialize, Serialize};

use crate::geo::Position;

/// Mode of one mode-homogeneous itinerary segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LegMode {
    Walk,
    Bus,
    #[serde(rename = "SUBWAY", alias = "RAIL")]
    Rail,
}

impl LegMode {
    pub fn is_transit(self) -> bool {
        !matches!(self, LegMode::Walk)
    }
}

/// Named endpoint of a leg.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub name: String,
    pub lon: f64,
    pub lat: f64,
}

impl Place {
    pub fn position(&self) -> Position {
        Position::new(self.lon, self.lat)
    }
}

/// A stop along a transit leg. Coordinates are optional; rail stop lists often
/// carry names only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StopPoint {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl StopPoint {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            position: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Leg {
    pub mode: LegMode,
    pub start: Place,
    pub end: Place,
    pub section_time_seconds: u32,
    #[serde(default)]
    pub distance_m: f64,
    /// Display label of the route or line, e.g. `"지선:6625"` or `"2호선"`.
    #[serde(default)]
    pub route_label: Option<String>,
    /// Boarding stop first, alighting stop last.
    #[serde(default)]
    pub ordered_stops: Vec<StopPoint>,
    #[serde(default)]
    pub path_geometry: Vec<Position>,
}

impl Leg {
    pub fn walk(start: Place, end: Place, section_time_seconds: u32, distance_m: f64) -> Self {
        Self {
            mode: LegMode::Walk,
            start,
            end,
            section_time_seconds,
            distance_m,
            route_label: None,
            ordered_stops: Vec::new(),
            path_geometry: Vec::new(),
        }
    }

    pub fn alighting_stop(&self) -> Option<&StopPoint> {
        self.ordered_stops.last()
    }

    /// Where a rider alights: the last stop's coordinate if known, else the leg end.
    pub fn alighting_position(&self) -> Position {
        self.alighting_stop()
            .and_then(|s| s.position)
            .unwrap_or_else(|| self.end.position())
    }

    pub fn stop_names(&self) -> Vec<String> {
        self.ordered_stops.iter().map(|s| s.name.clone()).collect()
    }
}

/// Sum of section times, in seconds, used as the progress denominator.
pub fn total_section_time(legs: &[Leg]) -> u64 {
    legs.iter().map(|l| u64::from(l.section_time_seconds)).sum()
}
