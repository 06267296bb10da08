//! Transit provider seam: provider traits, provider records, and the per-leg
//! identifiers resolved once at race start.
//!
//! - [`resolver::LegResolver`] turns itinerary legs into [`LegRefs`].
//! - [`poller::TransitPoller`] polls arrivals and vehicle positions for resolved legs,
//!   mapping every failure to "no data".
//! - [`direction::DirectionResolver`] infers rail travel direction from the
//!   [`catalog::StationCatalog`].
//! - `seoul` (feature `seoul-api`) implements the providers over the Seoul open APIs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::geo::Position;

pub mod catalog;
pub mod direction;
pub mod poller;
pub mod resolver;
#[cfg(feature = "seoul-api")]
pub mod seoul;

pub use direction::Direction;

// ---------------------------------------------------------------------------
// Provider records
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusRoute {
    pub route_id: String,
    pub route_name: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BusStation {
    pub station_id: String,
    /// Short stop number printed on the stop sign.
    pub ars_id: String,
    pub name: String,
    pub position: Position,
}

/// One upcoming bus at a stop. Providers report the first and second vehicle.
#[derive(Clone, Debug, PartialEq)]
pub struct BusArrival {
    pub vehicle_id: Option<String>,
    pub eta_secs: Option<u32>,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VehiclePosition {
    pub vehicle_id: String,
    pub position: Position,
    pub current_stop: Option<String>,
}

/// Rail arrival code meaning the train is entering the station.
pub const RAIL_ENTERING: u8 = 0;
/// Rail arrival code meaning the train is at the platform.
pub const RAIL_ARRIVED: u8 = 1;

#[derive(Clone, Debug, PartialEq)]
pub struct RailArrival {
    pub line_id: String,
    pub direction_label: String,
    /// Heading text such as `"성수행 - 당산방면"`.
    pub train_line_name: String,
    pub train_no: String,
    pub terminal_station: String,
    pub eta_secs: Option<u32>,
    pub arrival_code: u8,
    pub current_station: String,
}

impl RailArrival {
    pub fn is_imminent(&self) -> bool {
        matches!(self.arrival_code, RAIL_ENTERING | RAIL_ARRIVED)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TrainPosition {
    pub train_no: String,
    pub station_name: String,
    pub direction_label: String,
    pub terminal_station: String,
}

// ---------------------------------------------------------------------------
// Provider traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait BusProvider: Send + Sync {
    async fn find_routes(&self, route_name: &str) -> Result<Vec<BusRoute>, ProviderError>;

    async fn find_stations(&self, name: &str) -> Result<Vec<BusStation>, ProviderError>;

    /// Station ids served by the route, in route order.
    async fn route_station_ids(&self, route_id: &str) -> Result<Vec<String>, ProviderError>;

    async fn arrivals(&self, route_id: &str, station_id: &str) -> Result<Vec<BusArrival>, ProviderError>;

    async fn vehicle_position(&self, vehicle_id: &str) -> Result<Option<VehiclePosition>, ProviderError>;
}

#[async_trait]
pub trait RailProvider: Send + Sync {
    async fn station_arrivals(&self, station_name: &str) -> Result<Vec<RailArrival>, ProviderError>;

    /// Train positions on a line, keyed by display name (e.g. `"2호선"`).
    async fn train_positions(&self, line_name: &str) -> Result<Vec<TrainPosition>, ProviderError>;
}

// ---------------------------------------------------------------------------
// Resolved identifiers
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StationRef {
    pub id: String,
    pub name: String,
    pub position: Position,
}

/// Provider identifiers for one transit leg.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum LegRefs {
    Bus {
        route_id: String,
        route_name: String,
        board: StationRef,
        alight: StationRef,
    },
    Rail {
        line_id: String,
        line_name: String,
        /// `None` when the catalog cannot place enough stops; arrivals are then
        /// matched by heading text only.
        direction: Option<Direction>,
        board_station: String,
        alight_station: String,
        stop_names: Vec<String>,
    },
}

impl LegRefs {
    pub fn route_label(&self) -> &str {
        match self {
            LegRefs::Bus { route_name, .. } => route_name,
            LegRefs::Rail { line_name, .. } => line_name,
        }
    }
}

/// Identifiers for every leg of one bot's itinerary; `None` for walk legs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedTransitRefs {
    pub legs: Vec<Option<LegRefs>>,
}

impl ResolvedTransitRefs {
    pub fn leg(&self, index: usize) -> Option<&LegRefs> {
        self.legs.get(index).and_then(Option::as_ref)
    }
}

// ---------------------------------------------------------------------------
// Label parsing
// ---------------------------------------------------------------------------

/// Display line names to provider line ids.
pub const SUBWAY_LINE_IDS: &[(&str, &str)] = &[
    ("1호선", "1001"),
    ("2호선", "1002"),
    ("3호선", "1003"),
    ("4호선", "1004"),
    ("5호선", "1005"),
    ("6호선", "1006"),
    ("7호선", "1007"),
    ("8호선", "1008"),
    ("9호선", "1009"),
    ("경의중앙선", "1063"),
    ("공항철도", "1065"),
    ("경춘선", "1067"),
    ("수인분당선", "1075"),
    ("신분당선", "1077"),
    ("우이신설선", "1092"),
    ("서해선", "1093"),
    ("경강선", "1081"),
    ("GTX-A", "1032"),
];

/// `"지선:6625"` -> `"6625"`.
pub fn parse_bus_number(label: &str) -> &str {
    label.rsplit_once(':').map_or(label, |(_, n)| n).trim()
}

/// Strips the metropolitan prefix and express qualifiers: `"수도권 9호선(급행)"` -> `"9호선"`.
pub fn normalize_line_name(label: &str) -> String {
    let mut name = label.trim();
    name = name.strip_prefix("수도권").unwrap_or(name).trim_start();
    for suffix in ["(급행)", "급행"] {
        if let Some(stripped) = name.strip_suffix(suffix) {
            name = stripped.trim_end();
        }
    }
    name.to_string()
}

pub fn line_id_for(label: &str) -> Option<&'static str> {
    let name = normalize_line_name(label);
    SUBWAY_LINE_IDS
        .iter()
        .find(|(display, _)| *display == name)
        .map(|(_, id)| *id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_numbers_drop_route_class() {
        assert_eq!(parse_bus_number("지선:6625"), "6625");
        assert_eq!(parse_bus_number("마을:서초15"), "서초15");
        assert_eq!(parse_bus_number("472"), "472");
    }

    #[test]
    fn line_names_map_to_ids() {
        assert_eq!(line_id_for("수도권2호선"), Some("1002"));
        assert_eq!(line_id_for("수도권 9호선(급행)"), Some("1009"));
        assert_eq!(line_id_for("9호선 급행"), Some("1009"));
        assert_eq!(line_id_for("수도권경의중앙선"), Some("1063"));
        assert_eq!(line_id_for("GTX-A"), Some("1032"));
        assert_eq!(line_id_for("부산1호선"), None);
    }

    #[test]
    fn rail_arrival_codes() {
        let mut arrival = RailArrival {
            line_id: "1002".into(),
            direction_label: "내선".into(),
            train_line_name: "성수행 - 당산방면".into(),
            train_no: "2156".into(),
            terminal_station: "성수".into(),
            eta_secs: Some(0),
            arrival_code: RAIL_ENTERING,
            current_station: "영등포구청".into(),
        };
        assert!(arrival.is_imminent());
        arrival.arrival_code = 3;
        assert!(!arrival.is_imminent());
    }
}
