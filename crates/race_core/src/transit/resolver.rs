//! Pre-flight resolution of itinerary legs into provider identifiers.

use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::direction::DirectionResolver;
use super::{
    line_id_for, normalize_line_name, parse_bus_number, BusProvider, BusRoute, BusStation, LegRefs,
    ResolvedTransitRefs, StationRef,
};
use crate::config::ProviderConfig;
use crate::error::{EngineError, EngineResult, ProviderError};
use crate::geo::haversine_m;
use crate::itinerary::{Leg, LegMode, Place};

/// Transit legs need at least this many stops (boarding, one intermediate, alighting).
pub const MIN_TRANSIT_STOPS: usize = 3;
const STATION_SEARCH_CHARS: usize = 10;

pub struct LegResolver {
    bus: Option<Arc<dyn BusProvider>>,
    direction: DirectionResolver,
    max_station_distance_m: f64,
    call_timeout: Duration,
    routes: Mutex<LruCache<String, Vec<BusRoute>>>,
    stations: Mutex<LruCache<String, Vec<BusStation>>>,
    route_stops: Mutex<LruCache<String, Vec<String>>>,
}

impl LegResolver {
    pub fn new(bus: Option<Arc<dyn BusProvider>>, direction: DirectionResolver, config: &ProviderConfig) -> Self {
        let capacity = NonZeroUsize::new(config.cache_capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            bus,
            direction,
            max_station_distance_m: config.max_station_distance_m,
            call_timeout: config.call_timeout(),
            routes: Mutex::new(LruCache::new(capacity)),
            stations: Mutex::new(LruCache::new(capacity)),
            route_stops: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Resolves every leg, failing on the first transit leg that cannot be tracked.
    pub async fn resolve_itinerary(&self, legs: &[Leg]) -> EngineResult<ResolvedTransitRefs> {
        let mut resolved = Vec::with_capacity(legs.len());
        for (index, leg) in legs.iter().enumerate() {
            resolved.push(self.resolve_leg(index, leg).await?);
        }
        Ok(ResolvedTransitRefs { legs: resolved })
    }

    /// Identifiers for one leg. Walk legs resolve to `None`, as do bus legs when no
    /// bus provider is configured (they are then tracked by time alone).
    pub async fn resolve_leg(&self, index: usize, leg: &Leg) -> EngineResult<Option<LegRefs>> {
        if leg.mode == LegMode::Walk {
            return Ok(None);
        }
        if leg.ordered_stops.len() < MIN_TRANSIT_STOPS {
            return Err(reject(
                index,
                format!("only {} stops listed, need at least {MIN_TRANSIT_STOPS}", leg.ordered_stops.len()),
            ));
        }
        let label = leg
            .route_label
            .as_deref()
            .filter(|l| !l.trim().is_empty())
            .ok_or_else(|| reject(index, "missing route label"))?;

        match leg.mode {
            LegMode::Bus => self.resolve_bus(index, leg, label).await,
            LegMode::Rail => self.resolve_rail(index, leg, label).map(Some),
            LegMode::Walk => Ok(None),
        }
    }

    fn resolve_rail(&self, index: usize, leg: &Leg, label: &str) -> EngineResult<LegRefs> {
        let line_id = line_id_for(label).ok_or_else(|| reject(index, format!("unknown line {label:?}")))?;
        let stop_names = leg.stop_names();
        let direction = self.direction.resolve(&stop_names, line_id);
        if direction.is_none() {
            warn!(leg_index = index, line_id, "direction unresolved; arrivals will match by heading");
        }
        Ok(LegRefs::Rail {
            line_id: line_id.to_string(),
            line_name: normalize_line_name(label),
            direction,
            board_station: stop_names.first().cloned().unwrap_or_else(|| leg.start.name.clone()),
            alight_station: stop_names.last().cloned().unwrap_or_else(|| leg.end.name.clone()),
            stop_names,
        })
    }

    async fn resolve_bus(&self, index: usize, leg: &Leg, label: &str) -> EngineResult<Option<LegRefs>> {
        let Some(bus) = self.bus.clone() else {
            debug!(leg_index = index, "no bus provider; leg will be time-tracked");
            return Ok(None);
        };
        let number = parse_bus_number(label).to_string();

        let cached = self.routes.lock().get(&number).cloned();
        let routes = match cached {
            Some(hit) => hit,
            None => {
                let fetched = self.call(index, bus.find_routes(&number)).await?;
                self.routes.lock().put(number.clone(), fetched.clone());
                fetched
            }
        };
        let route = routes
            .into_iter()
            .find(|r| r.route_name == number)
            .ok_or_else(|| reject(index, format!("bus route {number:?} not found")))?;

        let board = self.locate_station(index, &bus, &leg.start, &route.route_id).await?;
        let alight = self.locate_station(index, &bus, &leg.end, &route.route_id).await?;
        Ok(Some(LegRefs::Bus {
            route_id: route.route_id,
            route_name: route.route_name,
            board,
            alight,
        }))
    }

    /// Picks the stop named `place.name` closest to the place's coordinate, checking
    /// route membership when the name is shared by several stops.
    async fn locate_station(
        &self,
        index: usize,
        bus: &Arc<dyn BusProvider>,
        place: &Place,
        route_id: &str,
    ) -> EngineResult<StationRef> {
        let search: String = place.name.chars().take(STATION_SEARCH_CHARS).collect();
        let cached = self.stations.lock().get(&search).cloned();
        let candidates = match cached {
            Some(hit) => hit,
            None => {
                let fetched = self.call(index, bus.find_stations(&search)).await?;
                self.stations.lock().put(search.clone(), fetched.clone());
                fetched
            }
        };

        let target = place.position();
        let mut exact: Vec<(f64, BusStation)> = candidates
            .into_iter()
            .filter(|s| s.name.trim() == place.name.trim())
            .map(|s| (haversine_m(target, s.position), s))
            .collect();
        exact.sort_by(|a, b| a.0.total_cmp(&b.0));

        let chosen = if exact.len() > 1 {
            let served = self.served_station_ids(index, bus, route_id).await?;
            exact
                .into_iter()
                .find(|(_, s)| served.iter().any(|id| *id == s.station_id))
                .ok_or_else(|| reject(index, format!("no stop named {:?} on route {route_id}", place.name)))?
        } else {
            exact
                .pop()
                .ok_or_else(|| reject(index, format!("stop {:?} not found", place.name)))?
        };

        let (distance, station) = chosen;
        if distance > self.max_station_distance_m {
            return Err(reject(
                index,
                format!("stop {:?} is {distance:.0} m from the itinerary point", station.name),
            ));
        }
        Ok(StationRef {
            id: station.station_id,
            name: station.name,
            position: station.position,
        })
    }

    async fn served_station_ids(&self, index: usize, bus: &Arc<dyn BusProvider>, route_id: &str) -> EngineResult<Vec<String>> {
        let cached = self.route_stops.lock().get(route_id).cloned();
        if let Some(hit) = cached {
            return Ok(hit);
        }
        let fetched = self.call(index, bus.route_station_ids(route_id)).await?;
        self.route_stops.lock().put(route_id.to_string(), fetched.clone());
        Ok(fetched)
    }

    async fn call<T>(&self, index: usize, fut: impl Future<Output = Result<T, ProviderError>>) -> EngineResult<T> {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(reject(index, format!("provider error: {err}"))),
            Err(_) => Err(reject(index, ProviderError::Timeout.to_string())),
        }
    }
}

fn reject(leg_index: usize, reason: impl Into<String>) -> EngineError {
    let reason = reason.into();
    warn!(leg_index, reason = %reason, "transit leg rejected");
    EngineError::UnresolvableTransitLeg { leg_index, reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::itinerary::StopPoint;
    use crate::test_helpers::{ScriptedBusProvider, TEST_BUS_ROUTE_ID};
    use crate::transit::catalog::StationCatalog;
    use crate::transit::Direction;

    fn place(name: &str, lon: f64, lat: f64) -> Place {
        Place {
            name: name.to_string(),
            lon,
            lat,
        }
    }

    fn transit_leg(mode: LegMode, label: &str, start: Place, end: Place, stops: &[&str]) -> Leg {
        let mut leg = Leg::walk(start, end, 300, 2_000.0);
        leg.mode = mode;
        leg.route_label = Some(label.to_string());
        leg.ordered_stops = stops.iter().map(|s| StopPoint::named(*s)).collect();
        leg
    }

    fn resolver(bus: Option<Arc<dyn BusProvider>>) -> LegResolver {
        let catalog = StationCatalog::new().with_line("1009", &["신논현", "언주", "선정릉", "삼성중앙"], 900);
        LegResolver::new(bus, DirectionResolver::new(Arc::new(catalog)), &ProviderConfig::default())
    }

    #[tokio::test]
    async fn same_named_stops_resolve_to_the_route_side_nearest_the_point() {
        let provider = ScriptedBusProvider::seoul_fixture();
        let resolver = resolver(Some(Arc::new(provider)));
        let leg = transit_leg(
            LegMode::Bus,
            "지선:6625",
            place("신림역", 126.92961, 37.48426),
            place("관악구청", 126.95140, 37.47830),
            &["신림역", "신림사거리", "관악구청"],
        );

        let refs = resolver.resolve_leg(1, &leg).await.expect("resolved").expect("bus refs");
        match refs {
            LegRefs::Bus { route_id, board, alight, .. } => {
                assert_eq!(route_id, TEST_BUS_ROUTE_ID);
                assert_eq!(board.id, "st-sillim-north");
                assert_eq!(alight.id, "st-gwanak");
            }
            other => panic!("unexpected refs {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_route_is_rejected() {
        let resolver = resolver(Some(Arc::new(ScriptedBusProvider::seoul_fixture())));
        let leg = transit_leg(
            LegMode::Bus,
            "간선:999",
            place("신림역", 126.92961, 37.48426),
            place("관악구청", 126.95140, 37.47830),
            &["신림역", "신림사거리", "관악구청"],
        );
        let err = resolver.resolve_leg(2, &leg).await.expect_err("rejected");
        assert!(matches!(err, EngineError::UnresolvableTransitLeg { leg_index: 2, .. }));
    }

    #[tokio::test]
    async fn far_away_stop_is_rejected() {
        let resolver = resolver(Some(Arc::new(ScriptedBusProvider::seoul_fixture())));
        let leg = transit_leg(
            LegMode::Bus,
            "6625",
            place("신림역", 127.10, 37.60),
            place("관악구청", 126.95140, 37.47830),
            &["신림역", "신림사거리", "관악구청"],
        );
        assert!(resolver.resolve_leg(0, &leg).await.is_err());
    }

    #[tokio::test]
    async fn short_stop_lists_are_rejected() {
        let resolver = resolver(None);
        let leg = transit_leg(
            LegMode::Rail,
            "9호선",
            place("신논현", 127.025, 37.504),
            place("언주", 127.034, 37.507),
            &["신논현", "언주"],
        );
        let err = resolver.resolve_leg(0, &leg).await.expect_err("rejected");
        assert!(err.to_string().contains("need at least 3"));
    }

    #[tokio::test]
    async fn rail_leg_keeps_stops_and_direction() {
        let resolver = resolver(None);
        let leg = transit_leg(
            LegMode::Rail,
            "수도권9호선(급행)",
            place("신논현", 127.025, 37.504),
            place("삼성중앙", 127.053, 37.513),
            &["신논현", "언주", "선정릉", "삼성중앙"],
        );
        let refs = resolver.resolve_leg(0, &leg).await.expect("ok").expect("rail refs");
        match refs {
            LegRefs::Rail { line_id, line_name, direction, stop_names, .. } => {
                assert_eq!(line_id, "1009");
                assert_eq!(line_name, "9호선");
                assert_eq!(direction, Some(Direction::Inbound));
                assert_eq!(stop_names.len(), 4);
            }
            other => panic!("unexpected refs {other:?}"),
        }
    }

    #[tokio::test]
    async fn bus_legs_without_provider_are_time_tracked() {
        let resolver = resolver(None);
        let leg = transit_leg(
            LegMode::Bus,
            "6625",
            place("a", 127.0, 37.5),
            place("c", 127.01, 37.5),
            &["a", "b", "c"],
        );
        assert_eq!(resolver.resolve_leg(0, &leg).await.expect("ok"), None);
    }
}
