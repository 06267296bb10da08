//! Live arrival and position polling. Every failure, timeout, or empty answer is
//! reported as `None`; callers fall back to time-based estimates.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::catalog::normalize_station_name;
use super::{BusArrival, BusProvider, LegRefs, RailArrival, RailProvider};
use crate::error::{EngineError, EngineResult, ProviderError};
use crate::geo::Position;

/// Upcoming vehicle at the boarding stop.
#[derive(Clone, Debug, PartialEq)]
pub struct LiveArrival {
    pub vehicle_id: String,
    pub eta_secs: Option<u32>,
    /// Provider says the vehicle is entering or at the stop.
    pub imminent: bool,
}

/// Where the tracked vehicle currently is.
#[derive(Clone, Debug, PartialEq)]
pub enum LivePosition {
    Bus {
        position: Position,
        current_stop: Option<String>,
    },
    Rail {
        station_name: String,
    },
}

const BUS_IMMINENT_MESSAGE: &str = "곧 도착";

#[derive(Clone, Default)]
pub struct TransitPoller {
    bus: Option<Arc<dyn BusProvider>>,
    rail: Option<Arc<dyn RailProvider>>,
    call_timeout: Duration,
}

impl TransitPoller {
    pub fn new(bus: Option<Arc<dyn BusProvider>>, rail: Option<Arc<dyn RailProvider>>, call_timeout: Duration) -> Self {
        Self {
            bus,
            rail,
            call_timeout,
        }
    }

    /// Poller with no providers; every leg is time-tracked.
    pub fn offline() -> Self {
        Self::default()
    }

    /// Whether a provider exists for the leg's mode.
    pub fn supports(&self, refs: &LegRefs) -> bool {
        match refs {
            LegRefs::Bus { .. } => self.bus.is_some(),
            LegRefs::Rail { .. } => self.rail.is_some(),
        }
    }

    pub async fn poll_arrival(&self, refs: &LegRefs) -> Option<LiveArrival> {
        match refs {
            LegRefs::Bus { route_id, board, .. } => {
                let bus = self.bus.as_ref()?;
                let arrivals = self.call("bus_arrivals", bus.arrivals(route_id, &board.id)).await?;
                pick_bus_arrival(&arrivals)
            }
            LegRefs::Rail { board_station, .. } => {
                let rail = self.rail.as_ref()?;
                let station = normalize_station_name(board_station);
                let arrivals = self.call("rail_arrivals", rail.station_arrivals(&station)).await?;
                pick_rail_arrival(&arrivals, refs).map(|a| LiveArrival {
                    vehicle_id: a.train_no.clone(),
                    eta_secs: a.eta_secs,
                    imminent: a.is_imminent(),
                })
            }
        }
    }

    pub async fn poll_vehicle_position(&self, refs: &LegRefs, vehicle_id: &str) -> Option<LivePosition> {
        match refs {
            LegRefs::Bus { .. } => {
                let bus = self.bus.as_ref()?;
                let found = self.call("bus_position", bus.vehicle_position(vehicle_id)).await??;
                Some(LivePosition::Bus {
                    position: found.position,
                    current_stop: found.current_stop,
                })
            }
            LegRefs::Rail { line_name, .. } => {
                let rail = self.rail.as_ref()?;
                let trains = self.call("train_positions", rail.train_positions(line_name)).await?;
                trains
                    .into_iter()
                    .find(|t| t.train_no == vehicle_id)
                    .map(|t| LivePosition::Rail {
                        station_name: t.station_name,
                    })
            }
        }
    }

    /// Bounded provider call. Failures surface as
    /// [`EngineError::ExternalDataUnavailable`] and are recovered to `None` here.
    async fn call<T>(&self, what: &'static str, fut: impl Future<Output = Result<T, ProviderError>>) -> Option<T> {
        match self.bounded(what, fut).await {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(call = what, error = %err, "no live data; falling back");
                None
            }
        }
    }

    async fn bounded<T>(
        &self,
        what: &'static str,
        fut: impl Future<Output = Result<T, ProviderError>>,
    ) -> EngineResult<T> {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(EngineError::ExternalDataUnavailable(format!("{what}: {err}"))),
            Err(_) => Err(EngineError::ExternalDataUnavailable(format!(
                "{what}: no answer within {} ms",
                self.call_timeout.as_millis()
            ))),
        }
    }
}

/// First vehicle, or the second when the first has no usable id.
fn pick_bus_arrival(arrivals: &[BusArrival]) -> Option<LiveArrival> {
    let usable = |a: &&BusArrival| a.vehicle_id.as_deref().is_some_and(|id| !id.is_empty() && id != "0");
    let chosen = arrivals.iter().take(2).find(usable)?;
    Some(LiveArrival {
        vehicle_id: chosen.vehicle_id.clone()?,
        eta_secs: chosen.eta_secs,
        imminent: chosen.message.contains(BUS_IMMINENT_MESSAGE),
    })
}

/// Arrival on the leg's line heading the leg's way: by direction label when known,
/// then by heading text naming an upcoming stop, the alighting station, or a
/// terminal on the route.
fn pick_rail_arrival<'a>(arrivals: &'a [RailArrival], refs: &LegRefs) -> Option<&'a RailArrival> {
    let LegRefs::Rail {
        line_id,
        direction,
        alight_station,
        stop_names,
        ..
    } = refs
    else {
        return None;
    };
    let on_line = || arrivals.iter().filter(move |a| a.line_id == *line_id);

    if let Some(direction) = direction {
        if let Some(found) = on_line().find(|a| direction.matches_label(&a.direction_label)) {
            return Some(found);
        }
        debug!(line_id, label = direction.provider_label(), "no arrival with matching direction label");
    }

    let stops: Vec<String> = stop_names.iter().map(|s| normalize_station_name(s)).collect();
    let upcoming = stops.get(1..).unwrap_or_default();
    let destination = normalize_station_name(alight_station);
    on_line().find(|a| {
        upcoming.iter().any(|s| !s.is_empty() && a.train_line_name.contains(s.as_str()))
            || (!destination.is_empty() && a.train_line_name.contains(destination.as_str()))
            || stops.contains(&normalize_station_name(&a.terminal_station))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ScriptedBusProvider, ScriptedRailProvider};
    use crate::transit::{Direction, StationRef, TrainPosition, RAIL_ARRIVED};

    fn rail_refs(direction: Option<Direction>) -> LegRefs {
        LegRefs::Rail {
            line_id: "1002".to_string(),
            line_name: "2호선".to_string(),
            direction,
            board_station: "문래".to_string(),
            alight_station: "당산".to_string(),
            stop_names: vec!["문래".into(), "영등포구청".into(), "당산".into()],
        }
    }

    fn arrival(label: &str, heading: &str, train: &str, terminal: &str) -> RailArrival {
        RailArrival {
            line_id: "1002".to_string(),
            direction_label: label.to_string(),
            train_line_name: heading.to_string(),
            train_no: train.to_string(),
            terminal_station: terminal.to_string(),
            eta_secs: Some(120),
            arrival_code: 99,
            current_station: "도림천".to_string(),
        }
    }

    #[test]
    fn bus_arrival_skips_empty_first_vehicle() {
        let arrivals = vec![
            BusArrival {
                vehicle_id: Some("0".to_string()),
                eta_secs: None,
                message: "출발대기".to_string(),
            },
            BusArrival {
                vehicle_id: Some("111033".to_string()),
                eta_secs: Some(420),
                message: "7분후[3번째 전]".to_string(),
            },
        ];
        let picked = pick_bus_arrival(&arrivals).expect("arrival");
        assert_eq!(picked.vehicle_id, "111033");
        assert_eq!(picked.eta_secs, Some(420));
        assert!(!picked.imminent);
        assert!(pick_bus_arrival(&arrivals[..1]).is_none());
    }

    #[test]
    fn rail_arrival_prefers_direction_label() {
        let arrivals = vec![
            arrival("외선", "신도림행 - 영등포구청방면", "2201", "신도림"),
            arrival("내선", "성수행 - 도림천방면", "2156", "성수"),
        ];
        let picked = pick_rail_arrival(&arrivals, &rail_refs(Some(Direction::CounterClockwise))).expect("arrival");
        assert_eq!(picked.train_no, "2156");
    }

    #[test]
    fn rail_arrival_falls_back_to_heading_text() {
        let arrivals = vec![
            arrival("내선", "성수행 - 도림천방면", "2156", "성수"),
            arrival("외선", "홍대입구행 - 영등포구청방면", "2201", "홍대입구"),
        ];
        let picked = pick_rail_arrival(&arrivals, &rail_refs(None)).expect("arrival");
        assert_eq!(picked.train_no, "2201");

        let wrong_line = vec![RailArrival {
            line_id: "1005".to_string(),
            ..arrival("상행", "당산행", "5001", "당산")
        }];
        assert!(pick_rail_arrival(&wrong_line, &rail_refs(None)).is_none());
    }

    #[tokio::test]
    async fn failures_and_timeouts_become_none() {
        let bus = ScriptedBusProvider::seoul_fixture();
        bus.fail_arrivals(true);
        let rail = ScriptedRailProvider::new();
        rail.set_arrivals(
            "문래",
            vec![RailArrival {
                arrival_code: RAIL_ARRIVED,
                ..arrival("내선", "성수행 - 도림천방면", "2156", "성수")
            }],
        );
        rail.set_positions(
            "2호선",
            vec![TrainPosition {
                train_no: "2156".to_string(),
                station_name: "영등포구청".to_string(),
                direction_label: "0".to_string(),
                terminal_station: "성수".to_string(),
            }],
        );
        let poller = TransitPoller::new(Some(Arc::new(bus)), Some(Arc::new(rail)), Duration::from_secs(1));

        let bus_refs = LegRefs::Bus {
            route_id: "r".to_string(),
            route_name: "6625".to_string(),
            board: StationRef {
                id: "s".to_string(),
                name: "s".to_string(),
                position: Position::new(127.0, 37.5),
            },
            alight: StationRef {
                id: "t".to_string(),
                name: "t".to_string(),
                position: Position::new(127.01, 37.5),
            },
        };
        assert_eq!(poller.poll_arrival(&bus_refs).await, None);

        let refs = rail_refs(Some(Direction::CounterClockwise));
        let live = poller.poll_arrival(&refs).await.expect("arrival");
        assert!(live.imminent);
        assert_eq!(
            poller.poll_vehicle_position(&refs, "2156").await,
            Some(LivePosition::Rail {
                station_name: "영등포구청".to_string()
            })
        );
        assert_eq!(poller.poll_vehicle_position(&refs, "9999").await, None);
        assert!(TransitPoller::offline().poll_arrival(&refs).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn provider_outages_surface_as_unavailable_data() {
        let poller = TransitPoller::new(None, None, Duration::from_millis(500));

        let failed = poller
            .bounded("bus_arrivals", async { Err::<(), _>(ProviderError::Api("quota".to_string())) })
            .await;
        match failed {
            Err(EngineError::ExternalDataUnavailable(reason)) => assert_eq!(reason, "bus_arrivals: provider error: quota"),
            other => panic!("expected unavailable data, got {other:?}"),
        }

        let stalled = poller
            .bounded("train_positions", std::future::pending::<Result<(), ProviderError>>())
            .await;
        assert!(matches!(stalled, Err(EngineError::ExternalDataUnavailable(reason)) if reason.contains("500 ms")));

        let answered = poller.bounded("bus_position", async { Ok::<_, ProviderError>(7) }).await;
        assert_eq!(answered.ok(), Some(7));
    }
}
