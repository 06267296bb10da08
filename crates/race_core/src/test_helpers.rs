//! Test helpers for common test setup and utilities.
//!
//! Scripted providers, a manual delay queue driven by [`ManualClock`], and leg
//! fixtures shared by unit tests, integration tests, benches, and the demo.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

use crate::clock::{Clock, ManualClock};
use crate::error::ProviderError;
use crate::geo::{haversine_m, Position};
use crate::itinerary::{Leg, LegMode, Place, StopPoint};
use crate::schedule::{CancelHandle, DelayQueue, Job};
use crate::transit::{
    BusArrival, BusProvider, BusRoute, BusStation, RailArrival, RailProvider, TrainPosition, VehiclePosition,
};

/// Route id of bus 6625 in [`ScriptedBusProvider::seoul_fixture`].
pub const TEST_BUS_ROUTE_ID: &str = "100100596";

/// Fixed race start used across tests: 12:00 Seoul time, outside quiet hours.
pub fn test_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 3, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

// ---------------------------------------------------------------------------
// Leg fixtures
// ---------------------------------------------------------------------------

pub fn place(name: &str, lon: f64, lat: f64) -> Place {
    Place {
        name: name.to_string(),
        lon,
        lat,
    }
}

pub fn walk_leg(start: Place, end: Place, section_time_seconds: u32) -> Leg {
    let distance = haversine_m(start.position(), end.position());
    Leg::walk(start, end, section_time_seconds, distance)
}

/// Transit leg whose stops are spread evenly between `start` and `end`.
pub fn transit_leg(mode: LegMode, label: &str, start: Place, end: Place, section_time_seconds: u32, stops: &[&str]) -> Leg {
    let mut leg = walk_leg(start, end, section_time_seconds);
    leg.mode = mode;
    leg.route_label = Some(label.to_string());
    let last = stops.len().saturating_sub(1).max(1) as f64;
    leg.ordered_stops = stops
        .iter()
        .enumerate()
        .map(|(i, name)| StopPoint {
            name: name.to_string(),
            position: Some(crate::geo::lerp(leg.start.position(), leg.end.position(), i as f64 / last)),
        })
        .collect();
    leg
}

/// WALK(90 s) + BUS(300 s) + WALK(60 s) around Sillim station.
pub fn sample_itinerary() -> Vec<Leg> {
    let home = place("집", 126.9270, 37.4850);
    let board = place("신림역", 126.92961, 37.48426);
    let alight = place("관악구청", 126.95140, 37.47830);
    let office = place("사무실", 126.9520, 37.4790);
    vec![
        walk_leg(home, board.clone(), 90),
        transit_leg(
            LegMode::Bus,
            "지선:6625",
            board,
            alight.clone(),
            300,
            &["신림역", "신림사거리", "관악구청"],
        ),
        walk_leg(alight, office, 60),
    ]
}

// ---------------------------------------------------------------------------
// Scripted providers
// ---------------------------------------------------------------------------

#[derive(Default)]
struct BusScript {
    routes: Vec<BusRoute>,
    stations: Vec<BusStation>,
    route_stations: HashMap<String, Vec<String>>,
    arrivals: HashMap<(String, String), Vec<BusArrival>>,
    positions: HashMap<String, VehiclePosition>,
}

/// In-memory bus provider answering from a script.
#[derive(Default)]
pub struct ScriptedBusProvider {
    script: Mutex<BusScript>,
    fail_arrivals: AtomicBool,
    arrival_calls: AtomicUsize,
}

impl ScriptedBusProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route 6625 with two stops named 신림역 on opposite sides of the road. Only the
    /// north side is served by the route; the south side is nearer the station exit.
    pub fn seoul_fixture() -> Self {
        let provider = Self::new();
        {
            let mut script = provider.script.lock();
            script.routes = vec![
                BusRoute {
                    route_id: TEST_BUS_ROUTE_ID.to_string(),
                    route_name: "6625".to_string(),
                },
                BusRoute {
                    route_id: "100100597".to_string(),
                    route_name: "6625-1".to_string(),
                },
            ];
            script.stations = vec![
                station("st-sillim-north", "21130", "신림역", 126.92990, 37.48440),
                station("st-sillim-south", "21131", "신림역", 126.92961, 37.48420),
                station("st-sillim-4", "21140", "신림사거리", 126.94020, 37.48200),
                station("st-gwanak", "21150", "관악구청", 126.95140, 37.47830),
            ];
            script.route_stations.insert(
                TEST_BUS_ROUTE_ID.to_string(),
                vec!["st-sillim-north".to_string(), "st-sillim-4".to_string(), "st-gwanak".to_string()],
            );
        }
        provider
    }

    pub fn fail_arrivals(&self, fail: bool) {
        self.fail_arrivals.store(fail, AtomicOrdering::SeqCst);
    }

    pub fn set_arrivals(&self, route_id: &str, station_id: &str, arrivals: Vec<BusArrival>) {
        self.script
            .lock()
            .arrivals
            .insert((route_id.to_string(), station_id.to_string()), arrivals);
    }

    pub fn set_vehicle_position(&self, position: VehiclePosition) {
        self.script
            .lock()
            .positions
            .insert(position.vehicle_id.clone(), position);
    }

    pub fn arrival_calls(&self) -> usize {
        self.arrival_calls.load(AtomicOrdering::SeqCst)
    }
}

fn station(id: &str, ars_id: &str, name: &str, lon: f64, lat: f64) -> BusStation {
    BusStation {
        station_id: id.to_string(),
        ars_id: ars_id.to_string(),
        name: name.to_string(),
        position: Position::new(lon, lat),
    }
}

#[async_trait]
impl BusProvider for ScriptedBusProvider {
    async fn find_routes(&self, route_name: &str) -> Result<Vec<BusRoute>, ProviderError> {
        Ok(self
            .script
            .lock()
            .routes
            .iter()
            .filter(|r| r.route_name.contains(route_name))
            .cloned()
            .collect())
    }

    async fn find_stations(&self, name: &str) -> Result<Vec<BusStation>, ProviderError> {
        Ok(self
            .script
            .lock()
            .stations
            .iter()
            .filter(|s| s.name.contains(name))
            .cloned()
            .collect())
    }

    async fn route_station_ids(&self, route_id: &str) -> Result<Vec<String>, ProviderError> {
        self.script
            .lock()
            .route_stations
            .get(route_id)
            .cloned()
            .ok_or(ProviderError::NotFound)
    }

    async fn arrivals(&self, route_id: &str, station_id: &str) -> Result<Vec<BusArrival>, ProviderError> {
        self.arrival_calls.fetch_add(1, AtomicOrdering::SeqCst);
        if self.fail_arrivals.load(AtomicOrdering::SeqCst) {
            return Err(ProviderError::Api("scripted outage".to_string()));
        }
        Ok(self
            .script
            .lock()
            .arrivals
            .get(&(route_id.to_string(), station_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn vehicle_position(&self, vehicle_id: &str) -> Result<Option<VehiclePosition>, ProviderError> {
        Ok(self.script.lock().positions.get(vehicle_id).cloned())
    }
}

/// In-memory rail provider answering from a script.
#[derive(Default)]
pub struct ScriptedRailProvider {
    arrivals: Mutex<HashMap<String, Vec<RailArrival>>>,
    positions: Mutex<HashMap<String, Vec<TrainPosition>>>,
}

impl ScriptedRailProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_arrivals(&self, station_name: &str, arrivals: Vec<RailArrival>) {
        self.arrivals.lock().insert(station_name.to_string(), arrivals);
    }

    pub fn set_positions(&self, line_name: &str, positions: Vec<TrainPosition>) {
        self.positions.lock().insert(line_name.to_string(), positions);
    }
}

#[async_trait]
impl RailProvider for ScriptedRailProvider {
    async fn station_arrivals(&self, station_name: &str) -> Result<Vec<RailArrival>, ProviderError> {
        Ok(self.arrivals.lock().get(station_name).cloned().unwrap_or_default())
    }

    async fn train_positions(&self, line_name: &str) -> Result<Vec<TrainPosition>, ProviderError> {
        Ok(self.positions.lock().get(line_name).cloned().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Manual delay queue
// ---------------------------------------------------------------------------

struct Scheduled {
    due: DateTime<Utc>,
    seq: u64,
    handle: CancelHandle,
    job: Job,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering to make BinaryHeap a min-heap by due time.
        other.due.cmp(&self.due).then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Delay queue whose jobs run only when the test advances the shared clock.
pub struct ManualDelayQueue {
    clock: ManualClock,
    jobs: Mutex<BinaryHeap<Scheduled>>,
    next_seq: AtomicU64,
}

impl ManualDelayQueue {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            jobs: Mutex::new(BinaryHeap::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    /// Jobs scheduled and not yet run or cancelled.
    pub fn pending(&self) -> usize {
        self.jobs.lock().iter().filter(|s| s.handle.is_pending()).count()
    }

    /// Due time of the earliest pending job.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.jobs
            .lock()
            .iter()
            .filter(|s| s.handle.is_pending())
            .map(|s| s.due)
            .min()
    }

    /// Runs every job due at or before `until` in due order, moving the clock to each
    /// job's due time, then to `until`. Returns how many jobs ran.
    pub async fn run_until(&self, until: DateTime<Utc>) -> usize {
        let mut ran = 0;
        while let Some(next) = self.pop_due(until) {
            self.clock.advance_to(next.due);
            if next.handle.start() {
                next.job.await;
                ran += 1;
            }
        }
        self.clock.advance_to(until);
        ran
    }

    pub async fn advance_and_run(&self, secs: i64) -> usize {
        let until = self.clock.now() + chrono::Duration::seconds(secs);
        self.run_until(until).await
    }

    /// Runs jobs in due order until none remain or `max_jobs` have run.
    pub async fn run_until_idle(&self, max_jobs: usize) -> usize {
        let mut ran = 0;
        while ran < max_jobs {
            let Some(due) = self.next_due() else {
                break;
            };
            ran += self.run_until(due).await;
        }
        ran
    }

    fn pop_due(&self, until: DateTime<Utc>) -> Option<Scheduled> {
        let mut jobs = self.jobs.lock();
        loop {
            let head = jobs.peek()?;
            if !head.handle.is_pending() {
                jobs.pop();
                continue;
            }
            if head.due > until {
                return None;
            }
            return jobs.pop();
        }
    }
}

impl DelayQueue for ManualDelayQueue {
    fn schedule(&self, after: Duration, job: Job) -> CancelHandle {
        let handle = CancelHandle::new();
        let due = self.clock.now() + chrono::Duration::from_std(after).unwrap_or(chrono::Duration::zero());
        self.jobs.lock().push(Scheduled {
            due,
            seq: self.next_seq.fetch_add(1, AtomicOrdering::SeqCst),
            handle: handle.clone(),
            job,
        });
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn manual_queue_runs_jobs_in_due_order() {
        let clock = ManualClock::new(test_start());
        let queue = ManualDelayQueue::new(clock.clone());
        let seen = Arc::new(Mutex::new(Vec::new()));

        for (label, secs) in [("late", 30), ("early", 10), ("cancelled", 20)] {
            let seen = Arc::clone(&seen);
            let handle = queue.schedule(
                Duration::from_secs(secs),
                Box::pin(async move {
                    seen.lock().push(label);
                }),
            );
            if label == "cancelled" {
                handle.cancel();
            }
        }

        assert_eq!(queue.pending(), 2);
        assert_eq!(queue.advance_and_run(15).await, 1);
        assert_eq!(clock.now(), test_start() + chrono::Duration::seconds(15));
        assert_eq!(queue.run_until_idle(10).await, 1);
        assert_eq!(*seen.lock(), vec!["early", "late"]);
        assert_eq!(clock.now(), test_start() + chrono::Duration::seconds(30));
    }

    #[test]
    fn sample_itinerary_matches_documented_timeline() {
        let legs = sample_itinerary();
        assert_eq!(crate::itinerary::total_section_time(&legs), 450);
        assert!(legs[1].distance_m > 500.0);
        assert_eq!(legs[1].ordered_stops.len(), 3);
    }
}
