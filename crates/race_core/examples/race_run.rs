//! Race one itinerary against a handful of bots and print the broadcast stream as SSE.
//!
//! Run with: cargo run -p race_core --example race_run -- --bots 3
//!
//! By default the race runs on a manual clock and finishes instantly. With `--live`
//! (and the `seoul-api` feature plus `RACE_BUS_API_KEY` / `RACE_RAIL_API_KEY`) it runs
//! in wall-clock time against the Seoul open APIs.

use std::collections::HashMap;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use futures::StreamExt;
use race_core::bus::{EventBus, InMemoryTransport};
use race_core::clock::{Clock, ManualClock, SystemClock};
use race_core::config::EngineConfig;
use race_core::itinerary::{total_section_time, Leg};
use race_core::persistence::{InMemoryRaceRepository, RaceParticipant, RaceRepository};
use race_core::race::{BotEntry, EngineDeps, RaceService, StartRaceRequest};
use race_core::schedule::{DelayQueue, TokioDelayQueue};
use race_core::store::{InMemoryKeyValueStore, StateStore};
use race_core::test_helpers::ManualDelayQueue;
use race_core::transit::catalog::StationCatalog;
use race_core::transit::direction::DirectionResolver;
use race_core::transit::poller::TransitPoller;
use race_core::transit::resolver::LegResolver;
use race_core::transit::{BusProvider, RailProvider};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const STEP_SECS: i64 = 10;
const MAX_RACE_SECS: i64 = 4 * 60 * 60;

#[derive(Parser, Debug)]
#[command(name = "race_run", about = "Run one race and print its event stream")]
struct Args {
    /// JSON array of itinerary legs shared by the user and every bot
    #[arg(long, default_value = "demos/sample_race.json")]
    itinerary: PathBuf,
    /// Number of bots racing the user
    #[arg(long, default_value_t = 3)]
    bots: u64,
    /// Cancel the race after this many seconds
    #[arg(long)]
    cancel_after: Option<i64>,
    /// When the user reaches the destination; defaults to the itinerary time plus 45 s
    #[arg(long)]
    user_finish_after: Option<i64>,
    /// Station ordinal CSV (`station_name,line_id,ordinal_code`) for rail directions
    #[arg(long, env = "RACE_STATION_CATALOG")]
    catalog: Option<PathBuf>,
    /// Run in wall-clock time against the Seoul providers
    #[arg(long)]
    live: bool,
}

/// How race time moves forward.
enum Driver {
    Manual(Arc<ManualDelayQueue>),
    Realtime,
}

impl Driver {
    async fn advance(&self, secs: i64) {
        match self {
            Driver::Manual(queue) => {
                queue.advance_and_run(secs).await;
            }
            Driver::Realtime => {
                tokio::time::sleep(std::time::Duration::from_secs(secs.unsigned_abs())).await;
            }
        }
    }
}

#[cfg(feature = "seoul-api")]
fn providers(
    config: &EngineConfig,
) -> Result<(Option<Arc<dyn BusProvider>>, Option<Arc<dyn RailProvider>>), Box<dyn Error>> {
    Ok(race_core::transit::seoul::providers_from_config(&config.provider)?)
}

#[cfg(not(feature = "seoul-api"))]
fn providers(
    _config: &EngineConfig,
) -> Result<(Option<Arc<dyn BusProvider>>, Option<Arc<dyn RailProvider>>), Box<dyn Error>> {
    warn!("built without the seoul-api feature; every transit leg is time-tracked");
    Ok((None, None))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let legs: Vec<Leg> = serde_json::from_str(&std::fs::read_to_string(&args.itinerary)?)?;
    let catalog = match &args.catalog {
        Some(path) => StationCatalog::from_path(path)?,
        None => StationCatalog::new(),
    };

    let config = EngineConfig::from_env();
    let (bus_provider, rail_provider, clock, delay_queue, driver): (
        _,
        _,
        Arc<dyn Clock>,
        Arc<dyn DelayQueue>,
        Driver,
    ) = if args.live {
        let (bus, rail) = providers(&config)?;
        (
            bus,
            rail,
            Arc::new(SystemClock) as Arc<dyn Clock>,
            Arc::new(TokioDelayQueue::new(tokio::runtime::Handle::current())) as Arc<dyn DelayQueue>,
            Driver::Realtime,
        )
    } else {
        let queue = Arc::new(ManualDelayQueue::new(ManualClock::new(Utc::now())));
        (
            None,
            None,
            Arc::new(queue.clock().clone()) as Arc<dyn Clock>,
            queue.clone() as Arc<dyn DelayQueue>,
            Driver::Manual(queue),
        )
    };

    let store = StateStore::new(Arc::new(InMemoryKeyValueStore::new()), config.store.clone());
    let bus = EventBus::new(Arc::new(InMemoryTransport::new()), config.bus.clone());
    let repository: Arc<dyn RaceRepository> = Arc::new(InMemoryRaceRepository::new());
    let resolver = LegResolver::new(
        bus_provider.clone(),
        DirectionResolver::new(Arc::new(catalog)),
        &config.provider,
    );
    let poller = TransitPoller::new(bus_provider, rail_provider, config.provider.call_timeout());
    let service = RaceService::new(EngineDeps {
        config,
        store,
        bus,
        repository: Arc::clone(&repository),
        resolver,
        poller,
        delay_queue,
        clock,
    });

    let started = service
        .start_race(StartRaceRequest {
            user_legs: legs.clone(),
            bots: (1..=args.bots)
                .map(|bot_id| BotEntry {
                    bot_id,
                    legs: legs.clone(),
                })
                .collect(),
        })
        .await?;
    info!(race_group_id = started.race_group_id, bots = args.bots, "demo race started");

    let events = service.subscribe(started.race_group_id).await.into_events();
    let printer = tokio::spawn(async move {
        let mut events = Box::pin(events);
        while let Some(event) = events.next().await {
            print!("{}", event.to_sse());
        }
    });

    let user_finish_after = args
        .user_finish_after
        .unwrap_or(total_section_time(&legs) as i64 + 45)
        .max(1);
    let cancel_at = args.cancel_after.unwrap_or(MAX_RACE_SECS).min(MAX_RACE_SECS);
    let mut elapsed = 0;
    let mut user_done = false;
    loop {
        driver.advance(STEP_SECS).await;
        elapsed += STEP_SECS;

        if elapsed >= cancel_at {
            if args.cancel_after.is_none() {
                warn!(elapsed_secs = elapsed, "race still running at the time limit; canceling");
            }
            let user_progress = (elapsed as f64 / user_finish_after as f64 * 100.0).min(100.0);
            let reported = HashMap::from([(started.user_participant_id, user_progress)]);
            service.cancel_race(started.race_group_id, &reported).await?;
            break;
        }
        if !user_done && elapsed >= user_finish_after {
            service.finish_user(started.user_participant_id).await?;
            user_done = true;
        }
        let participants = repository.participants_in_group(started.race_group_id).await?;
        if !participants.iter().any(RaceParticipant::is_running) {
            break;
        }
    }

    printer.await?;

    println!("--- Race {} ({} bots, {} s) ---", started.race_group_id, args.bots, elapsed);
    let mut participants = repository.participants_in_group(started.race_group_id).await?;
    participants.sort_by_key(|p| p.rank.unwrap_or(u32::MAX));
    for p in participants {
        println!(
            "  rank={:?}  participant={}  kind={:?}  status={:?}  duration={:?} s",
            p.rank, p.id, p.kind, p.status, p.duration_seconds
        );
    }
    Ok(())
}
