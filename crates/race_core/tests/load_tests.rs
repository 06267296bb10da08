//! Load tests for race_core: many bots ticking against in-memory infrastructure.

mod support;

use std::collections::HashMap;
use std::time::Instant;

use race_core::persistence::ParticipantStatus;
use race_core::race::{BotEntry, StartRaceRequest};
use race_core::test_helpers::sample_itinerary;
use support::RaceFixture;

fn crowded_race(bots: u64) -> StartRaceRequest {
    StartRaceRequest {
        user_legs: sample_itinerary(),
        bots: (1..=bots)
            .map(|bot_id| BotEntry {
                bot_id,
                legs: sample_itinerary(),
            })
            .collect(),
    }
}

#[tokio::test(start_paused = true)]
#[ignore] // Only run explicitly: cargo test --package race_core --test load_tests -- --ignored
async fn test_many_bots_finish_one_race() {
    let fixture = RaceFixture::fallback_only();
    let started = fixture.service.start_race(crowded_race(500)).await.expect("race starts");

    let start = Instant::now();
    let ticks = fixture.queue.run_until_idle(1_000_000).await;
    let duration = start.elapsed();

    let ticks_per_sec = ticks as f64 / duration.as_secs_f64();
    println!(
        "Single race load test: {} ticks in {:.2}s ({:.0} ticks/sec)",
        ticks,
        duration.as_secs_f64(),
        ticks_per_sec
    );

    for &pid in &started.bot_participant_ids {
        assert_eq!(fixture.participant(pid).await.status, ParticipantStatus::Finished);
    }
    assert!(
        ticks_per_sec > 1000.0,
        "Should process >1000 ticks/sec, got {:.0}",
        ticks_per_sec
    );
}

#[tokio::test(start_paused = true)]
#[ignore]
async fn test_many_concurrent_races() {
    let fixture = RaceFixture::fallback_only();
    let mut groups = Vec::new();
    for _ in 0..100 {
        let started = fixture.service.start_race(crowded_race(5)).await.expect("race starts");
        groups.push(started.race_group_id);
    }

    let start = Instant::now();
    fixture.run_to(300).await;
    for &group in &groups {
        let canceled = fixture
            .service
            .cancel_race(group, &HashMap::new())
            .await
            .expect("cancel");
        assert!(canceled);
    }
    let duration = start.elapsed();

    println!(
        "Concurrent races load test: {} races ran and canceled in {:.2}s",
        groups.len(),
        duration.as_secs_f64()
    );
    assert_eq!(fixture.queue.pending(), 0, "canceled races leave no ticks behind");
}
