mod support;

use std::collections::HashMap;

use race_core::events::{RaceEndReason, RaceEvent};
use race_core::itinerary::Leg;
use race_core::persistence::{ParticipantStatus, RaceRepository};
use race_core::race::{BotEntry, StartRaceRequest};
use race_core::test_helpers::{place, sample_itinerary, walk_leg};
use support::{drain, RaceFixture};

fn stroll(secs: u32) -> Vec<Leg> {
    vec![walk_leg(place("출발", 127.0000, 37.5000), place("도착", 127.0100, 37.5000), secs)]
}

#[tokio::test(start_paused = true)]
async fn finished_race_ranks_form_a_permutation() {
    let fixture = RaceFixture::fallback_only();
    let started = fixture
        .service
        .start_race(StartRaceRequest {
            user_legs: sample_itinerary(),
            bots: vec![
                BotEntry { bot_id: 1, legs: stroll(60) },
                BotEntry { bot_id: 2, legs: stroll(120) },
                BotEntry { bot_id: 3, legs: stroll(180) },
            ],
        })
        .await
        .expect("race starts");
    let mut stream = fixture.subscribe(started.race_group_id).await;

    fixture.run_to(150).await;
    let user_rank = fixture
        .service
        .finish_user(started.user_participant_id)
        .await
        .expect("user finishes");
    assert_eq!(user_rank, Some(3));
    assert_eq!(
        fixture.service.finish_user(started.user_participant_id).await.expect("repeat"),
        None
    );

    fixture.run_to(180).await;
    let participants = fixture
        .repository
        .participants_in_group(started.race_group_id)
        .await
        .expect("participants");
    let mut ranks: Vec<u32> = participants.iter().filter_map(|p| p.rank).collect();
    ranks.sort_unstable();
    assert_eq!(ranks, vec![1, 2, 3, 4]);
    assert!(participants.iter().all(|p| p.status == ParticipantStatus::Finished));
    let winners: Vec<u64> = participants.iter().filter(|p| p.is_win).map(|p| p.id).collect();
    assert_eq!(winners, vec![started.bot_participant_ids[0]]);

    let events = drain(&mut stream).await;
    assert!(matches!(
        events.last(),
        Some(RaceEvent::RaceEnded { reason: RaceEndReason::AllFinished, .. })
    ));
    assert!(stream.is_finished());
}

#[tokio::test(start_paused = true)]
async fn cancellation_ranks_by_progress() {
    let fixture = RaceFixture::fallback_only();
    let started = fixture
        .service
        .start_race(StartRaceRequest {
            user_legs: sample_itinerary(),
            bots: vec![BotEntry { bot_id: 9, legs: stroll(750) }],
        })
        .await
        .expect("race starts");
    let bot = started.bot_participant_ids[0];
    let user = started.user_participant_id;
    let mut stream = fixture.subscribe(started.race_group_id).await;

    fixture.run_to(300).await;
    let state = fixture.bot_state(bot).await.expect("state");
    assert!((state.progress_percent - 40.0).abs() < 1e-9);
    assert_eq!(fixture.service.coordinator().tracked_groups(), 1);

    let user_progress = HashMap::from([(user, 25.0)]);
    assert!(fixture
        .service
        .cancel_race(started.race_group_id, &user_progress)
        .await
        .expect("cancel"));

    let bot_record = fixture.participant(bot).await;
    let user_record = fixture.participant(user).await;
    assert_eq!(bot_record.status, ParticipantStatus::Canceled);
    assert_eq!(user_record.status, ParticipantStatus::Canceled);
    assert_eq!(bot_record.rank, Some(1));
    assert!(bot_record.is_win);
    assert_eq!(user_record.rank, Some(2));
    assert_eq!(bot_record.duration_seconds, Some(300));

    assert!(fixture.bot_state(bot).await.is_none());
    assert_eq!(fixture.queue.pending(), 0);
    assert!(!fixture.service.scheduler().ticks().is_pending(bot));
    assert_eq!(fixture.service.coordinator().tracked_groups(), 0, "group mutex released on cancel");

    // A second cancellation changes nothing.
    assert!(!fixture
        .service
        .cancel_race(started.race_group_id, &user_progress)
        .await
        .expect("repeat cancel"));
    fixture.run_to(900).await;
    assert_eq!(fixture.participant(bot).await.status, ParticipantStatus::Canceled);

    let events = drain(&mut stream).await;
    let ended: Vec<&RaceEvent> = events
        .iter()
        .filter(|e| matches!(e, RaceEvent::RaceEnded { .. }))
        .collect();
    assert_eq!(ended.len(), 1);
    assert!(matches!(
        ended[0],
        RaceEvent::RaceEnded { reason: RaceEndReason::Canceled, .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn canceling_after_a_bot_finished_keeps_it_first() {
    let fixture = RaceFixture::fallback_only();
    let started = fixture
        .service
        .start_race(StartRaceRequest {
            user_legs: sample_itinerary(),
            bots: vec![
                BotEntry { bot_id: 1, legs: stroll(60) },
                BotEntry { bot_id: 2, legs: stroll(600) },
            ],
        })
        .await
        .expect("race starts");
    fixture.run_to(300).await;

    let user_progress = HashMap::from([(started.user_participant_id, 90.0)]);
    fixture
        .service
        .cancel_race(started.race_group_id, &user_progress)
        .await
        .expect("cancel");

    let fast = fixture.participant(started.bot_participant_ids[0]).await;
    let slow = fixture.participant(started.bot_participant_ids[1]).await;
    let user = fixture.participant(started.user_participant_id).await;
    assert_eq!(fast.status, ParticipantStatus::Finished);
    assert_eq!(fast.rank, Some(1));
    assert_eq!(user.rank, Some(2));
    assert_eq!(slow.rank, Some(3));
}
