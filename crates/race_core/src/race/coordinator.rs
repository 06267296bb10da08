use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::ranking::{cancellation_ranks, finish_rank, Standing};
use crate::bus::EventBus;
use crate::clock::Clock;
use crate::error::{EngineError, EngineResult};
use crate::events::{ParticipantFinished, RaceEndReason, RaceEvent};
use crate::persistence::{ParticipantKind, ParticipantStatus, ParticipantUpdate, RaceParticipant, RaceRepository};
use crate::schedule::TickRegistry;
use crate::state::{bot_state_key, transit_refs_key, BotState};
use crate::store::StateStore;

/// Finishing, ranking and ending races.
///
/// Every operation on a race group runs under that group's mutex, so two
/// participants finishing at once cannot observe the same set of finishers.
pub struct RaceCoordinator {
    store: StateStore,
    bus: EventBus,
    repository: Arc<dyn RaceRepository>,
    ticks: Arc<TickRegistry>,
    clock: Arc<dyn Clock>,
    group_locks: DashMap<u64, Arc<Mutex<()>>>,
}

impl RaceCoordinator {
    pub fn new(
        store: StateStore,
        bus: EventBus,
        repository: Arc<dyn RaceRepository>,
        ticks: Arc<TickRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            bus,
            repository,
            ticks,
            clock,
            group_locks: DashMap::new(),
        }
    }

    /// Records a bot's arrival. Returns its rank, or `None` if it was no longer
    /// running.
    pub async fn on_bot_finished(&self, participant_id: u64, race_group_id: u64) -> EngineResult<Option<u32>> {
        self.finish(participant_id, race_group_id).await
    }

    /// Records the human participant's arrival.
    pub async fn on_user_finished(&self, participant_id: u64) -> EngineResult<Option<u32>> {
        let participant = self
            .repository
            .participant(participant_id)
            .await?
            .ok_or_else(|| EngineError::InvalidRequest(format!("unknown participant {participant_id}")))?;
        if participant.kind != ParticipantKind::User {
            return Err(EngineError::InvalidRequest(format!(
                "participant {participant_id} is not the user"
            )));
        }
        self.finish(participant_id, participant.race_group_id).await
    }

    /// Cancels every running participant and ranks the group by progress.
    ///
    /// `reported_progress` carries progress known outside the engine, such as the
    /// user's own. Returns `false` when nothing was running.
    pub async fn on_race_canceled(&self, race_group_id: u64, reported_progress: &HashMap<u64, f64>) -> EngineResult<bool> {
        let lock = self.group_lock(race_group_id);
        let _guard = lock.lock().await;

        let participants = self.repository.participants_in_group(race_group_id).await?;
        if !participants.iter().any(RaceParticipant::is_running) {
            debug!(race_group_id, "race already over; ignoring cancellation");
            self.group_locks.remove(&race_group_id);
            return Ok(false);
        }

        let mut standings = Vec::with_capacity(participants.len());
        for p in &participants {
            standings.push(Standing {
                participant_id: p.id,
                progress_percent: self.progress_of(p, reported_progress).await,
                finished_duration_secs: match p.status {
                    ParticipantStatus::Finished => p.duration_seconds,
                    _ => None,
                },
            });
        }

        let now = self.clock.now();
        let mut running: Vec<&RaceParticipant> = participants.iter().filter(|p| p.is_running()).collect();
        running.sort_by_key(|p| !p.is_bot());
        for p in running {
            let duration = (now - p.start_time).num_seconds().max(0);
            self.repository
                .update_participant(
                    p.id,
                    ParticipantUpdate {
                        status: Some(ParticipantStatus::Canceled),
                        end_time: Some(now),
                        duration_seconds: Some(duration),
                        ..ParticipantUpdate::default()
                    },
                )
                .await?;
        }
        self.release_bots(&participants).await;

        for (participant_id, rank) in cancellation_ranks(&standings) {
            self.repository
                .update_participant(
                    participant_id,
                    ParticipantUpdate {
                        rank: Some(rank),
                        is_win: Some(rank == 1),
                        ..ParticipantUpdate::default()
                    },
                )
                .await?;
        }

        info!(race_group_id, participants = participants.len(), "race canceled");
        self.bus
            .publish(
                race_group_id,
                &RaceEvent::RaceEnded {
                    race_group_id,
                    reason: RaceEndReason::Canceled,
                    timestamp: now,
                },
            )
            .await;
        self.group_locks.remove(&race_group_id);
        Ok(true)
    }

    /// Publishes a bot's tick events unless its race has ended.
    ///
    /// Runs under the group mutex, so nothing lands on the topic after `race_ended`.
    pub async fn publish_if_running(
        &self,
        participant_id: u64,
        race_group_id: u64,
        events: &[RaceEvent],
    ) -> EngineResult<bool> {
        let lock = self.group_lock(race_group_id);
        let _guard = lock.lock().await;

        let participants = self.repository.participants_in_group(race_group_id).await?;
        let running = participants.iter().any(|p| p.id == participant_id && p.is_running());
        if !running {
            if !participants.iter().any(RaceParticipant::is_running) {
                self.group_locks.remove(&race_group_id);
            }
            return Ok(false);
        }
        for event in events {
            self.bus.publish(race_group_id, event).await;
        }
        Ok(true)
    }

    /// Race groups currently holding a coordination mutex.
    pub fn tracked_groups(&self) -> usize {
        self.group_locks.len()
    }

    async fn finish(&self, participant_id: u64, race_group_id: u64) -> EngineResult<Option<u32>> {
        let lock = self.group_lock(race_group_id);
        let _guard = lock.lock().await;

        let participants = self.repository.participants_in_group(race_group_id).await?;
        let Some(me) = participants.iter().find(|p| p.id == participant_id) else {
            return Err(EngineError::InvalidRequest(format!(
                "participant {participant_id} is not in race group {race_group_id}"
            )));
        };
        if !me.is_running() {
            debug!(participant_id, race_group_id, status = ?me.status, "participant already ended");
            if !participants.iter().any(RaceParticipant::is_running) {
                self.group_locks.remove(&race_group_id);
            }
            return Ok(None);
        }

        let now = self.clock.now();
        let duration = (now - me.start_time).num_seconds().max(0);
        let finished: Vec<i64> = participants
            .iter()
            .filter(|p| p.status == ParticipantStatus::Finished)
            .filter_map(|p| p.duration_seconds)
            .collect();
        let rank = finish_rank(duration, &finished);

        self.repository
            .update_participant(
                participant_id,
                ParticipantUpdate {
                    status: Some(ParticipantStatus::Finished),
                    end_time: Some(now),
                    duration_seconds: Some(duration),
                    rank: Some(rank),
                    is_win: Some(rank == 1),
                },
            )
            .await?;
        info!(participant_id, race_group_id, rank, duration_secs = duration, "participant finished");
        self.bus
            .publish(
                race_group_id,
                &RaceEvent::ParticipantFinished(ParticipantFinished {
                    participant_id,
                    kind: me.kind,
                    rank,
                    duration_seconds: duration,
                    timestamp: now,
                }),
            )
            .await;

        let others_running = participants.iter().any(|p| p.id != participant_id && p.is_running());
        if !others_running {
            self.release_bots(&participants).await;
            info!(race_group_id, "all participants finished");
            self.bus
                .publish(
                    race_group_id,
                    &RaceEvent::RaceEnded {
                        race_group_id,
                        reason: RaceEndReason::AllFinished,
                        timestamp: now,
                    },
                )
                .await;
            self.group_locks.remove(&race_group_id);
        }
        Ok(Some(rank))
    }

    /// Bot progress comes from live state when it still exists.
    async fn progress_of(&self, participant: &RaceParticipant, reported: &HashMap<u64, f64>) -> f64 {
        if participant.status == ParticipantStatus::Finished {
            return 100.0;
        }
        let reported = reported.get(&participant.id).copied().unwrap_or(0.0);
        if !participant.is_bot() {
            return reported;
        }
        match self.store.get::<BotState>(&bot_state_key(participant.id)).await {
            Ok(Some(state)) => state.progress_percent,
            Ok(None) => reported,
            Err(err) => {
                warn!(participant_id = participant.id, error = %err, "could not read bot progress");
                reported
            }
        }
    }

    async fn release_bots(&self, participants: &[RaceParticipant]) {
        for p in participants.iter().filter(|p| p.is_bot()) {
            self.ticks.revoke(p.id);
            for key in [bot_state_key(p.id), transit_refs_key(p.id)] {
                if let Err(err) = self.store.delete(&key).await {
                    warn!(participant_id = p.id, key = %key, error = %err, "failed to delete bot state");
                }
            }
        }
    }

    fn group_lock(&self, race_group_id: u64) -> Arc<Mutex<()>> {
        self.group_locks.entry(race_group_id).or_default().clone()
    }
}
