use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{
    CreatedRace, NewParticipant, ParticipantStatus, ParticipantUpdate, RaceParticipant, RaceRepository,
};
use crate::error::{EngineError, EngineResult};

/// Repository kept in process memory.
#[derive(Debug)]
pub struct InMemoryRaceRepository {
    participants: RwLock<BTreeMap<u64, RaceParticipant>>,
    next_participant_id: AtomicU64,
    next_group_id: AtomicU64,
}

impl Default for InMemoryRaceRepository {
    fn default() -> Self {
        Self {
            participants: RwLock::new(BTreeMap::new()),
            next_participant_id: AtomicU64::new(1),
            next_group_id: AtomicU64::new(1),
        }
    }
}

impl InMemoryRaceRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RaceRepository for InMemoryRaceRepository {
    async fn create_race(&self, start_time: DateTime<Utc>, participants: Vec<NewParticipant>) -> EngineResult<CreatedRace> {
        let race_group_id = self.next_group_id.fetch_add(1, Ordering::SeqCst);
        let mut stored = self.participants.write();
        let participant_ids = participants
            .into_iter()
            .map(|p| {
                let id = self.next_participant_id.fetch_add(1, Ordering::SeqCst);
                stored.insert(
                    id,
                    RaceParticipant {
                        id,
                        race_group_id,
                        kind: p.kind,
                        status: ParticipantStatus::Running,
                        start_time,
                        end_time: None,
                        duration_seconds: None,
                        rank: None,
                        is_win: false,
                        legs: p.legs,
                    },
                );
                id
            })
            .collect();
        Ok(CreatedRace {
            race_group_id,
            participant_ids,
        })
    }

    async fn update_participant(&self, participant_id: u64, update: ParticipantUpdate) -> EngineResult<()> {
        let mut stored = self.participants.write();
        let participant = stored
            .get_mut(&participant_id)
            .ok_or_else(|| EngineError::Repository(format!("participant {participant_id} not found")))?;

        if let Some(status) = update.status {
            if status != participant.status {
                if participant.status != ParticipantStatus::Running {
                    return Err(EngineError::Repository(format!(
                        "participant {participant_id} cannot move from {:?} to {:?}",
                        participant.status, status
                    )));
                }
                participant.status = status;
            }
        }
        if let Some(end_time) = update.end_time {
            participant.end_time = Some(end_time);
        }
        if let Some(duration) = update.duration_seconds {
            participant.duration_seconds = Some(duration);
        }
        if let Some(rank) = update.rank {
            participant.rank = Some(rank);
        }
        if let Some(is_win) = update.is_win {
            participant.is_win = is_win;
        }
        Ok(())
    }

    async fn participants_in_group(&self, race_group_id: u64) -> EngineResult<Vec<RaceParticipant>> {
        Ok(self
            .participants
            .read()
            .values()
            .filter(|p| p.race_group_id == race_group_id)
            .cloned()
            .collect())
    }

    async fn participant(&self, participant_id: u64) -> EngineResult<Option<RaceParticipant>> {
        Ok(self.participants.read().get(&participant_id).cloned())
    }
}
