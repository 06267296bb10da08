//! Seam to the external race persistence collaborator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::itinerary::Leg;

pub mod memory;

pub use memory::InMemoryRaceRepository;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantKind {
    User,
    Bot { bot_id: u64 },
}

impl ParticipantKind {
    pub fn bot_id(self) -> Option<u64> {
        match self {
            ParticipantKind::User => None,
            ParticipantKind::Bot { bot_id } => Some(bot_id),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantStatus {
    Running,
    Finished,
    Canceled,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RaceParticipant {
    pub id: u64,
    pub race_group_id: u64,
    pub kind: ParticipantKind,
    pub status: ParticipantStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub rank: Option<u32>,
    pub is_win: bool,
    pub legs: Vec<Leg>,
}

impl RaceParticipant {
    pub fn is_running(&self) -> bool {
        self.status == ParticipantStatus::Running
    }

    pub fn is_bot(&self) -> bool {
        matches!(self.kind, ParticipantKind::Bot { .. })
    }
}

/// Participant supplied at race start.
#[derive(Clone, Debug)]
pub struct NewParticipant {
    pub kind: ParticipantKind,
    pub legs: Vec<Leg>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreatedRace {
    pub race_group_id: u64,
    /// Same order as the participants passed to `create_race`.
    pub participant_ids: Vec<u64>,
}

/// Field changes for one participant. `None` leaves the field untouched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParticipantUpdate {
    pub status: Option<ParticipantStatus>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub rank: Option<u32>,
    pub is_win: Option<bool>,
}

#[async_trait]
pub trait RaceRepository: Send + Sync {
    async fn create_race(&self, start_time: DateTime<Utc>, participants: Vec<NewParticipant>) -> EngineResult<CreatedRace>;

    /// Applies `update`. Status may only move out of RUNNING.
    async fn update_participant(&self, participant_id: u64, update: ParticipantUpdate) -> EngineResult<()>;

    async fn participants_in_group(&self, race_group_id: u64) -> EngineResult<Vec<RaceParticipant>>;

    async fn participant(&self, participant_id: u64) -> EngineResult<Option<RaceParticipant>>;
}
