//! Typed broadcast events and their server-sent-events rendering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::Position;
use crate::persistence::ParticipantKind;
use crate::state::{BotStatus, VehicleRef};

/// How the bot's current vehicle is being followed, shown to viewers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleTracking {
    /// Live data was expected but missing; retrying.
    Searching,
    /// Live arrival or position data in use.
    Live,
    /// Time-based estimate.
    Simulated,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VehicleInfo {
    pub tracking: VehicleTracking,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_ref: Option<VehicleRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<u32>,
    /// Stop or station the vehicle was last reported at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_stop: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BotStatusUpdate {
    pub participant_id: u64,
    pub bot_id: u64,
    pub status: BotStatus,
    pub leg_index: usize,
    pub progress_percent: f64,
    pub position: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle: Option<VehicleInfo>,
    pub next_update_in: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BotBoarding {
    pub participant_id: u64,
    pub bot_id: u64,
    pub leg_index: usize,
    pub station_name: String,
    pub vehicle: VehicleInfo,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BotAlighting {
    pub participant_id: u64,
    pub bot_id: u64,
    pub leg_index: usize,
    pub station_name: String,
    /// Status the bot enters next.
    pub next_action: BotStatus,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParticipantFinished {
    pub participant_id: u64,
    pub kind: ParticipantKind,
    pub rank: u32,
    pub duration_seconds: i64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaceEndReason {
    AllFinished,
    Canceled,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum RaceEvent {
    Connected {
        race_group_id: u64,
    },
    BotStatusUpdate(BotStatusUpdate),
    BotBoarding(BotBoarding),
    BotAlighting(BotAlighting),
    ParticipantFinished(ParticipantFinished),
    RaceEnded {
        race_group_id: u64,
        reason: RaceEndReason,
        timestamp: DateTime<Utc>,
    },
    Heartbeat {
        timestamp: DateTime<Utc>,
    },
    Reconnecting {
        attempt: u32,
    },
    Error {
        code: String,
        message: String,
    },
}

impl RaceEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            RaceEvent::Connected { .. } => "connected",
            RaceEvent::BotStatusUpdate(_) => "bot_status_update",
            RaceEvent::BotBoarding(_) => "bot_boarding",
            RaceEvent::BotAlighting(_) => "bot_alighting",
            RaceEvent::ParticipantFinished(_) => "participant_finished",
            RaceEvent::RaceEnded { .. } => "race_ended",
            RaceEvent::Heartbeat { .. } => "heartbeat",
            RaceEvent::Reconnecting { .. } => "reconnecting",
            RaceEvent::Error { .. } => "error",
        }
    }

    /// A stream ends after delivering a terminal event.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RaceEvent::RaceEnded { .. } | RaceEvent::Error { .. })
    }

    /// `event: <type>\ndata: <json>\n\n`
    pub fn to_sse(&self) -> String {
        let data = serde_json::to_value(self)
            .ok()
            .and_then(|mut v| v.get_mut("data").map(serde_json::Value::take))
            .unwrap_or(serde_json::Value::Null);
        format!("event: {}\ndata: {}\n\n", self.event_type(), data)
    }
}
