//! Per-bot simulation state as persisted in the state store.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::geo::Position;
use crate::itinerary::LegMode;

/// Vehicle family a bot waits for or rides.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VehicleKind {
    Bus,
    Rail,
}

impl VehicleKind {
    pub fn from_mode(mode: LegMode) -> Option<Self> {
        match mode {
            LegMode::Walk => None,
            LegMode::Bus => Some(VehicleKind::Bus),
            LegMode::Rail => Some(VehicleKind::Rail),
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            VehicleKind::Bus => "BUS",
            VehicleKind::Rail => "RAIL",
        }
    }
}

/// Bot state machine position. Serialized as `WALKING`, `WAITING_BUS`,
/// `RIDING_RAIL`, `FINISHED` and so on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BotStatus {
    Walking,
    WaitingVehicle(VehicleKind),
    RidingVehicle(VehicleKind),
    Finished,
}

impl BotStatus {
    /// Initial status for entering a leg of the given mode.
    pub fn entering(mode: LegMode) -> Self {
        match VehicleKind::from_mode(mode) {
            None => BotStatus::Walking,
            Some(kind) => BotStatus::WaitingVehicle(kind),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BotStatus::Walking => "WALKING",
            BotStatus::WaitingVehicle(VehicleKind::Bus) => "WAITING_BUS",
            BotStatus::WaitingVehicle(VehicleKind::Rail) => "WAITING_RAIL",
            BotStatus::RidingVehicle(VehicleKind::Bus) => "RIDING_BUS",
            BotStatus::RidingVehicle(VehicleKind::Rail) => "RIDING_RAIL",
            BotStatus::Finished => "FINISHED",
        }
    }

    pub fn is_finished(self) -> bool {
        matches!(self, BotStatus::Finished)
    }
}

impl fmt::Display for BotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BotStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WALKING" => Ok(BotStatus::Walking),
            "FINISHED" => Ok(BotStatus::Finished),
            other => {
                let (prefix, kind) = other
                    .rsplit_once('_')
                    .ok_or_else(|| format!("unknown bot status {other:?}"))?;
                let kind = [VehicleKind::Bus, VehicleKind::Rail]
                    .into_iter()
                    .find(|k| k.suffix() == kind)
                    .ok_or_else(|| format!("unknown vehicle kind in {other:?}"))?;
                match prefix {
                    "WAITING" => Ok(BotStatus::WaitingVehicle(kind)),
                    "RIDING" => Ok(BotStatus::RidingVehicle(kind)),
                    _ => Err(format!("unknown bot status {other:?}")),
                }
            }
        }
    }
}

impl Serialize for BotStatus {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for BotStatus {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(de)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Vehicle currently tracked for a waiting or riding bot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum VehicleRef {
    /// Provider vehicle id (bus vehicle id or train number).
    Live(String),
    /// Movement is simulated from elapsed time.
    Fallback,
}

/// Whether the current leg is followed through live provider data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingMode {
    #[default]
    Live,
    /// Set once live retries are exhausted; holds until the leg ends.
    Fallback,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BotState {
    pub participant_id: u64,
    pub bot_id: u64,
    pub race_group_id: u64,
    pub status: BotStatus,
    pub current_leg_index: usize,
    pub total_legs: usize,
    pub leg_started_at: DateTime<Utc>,
    #[serde(default)]
    pub vehicle_ref: Option<VehicleRef>,
    #[serde(default)]
    pub arrival_eta_seconds: Option<u32>,
    pub next_poll_interval_seconds: u32,
    #[serde(default)]
    pub retry_count: u32,
    pub current_position: Position,
    pub progress_percent: f64,
    #[serde(default)]
    pub tracking_mode: TrackingMode,
}

impl BotState {
    /// Fresh state for a bot entering leg 0 at `now`.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        participant_id: u64,
        bot_id: u64,
        race_group_id: u64,
        first_mode: LegMode,
        total_legs: usize,
        position: Position,
        now: DateTime<Utc>,
        interval_secs: u32,
    ) -> Self {
        Self {
            participant_id,
            bot_id,
            race_group_id,
            status: BotStatus::entering(first_mode),
            current_leg_index: 0,
            total_legs,
            leg_started_at: now,
            vehicle_ref: None,
            arrival_eta_seconds: None,
            next_poll_interval_seconds: interval_secs,
            retry_count: 0,
            current_position: position,
            progress_percent: 0.0,
            tracking_mode: TrackingMode::Live,
        }
    }

    /// Whole seconds spent in the current leg/status.
    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> f64 {
        ((now - self.leg_started_at).num_milliseconds().max(0) as f64) / 1000.0
    }
}

pub fn bot_state_key(participant_id: u64) -> String {
    format!("bot_state:{participant_id}")
}

pub fn transit_refs_key(participant_id: u64) -> String {
    format!("transit_refs:{participant_id}")
}
