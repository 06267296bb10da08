//! Engine configuration.
//!
//! Every knob has a default matching production behavior; `EngineConfig::from_env`
//! overrides a subset from `RACE_*` environment variables.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Picks the next poll interval from the most recent ETA.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalPolicy {
    /// ETAs at or below this many seconds poll at `near_interval_secs`.
    pub near_eta_threshold_secs: u32,
    pub near_interval_secs: u32,
    /// Interval for far ETAs, walking, and fallback tracking.
    pub default_interval_secs: u32,
}

impl Default for IntervalPolicy {
    fn default() -> Self {
        Self {
            near_eta_threshold_secs: 120,
            near_interval_secs: 15,
            default_interval_secs: 30,
        }
    }
}

impl IntervalPolicy {
    pub fn for_eta(&self, eta_secs: Option<u32>) -> u32 {
        match eta_secs {
            Some(eta) if eta <= self.near_eta_threshold_secs => self.near_interval_secs,
            _ => self.default_interval_secs,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// TTL of bot state and resolved refs. Doubles as the reaper for crashed races.
    pub state_ttl_secs: u64,
    /// Maximum time `update_atomic` waits for the per-key lock.
    pub lock_wait_ms: u64,
    /// Lease length; a holder that dies releases implicitly after this.
    pub lease_ms: u64,
    pub lock_poll_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_ttl_secs: 3600,
            lock_wait_ms: 5_000,
            lease_ms: 10_000,
            lock_poll_ms: 50,
        }
    }
}

impl StoreConfig {
    pub fn state_ttl(&self) -> Duration {
        Duration::from_secs(self.state_ttl_secs)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub publish_attempts: u32,
    pub publish_retry_delay_ms: u64,
    /// Idle time after which a subscription yields a heartbeat.
    pub heartbeat_secs: u64,
    pub reconnect_attempts: u32,
    /// Backoff unit; the n-th reconnect waits n times this.
    pub reconnect_backoff_ms: u64,
    /// Per-subscriber queue bound.
    pub subscriber_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            publish_attempts: 3,
            publish_retry_delay_ms: 1_000,
            heartbeat_secs: 30,
            reconnect_attempts: 5,
            reconnect_backoff_ms: 1_000,
            subscriber_capacity: 64,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub soft_budget_secs: u64,
    pub hard_budget_secs: u64,
    /// Interval used after a budget overrun or lock contention.
    pub default_interval_secs: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            soft_budget_secs: 60,
            hard_budget_secs: 90,
            default_interval_secs: 30,
        }
    }
}

/// Thresholds of the boarding and alighting rules.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementConfig {
    pub boarding_eta_secs: u32,
    pub alight_radius_m: f64,
    pub bus_backstop_ratio: f64,
    pub rail_backstop_ratio: f64,
    pub short_hop_distance_m: f64,
    pub short_hop_elapsed_secs: f64,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            boarding_eta_secs: 30,
            alight_radius_m: 100.0,
            bus_backstop_ratio: 0.90,
            rail_backstop_ratio: 0.95,
            short_hop_distance_m: 500.0,
            short_hop_elapsed_secs: 30.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Timeout applied to every provider call.
    pub call_timeout_secs: u64,
    pub bus_base_url: String,
    pub rail_base_url: String,
    pub bus_api_key: Option<String>,
    pub rail_api_key: Option<String>,
    /// Stations farther than this from the leg endpoint are not accepted.
    pub max_station_distance_m: f64,
    pub cache_capacity: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: 10,
            bus_base_url: "http://ws.bus.go.kr/api/rest".to_string(),
            rail_base_url: "http://swopenAPI.seoul.go.kr/api/subway".to_string(),
            bus_api_key: None,
            rail_api_key: None,
            max_station_distance_m: 500.0,
            cache_capacity: 1_024,
        }
    }
}

impl ProviderConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub retry: RetryPolicy,
    pub interval: IntervalPolicy,
    pub store: StoreConfig,
    pub bus: BusConfig,
    pub scheduler: SchedulerConfig,
    pub movement: MovementConfig,
    pub provider: ProviderConfig,
}

impl EngineConfig {
    /// Defaults overridden by any `RACE_*` variables that are set and parse.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        override_from_env("RACE_STATE_TTL_SECS", &mut cfg.store.state_ttl_secs);
        override_from_env("RACE_LOCK_WAIT_MS", &mut cfg.store.lock_wait_ms);
        override_from_env("RACE_HEARTBEAT_SECS", &mut cfg.bus.heartbeat_secs);
        override_from_env("RACE_RETRY_MAX_ATTEMPTS", &mut cfg.retry.max_attempts);
        override_from_env("RACE_RETRY_INTERVAL_SECS", &mut cfg.retry.interval_secs);
        override_from_env("RACE_QUIET_START_HOUR", &mut cfg.retry.quiet_start_hour);
        override_from_env("RACE_QUIET_END_HOUR", &mut cfg.retry.quiet_end_hour);
        override_from_env("RACE_PROVIDER_TIMEOUT_SECS", &mut cfg.provider.call_timeout_secs);
        override_from_env("RACE_SOFT_BUDGET_SECS", &mut cfg.scheduler.soft_budget_secs);
        override_from_env("RACE_HARD_BUDGET_SECS", &mut cfg.scheduler.hard_budget_secs);
        if let Ok(url) = std::env::var("RACE_BUS_API_URL") {
            cfg.provider.bus_base_url = url;
        }
        if let Ok(url) = std::env::var("RACE_RAIL_API_URL") {
            cfg.provider.rail_base_url = url;
        }
        cfg.provider.bus_api_key = std::env::var("RACE_BUS_API_KEY").ok();
        cfg.provider.rail_api_key = std::env::var("RACE_RAIL_API_KEY").ok();
        cfg
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_heartbeat_secs(mut self, secs: u64) -> Self {
        self.bus.heartbeat_secs = secs;
        self
    }

    pub fn with_publish_retry_delay_ms(mut self, ms: u64) -> Self {
        self.bus.publish_retry_delay_ms = ms;
        self
    }

    pub fn with_lock_wait_ms(mut self, ms: u64) -> Self {
        self.store.lock_wait_ms = ms;
        self
    }

    pub fn with_soft_budget_secs(mut self, secs: u64) -> Self {
        self.scheduler.soft_budget_secs = secs;
        self
    }
}

fn override_from_env<T: FromStr>(name: &str, slot: &mut T) {
    if let Some(value) = std::env::var(name).ok().and_then(|raw| raw.trim().parse().ok()) {
        *slot = value;
    }
}
