//! Error taxonomy for the race engine.
//!
//! Only [`EngineError::InvalidRequest`] and [`EngineError::UnresolvableTransitLeg`] are
//! meant to reach a caller. Everything raised while a race is running is absorbed by
//! the scheduler (fallback, retry on the next tick, or log-and-drop).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Live provider data was missing or the call failed.
    #[error("external transit data unavailable: {0}")]
    ExternalDataUnavailable(String),

    /// Race creation rejected because a transit leg could not be resolved.
    #[error("leg {leg_index} cannot be tracked: {reason}")]
    UnresolvableTransitLeg { leg_index: usize, reason: String },

    /// The per-key lock could not be acquired within the bounded wait.
    #[error("lock contention on {key}")]
    LockContention { key: String },

    /// The bot state or its transit refs are gone; the bot is treated as already
    /// ended.
    #[error("bot state is stale or missing")]
    StaleOrMissingState,

    #[error("tick exceeded its execution budget")]
    SchedulerTimeout,

    /// Publish retries ran out; the event is dropped.
    #[error("broadcast delivery failed on {topic}")]
    BroadcastDeliveryFailure { topic: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("repository error: {0}")]
    Repository(String),
}

/// Failures of the key-value backend behind the state store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend failure: {0}")]
    Backend(String),
    #[error("state codec failure: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Failures of a transit provider call. The poller reports these as
/// [`EngineError::ExternalDataUnavailable`] and carries on without data; the
/// resolver turns them into [`EngineError::UnresolvableTransitLeg`].
#[derive(Debug, Error)]
pub enum ProviderError {
    #[cfg(feature = "seoul-api")]
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned malformed payload: {0}")]
    Decode(String),
    #[error("provider error: {0}")]
    Api(String),
    #[error("provider call timed out")]
    Timeout,
    #[error("no matching record")]
    NotFound,
}

pub type EngineResult<T> = Result<T, EngineError>;
