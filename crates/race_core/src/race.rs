//! Race lifecycle: starting races, finishing participants, cancellation and ranking.

pub mod coordinator;
pub mod ranking;
pub mod service;

pub use coordinator::RaceCoordinator;
pub use service::{BotEntry, EngineDeps, RaceService, RaceStarted, StartRaceRequest};
