pub mod bus;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod fallback;
pub mod geo;
pub mod itinerary;
pub mod persistence;
pub mod progress;
pub mod race;
pub mod retry;
pub mod schedule;
pub mod state;
pub mod store;
pub mod systems;
pub mod transit;

#[cfg(feature = "test-helpers")]
pub mod test_helpers;
