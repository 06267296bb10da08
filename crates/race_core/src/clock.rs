use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

/// Source of wall-clock time for the engine.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Clones share the same instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<RwLock<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(RwLock::new(start)),
        }
    }

    pub fn advance_secs(&self, secs: i64) {
        *self.now.write() += Duration::seconds(secs);
    }

    /// Moves the clock to `instant`; earlier instants are ignored.
    pub fn advance_to(&self, instant: DateTime<Utc>) {
        let mut now = self.now.write();
        if instant > *now {
            *now = instant;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}
