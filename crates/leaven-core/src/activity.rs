//! Per-bake record of the last observed user interaction.
//!
//! Feeds the inactivity heuristic behind `missed` alarms. Each bake owns its
//! own tracker and reads time from an injected [`Clock`].

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::clock::Clock;

#[derive(Clone)]
pub struct ActivityTracker {
    bake_id: String,
    clock: Arc<dyn Clock>,
    last_interaction: Option<DateTime<Utc>>,
}

impl ActivityTracker {
    pub fn new(bake_id: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            bake_id: bake_id.into(),
            clock,
            last_interaction: None,
        }
    }

    /// Tracker resumed from a persisted interaction time.
    pub fn restore(
        bake_id: impl Into<String>,
        clock: Arc<dyn Clock>,
        last_interaction: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            last_interaction,
            ..Self::new(bake_id, clock)
        }
    }

    pub fn bake_id(&self) -> &str {
        &self.bake_id
    }

    /// Record an interaction now and return its time.
    pub fn touch(&mut self) -> DateTime<Utc> {
        let now = self.clock.now();
        // Never move backwards if the clock stepped back.
        let at = self.last_interaction.map_or(now, |last| last.max(now));
        self.last_interaction = Some(at);
        at
    }

    pub fn last_interaction(&self) -> Option<DateTime<Utc>> {
        self.last_interaction
    }

    /// Time since the last interaction, if there was one.
    pub fn idle_for(&self) -> Option<Duration> {
        self.last_interaction
            .map(|last| (self.clock.now() - last).max(Duration::zero()))
    }

    pub fn is_inactive(&self, threshold: Duration) -> bool {
        self.idle_for().is_some_and(|idle| idle > threshold)
    }
}

impl fmt::Debug for ActivityTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivityTracker")
            .field("bake_id", &self.bake_id)
            .field("last_interaction", &self.last_interaction)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    #[test]
    fn trackers_are_scoped_per_bake() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()));
        let mut a = ActivityTracker::new("a", clock.clone());
        let b = ActivityTracker::new("b", clock.clone());

        a.touch();
        clock.advance_minutes(50);
        assert_eq!(a.idle_for(), Some(Duration::minutes(50)));
        assert!(a.is_inactive(Duration::minutes(45)));
        assert!(b.idle_for().is_none());
        assert!(!b.is_inactive(Duration::minutes(45)));
    }

    #[test]
    fn touch_never_moves_backwards() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let mut tracker = ActivityTracker::new("a", clock.clone());
        tracker.touch();
        clock.advance_minutes(-10);
        assert_eq!(tracker.touch(), start);
    }
}
