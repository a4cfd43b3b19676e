//! Adaptive ("until ready") step resolution.
//!
//! An adaptive step has no fixed end. It stays active past its scheduled end
//! until the user confirms readiness, and while it runs the notification
//! scheduler reminds the user to check on it every
//! `adaptive_check_interval_minutes`.

pub mod legacy;

pub use legacy::LegacyKeywords;

use chrono::{DateTime, Duration, Utc};

use crate::timeline::{Step, StepStatus, Timeline};

/// Decides which steps are adaptive and when to check on them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdaptiveResolver {
    legacy: Option<LegacyKeywords>,
}

impl AdaptiveResolver {
    /// Resolver that trusts the explicit flag only.
    pub fn new() -> Self {
        Self { legacy: None }
    }

    /// Resolver that also treats keyword matches as adaptive.
    pub fn with_legacy_fallback(keywords: LegacyKeywords) -> Self {
        Self {
            legacy: Some(keywords),
        }
    }

    pub fn uses_legacy_fallback(&self) -> bool {
        self.legacy.is_some()
    }

    pub fn is_adaptive(&self, step: &Step) -> bool {
        step.is_adaptive || self.legacy.as_ref().is_some_and(|kw| kw.matches(step))
    }

    /// Upcoming readiness checks for an active adaptive step.
    ///
    /// Checks fall every interval after `scheduled_start`, the first one a
    /// full interval in rather than at the start itself. Only those after
    /// `now` are returned, at most `horizon` of them.
    pub fn check_times(&self, step: &Step, now: DateTime<Utc>, horizon: usize) -> Vec<DateTime<Utc>> {
        if step.status != StepStatus::Active || !self.is_adaptive(step) {
            return Vec::new();
        }

        let interval = i64::from(step.adaptive_check_interval_minutes.max(1));
        let elapsed = (now - step.scheduled_start).num_minutes();
        let first = if elapsed < 0 { 1 } else { elapsed / interval + 1 };

        (first..)
            .map(|k| step.scheduled_start + Duration::minutes(k * interval))
            .filter(|at| *at > now)
            .take(horizon)
            .collect()
    }

    /// Copy of `timeline` with the explicit flag set on every step the legacy
    /// heuristic recognises, plus the ids that changed.
    ///
    /// Without a legacy fallback this returns the timeline unchanged.
    pub fn migrate(&self, timeline: &Timeline) -> (Timeline, Vec<String>) {
        let mut next = timeline.clone();
        let mut migrated = Vec::new();
        if let Some(keywords) = &self.legacy {
            for step in next.steps_mut() {
                if !step.is_adaptive && keywords.matches(step) {
                    step.is_adaptive = true;
                    migrated.push(step.id.clone());
                }
            }
        }
        if !migrated.is_empty() {
            tracing::info!(
                bake_id = timeline.bake_id(),
                steps = migrated.len(),
                "migrated legacy adaptive steps"
            );
        }
        (next, migrated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn rise() -> Step {
        Step::new("rise", 0, "Bulk rise", t0(), 240)
            .adaptive(30)
            .with_status(StepStatus::Active)
    }

    #[test]
    fn explicit_flag_is_canonical() {
        let resolver = AdaptiveResolver::new();
        assert!(resolver.is_adaptive(&rise()));
        let legacy = Step::new("p", 1, "Proof until doubled", t0(), 60);
        assert!(!resolver.is_adaptive(&legacy));
        let fallback = AdaptiveResolver::with_legacy_fallback(LegacyKeywords::default());
        assert!(fallback.is_adaptive(&legacy));
    }

    #[test]
    fn check_times_recur_after_start() {
        let resolver = AdaptiveResolver::new();
        let times = resolver.check_times(&rise(), t0(), 3);
        assert_eq!(
            times,
            vec![
                t0() + Duration::minutes(30),
                t0() + Duration::minutes(60),
                t0() + Duration::minutes(90)
            ]
        );
    }

    #[test]
    fn check_times_skip_the_past() {
        let resolver = AdaptiveResolver::new();
        let now = t0() + Duration::minutes(65);
        let times = resolver.check_times(&rise(), now, 2);
        assert_eq!(
            times,
            vec![t0() + Duration::minutes(90), t0() + Duration::minutes(120)]
        );
        // Still checking long after the scheduled end.
        let late = t0() + Duration::minutes(600);
        assert_eq!(resolver.check_times(&rise(), late, 1), vec![t0() + Duration::minutes(630)]);
    }

    #[test]
    fn check_times_only_for_active_adaptive_steps() {
        let resolver = AdaptiveResolver::new();
        let pending = rise().with_status(StepStatus::Pending);
        assert!(resolver.check_times(&pending, t0(), 3).is_empty());
        let fixed = Step::new("f", 0, "Autolyse", t0(), 30).with_status(StepStatus::Active);
        assert!(resolver.check_times(&fixed, t0(), 3).is_empty());
    }

    #[test]
    fn migrate_sets_the_explicit_flag() {
        let proof = Step::new("proof", 0, "Proof until doubled", t0(), 60);
        let bake = Step::new("bake", 1, "Bake", t0() + Duration::minutes(60), 45);
        let tl = Timeline::new("b", vec![proof, bake]).unwrap();

        let (same, none) = AdaptiveResolver::new().migrate(&tl);
        assert_eq!(same, tl);
        assert!(none.is_empty());

        let resolver = AdaptiveResolver::with_legacy_fallback(LegacyKeywords::default());
        let (migrated, ids) = resolver.migrate(&tl);
        assert_eq!(ids, vec!["proof".to_string()]);
        assert!(migrated.get("proof").unwrap().is_adaptive);
        assert!(!migrated.get("bake").unwrap().is_adaptive);
    }
}
