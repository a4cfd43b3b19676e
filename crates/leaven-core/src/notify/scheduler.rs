//! Alarm derivation.
//!
//! The full alarm set of a bake is re-derived from its timeline after every
//! change: cancel everything, then schedule what the timeline implies. No
//! alarm survives a schedule change, so none can go stale or duplicate.

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Offset, TimeZone, Utc};

use super::alarm::{Alarm, AlarmKind};
use super::backend::NotificationBackend;
use crate::adaptive::AdaptiveResolver;
use crate::error::NotificationError;
use crate::timeline::{Step, StepStatus, Timeline};

/// Knobs for alarm derivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationPolicy {
    pub enabled: bool,
    /// Local time of the evening reminder before an overnight step.
    pub bedtime: NaiveTime,
    /// Local time of the morning reminder the day after.
    pub wakeup: NaiveTime,
    pub utc_offset: FixedOffset,
    /// Inactivity after which a `missed` alarm fires.
    pub missed_after: Duration,
    /// Upper bound on queued readiness checks per adaptive step.
    pub adaptive_check_horizon: usize,
    pub resolver: AdaptiveResolver,
}

impl Default for NotificationPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            bedtime: NaiveTime::from_hms_opt(22, 0, 0).unwrap_or(NaiveTime::MIN),
            wakeup: NaiveTime::from_hms_opt(7, 0, 0).unwrap_or(NaiveTime::MIN),
            utc_offset: Utc.fix(),
            missed_after: Duration::minutes(45),
            adaptive_check_horizon: 8,
            resolver: AdaptiveResolver::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NotificationScheduler {
    policy: NotificationPolicy,
}

impl NotificationScheduler {
    pub fn new(policy: NotificationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &NotificationPolicy {
        &self.policy
    }

    /// Every alarm the timeline implies at `now`, sorted and deduplicated.
    ///
    /// `last_interaction` feeds the inactivity heuristic for `missed` alarms;
    /// without it none are derived. Alarms that would fire before `now` are
    /// dropped.
    pub fn derive(
        &self,
        timeline: &Timeline,
        last_interaction: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Vec<Alarm> {
        if !self.policy.enabled {
            return Vec::new();
        }

        let bake_id = timeline.bake_id();
        let mut alarms = Vec::new();

        for step in timeline.steps() {
            match step.status {
                StepStatus::Pending => {
                    alarms.push(Alarm::new(bake_id, &step.id, AlarmKind::T0, step.scheduled_start));
                    if step.is_overnight {
                        let (bedtime, wakeup) = self.overnight_split(step);
                        alarms.push(Alarm::new(bake_id, &step.id, AlarmKind::Bedtime, bedtime));
                        alarms.push(Alarm::new(bake_id, &step.id, AlarmKind::Wakeup, wakeup));
                    }
                }
                StepStatus::Active => {
                    for at in self.policy.resolver.check_times(
                        step,
                        now,
                        self.policy.adaptive_check_horizon,
                    ) {
                        alarms.push(Alarm::new(bake_id, &step.id, AlarmKind::AdaptiveCheck, at));
                    }
                }
                StepStatus::Completed | StepStatus::Skipped => {}
            }
        }

        alarms.extend(self.missed_alarms(timeline, last_interaction, now));

        alarms.retain(|a| a.scheduled_time >= now);
        alarms.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        alarms.dedup();
        alarms
    }

    /// One `missed` alarm per active step, due once the user has been quiet
    /// for the configured threshold. Best effort: it only knows about
    /// interactions the tracker was told about.
    pub fn missed_alarms(
        &self,
        timeline: &Timeline,
        last_interaction: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Vec<Alarm> {
        let Some(last) = last_interaction else {
            return Vec::new();
        };
        let at = (last + self.policy.missed_after).max(now);
        timeline
            .active_steps()
            .map(|s| Alarm::new(timeline.bake_id(), &s.id, AlarmKind::Missed, at))
            .collect()
    }

    /// Bedtime on the step's local start date, wakeup the following morning.
    pub fn overnight_split(&self, step: &Step) -> (DateTime<Utc>, DateTime<Utc>) {
        let offset = self.policy.utc_offset;
        let start_date = step.scheduled_start.with_timezone(&offset).date_naive();
        let next_date = start_date.succ_opt().unwrap_or(start_date);
        let to_utc = |date: chrono::NaiveDate, time: NaiveTime| {
            let local = date.and_time(time);
            offset
                .from_local_datetime(&local)
                .single()
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|| Utc.from_utc_datetime(&local))
        };
        (
            to_utc(start_date, self.policy.bedtime),
            to_utc(next_date, self.policy.wakeup),
        )
    }

    /// Clear the bake's alarms on `backend` and schedule the derived set.
    pub fn rebuild<B: NotificationBackend + ?Sized>(
        &self,
        backend: &mut B,
        timeline: &Timeline,
        last_interaction: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Alarm>, NotificationError> {
        backend.cancel_alarms(timeline.bake_id())?;
        let alarms = self.derive(timeline, last_interaction, now);
        for alarm in &alarms {
            backend.schedule_alarm(alarm)?;
        }
        tracing::debug!(
            bake_id = timeline.bake_id(),
            alarms = alarms.len(),
            "alarms rebuilt"
        );
        Ok(alarms)
    }
}
