//! The ordered, time-scheduled step sequence of one bake.

use std::collections::HashSet;
use std::ops::Range;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::conflict::{detect_conflicts, ScheduleConflict};
use super::step::{Step, StepStatus};
use crate::error::ValidationError;

/// A bake's steps, kept sorted by `step_index`.
///
/// The timeline exclusively owns its steps. Engine operations never mutate a
/// timeline in place; they clone, change and hand back a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeline {
    bake_id: String,
    steps: Vec<Step>,
}

/// A broken timeline invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvariantViolation {
    /// More than one active step outside a single overlap group.
    MultipleActive { step_ids: Vec<String> },
    /// Two open steps that may not overlap do.
    OutOfOrder(ScheduleConflict),
}

impl Timeline {
    /// Build a timeline, validating ids, indices and time ranges.
    pub fn new(bake_id: impl Into<String>, mut steps: Vec<Step>) -> Result<Self, ValidationError> {
        let bake_id = bake_id.into();
        if bake_id.is_empty() {
            return Err(ValidationError::InvalidValue {
                field: "bake_id".into(),
                message: "must not be empty".into(),
            });
        }

        let mut ids = HashSet::new();
        let mut indices = HashSet::new();
        for step in &steps {
            if step.id.is_empty() {
                return Err(ValidationError::InvalidValue {
                    field: "id".into(),
                    message: format!("step {} has an empty id", step.step_index),
                });
            }
            if !ids.insert(step.id.as_str()) {
                return Err(ValidationError::Duplicate {
                    field: "step id".into(),
                    value: step.id.clone(),
                });
            }
            if !indices.insert(step.step_index) {
                return Err(ValidationError::Duplicate {
                    field: "step_index".into(),
                    value: step.step_index.to_string(),
                });
            }
            if step.estimated_duration_minutes < 1 {
                return Err(ValidationError::InvalidValue {
                    field: "estimated_duration_minutes".into(),
                    message: format!("step '{}' must last at least one minute", step.id),
                });
            }
            if step.scheduled_end < step.scheduled_start {
                return Err(ValidationError::InvalidTimeRange {
                    start: step.scheduled_start,
                    end: step.scheduled_end,
                });
            }
        }

        steps.sort_by_key(|s| s.step_index);
        Ok(Self { bake_id, steps })
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn bake_id(&self) -> &str {
        &self.bake_id
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn get(&self, step_id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    pub fn position(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == step_id)
    }

    pub fn by_index(&self, step_index: u32) -> Option<&Step> {
        self.steps.iter().find(|s| s.step_index == step_index)
    }

    pub fn active_steps(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter().filter(|s| s.status == StepStatus::Active)
    }

    pub fn pending_steps(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter().filter(|s| s.status == StepStatus::Pending)
    }

    pub fn first_pending(&self) -> Option<&Step> {
        self.pending_steps().next()
    }

    /// No step is left pending or active.
    pub fn is_finished(&self) -> bool {
        self.steps.iter().all(|s| s.status.is_terminal())
    }

    /// Latest scheduled end among open steps.
    pub fn projected_finish(&self) -> Option<DateTime<Utc>> {
        self.steps
            .iter()
            .filter(|s| s.is_open())
            .map(|s| s.scheduled_end)
            .max()
    }

    /// 0.0 .. 100.0 share of estimated minutes already completed or skipped.
    pub fn progress_pct(&self) -> f64 {
        let total: u64 = self
            .steps
            .iter()
            .map(|s| u64::from(s.estimated_duration_minutes))
            .sum();
        if total == 0 {
            return 0.0;
        }
        let done: u64 = self
            .steps
            .iter()
            .filter(|s| s.status.is_terminal())
            .map(|s| u64::from(s.estimated_duration_minutes))
            .sum();
        (done as f64 / total as f64 * 100.0).min(100.0)
    }

    /// Active fixed-length steps that ran past their scheduled end.
    ///
    /// Adaptive steps never expire on their own and are not reported.
    pub fn overdue(&self, now: DateTime<Utc>) -> Vec<&Step> {
        self.active_steps()
            .filter(|s| !s.is_adaptive && s.scheduled_end <= now)
            .collect()
    }

    /// Position ranges of overlap groups: runs of consecutive `can_overlap`
    /// steps whose scheduled ranges intersect. Only runs of two or more are
    /// returned.
    pub fn overlap_groups(&self) -> Vec<Range<usize>> {
        let mut groups = Vec::new();
        let mut start = 0;
        for pos in 1..=self.steps.len() {
            let continues = pos < self.steps.len() && {
                let prev = &self.steps[pos - 1];
                let cur = &self.steps[pos];
                prev.can_overlap && cur.can_overlap && prev.overlaps(cur)
            };
            if !continues {
                if pos - start >= 2 {
                    groups.push(start..pos);
                }
                start = pos;
            }
        }
        groups
    }

    /// Whether two positions fall inside the same overlap group.
    pub fn share_overlap_group(&self, a: usize, b: usize) -> bool {
        self.overlap_groups()
            .iter()
            .any(|g| g.contains(&a) && g.contains(&b))
    }

    pub fn conflicts(&self) -> Vec<ScheduleConflict> {
        detect_conflicts(self)
    }

    /// Every broken invariant, empty when the timeline is consistent.
    pub fn violations(&self) -> Vec<InvariantViolation> {
        let mut out = Vec::new();

        let active: Vec<usize> = self
            .steps
            .iter()
            .enumerate()
            .filter(|(_, s)| s.status == StepStatus::Active)
            .map(|(pos, _)| pos)
            .collect();
        if active.len() > 1 {
            let grouped = self
                .overlap_groups()
                .iter()
                .any(|g| active.iter().all(|p| g.contains(p)));
            if !grouped {
                out.push(InvariantViolation::MultipleActive {
                    step_ids: active.iter().map(|&p| self.steps[p].id.clone()).collect(),
                });
            }
        }

        out.extend(self.conflicts().into_iter().map(InvariantViolation::OutOfOrder));
        out
    }

    /// Steps in `self` that differ from their counterpart in `before`.
    pub fn changed_since(&self, before: &Timeline) -> Vec<Step> {
        self.steps
            .iter()
            .filter(|s| before.get(&s.id) != Some(*s))
            .cloned()
            .collect()
    }

    // ── Crate-internal mutation ──────────────────────────────────────

    pub(crate) fn step_mut(&mut self, step_id: &str) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| s.id == step_id)
    }

    pub(crate) fn steps_mut(&mut self) -> &mut [Step] {
        &mut self.steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn sequential(durations: &[u32]) -> Timeline {
        let mut cursor = t0();
        let steps = durations
            .iter()
            .enumerate()
            .map(|(i, &d)| {
                let step = Step::new(format!("s{i}"), i as u32, format!("Step {i}"), cursor, d);
                cursor = step.scheduled_end;
                step
            })
            .collect();
        Timeline::new("bake-1", steps).unwrap()
    }

    #[test]
    fn new_sorts_by_step_index() {
        let a = Step::new("a", 1, "A", t0(), 10);
        let b = Step::new("b", 0, "B", t0(), 10);
        let tl = Timeline::new("bake", vec![a, b]).unwrap();
        assert_eq!(tl.steps()[0].id, "b");
        assert_eq!(tl.by_index(1).unwrap().id, "a");
    }

    #[test]
    fn new_rejects_duplicates_and_bad_ranges() {
        let a = Step::new("a", 0, "A", t0(), 10);
        let dup_id = Step::new("a", 1, "A2", t0(), 10);
        assert!(matches!(
            Timeline::new("bake", vec![a.clone(), dup_id]),
            Err(ValidationError::Duplicate { .. })
        ));

        let dup_index = Step::new("b", 0, "B", t0(), 10);
        assert!(matches!(
            Timeline::new("bake", vec![a.clone(), dup_index]),
            Err(ValidationError::Duplicate { .. })
        ));

        let mut backwards = Step::new("c", 2, "C", t0(), 10);
        backwards.scheduled_end = t0() - Duration::minutes(1);
        assert!(matches!(
            Timeline::new("bake", vec![a, backwards]),
            Err(ValidationError::InvalidTimeRange { .. })
        ));

        assert!(Timeline::new("", Vec::new()).is_err());
    }

    #[test]
    fn sequential_timeline_is_consistent() {
        let tl = sequential(&[480, 30, 240]);
        assert!(tl.violations().is_empty());
        assert_eq!(tl.projected_finish(), Some(t0() + Duration::minutes(750)));
        assert_eq!(tl.progress_pct(), 0.0);
        assert!(!tl.is_finished());
    }

    #[test]
    fn overlap_groups_need_flag_and_intersection() {
        let a = Step::new("a", 0, "Levain A", t0(), 60).overlapping();
        let b = Step::new("b", 1, "Levain B", t0() + Duration::minutes(30), 60).overlapping();
        let c = Step::new("c", 2, "Mix", t0() + Duration::minutes(90), 30).overlapping();
        let d = Step::new("d", 3, "Bulk", t0() + Duration::minutes(200), 30);
        let tl = Timeline::new("bake", vec![a, b, c, d]).unwrap();
        assert_eq!(tl.overlap_groups(), vec![0..2]);
        assert!(tl.share_overlap_group(0, 1));
        assert!(!tl.share_overlap_group(1, 2));
    }

    #[test]
    fn two_active_steps_outside_a_group_are_reported() {
        let a = Step::new("a", 0, "A", t0(), 60).with_status(StepStatus::Active);
        let b = Step::new("b", 1, "B", t0() + Duration::minutes(60), 60)
            .with_status(StepStatus::Active);
        let tl = Timeline::new("bake", vec![a, b]).unwrap();
        assert_eq!(
            tl.violations(),
            vec![InvariantViolation::MultipleActive {
                step_ids: vec!["a".into(), "b".into()]
            }]
        );
    }

    #[test]
    fn two_active_steps_inside_a_group_are_fine() {
        let a = Step::new("a", 0, "A", t0(), 60)
            .overlapping()
            .with_status(StepStatus::Active);
        let b = Step::new("b", 1, "B", t0(), 60)
            .overlapping()
            .with_status(StepStatus::Active);
        let tl = Timeline::new("bake", vec![a, b]).unwrap();
        assert!(tl.violations().is_empty());
    }

    #[test]
    fn overdue_ignores_adaptive_steps() {
        let fixed = Step::new("fixed", 0, "Autolyse", t0(), 30).with_status(StepStatus::Active);
        let adaptive = Step::new("rise", 1, "Rise", t0(), 30)
            .adaptive(15)
            .overlapping()
            .with_status(StepStatus::Active);
        let tl = Timeline::new("bake", vec![fixed.overlapping(), adaptive]).unwrap();
        let overdue = tl.overdue(t0() + Duration::minutes(45));
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].id, "fixed");
    }

    #[test]
    fn changed_since_lists_only_modified_steps() {
        let before = sequential(&[10, 20, 30]);
        let mut after = before.clone();
        after.step_mut("s1").unwrap().shift(5).unwrap();
        let changed = after.changed_since(&before);
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].id, "s1");
    }
}
