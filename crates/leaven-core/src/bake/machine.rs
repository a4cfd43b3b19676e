//! Step state machine.
//!
//! ```text
//! pending -> active -> (completed | skipped)
//! pending -> skipped
//! ```
//!
//! Every function here is pure: it takes the current timeline and `now`, and
//! returns the next timeline. A command transitions exactly one step; the
//! activation of its successor is the only follow-on effect.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::timeline::{Step, StepStatus, Timeline};

/// Result of applying one state-machine command.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub timeline: Timeline,
    /// The step that changed status, as it is after the command.
    pub step: Step,
    /// Id of the step that became active as a consequence, if any.
    pub activated: Option<String>,
    /// Set when `now` preceded the step's recorded start.
    pub clock_skew: Option<EngineError>,
    /// Minutes pending steps were pulled earlier by a skip.
    pub pulled_forward_minutes: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipMode {
    /// Leave the remaining schedule as planned.
    KeepSchedule,
    /// Pull later pending steps earlier by the skipped step's unused time.
    PullForward,
}

impl From<bool> for SkipMode {
    fn from(pull_forward: bool) -> Self {
        if pull_forward {
            Self::PullForward
        } else {
            Self::KeepSchedule
        }
    }
}

/// Activate a pending step.
///
/// Without a target the first pending step is activated, and only when no
/// step is active. An explicit target may join already-active steps only if
/// all of them share its overlap group.
pub fn activate(
    timeline: &Timeline,
    target: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Transition, EngineError> {
    let step = match target {
        Some(id) => timeline.get(id).ok_or_else(|| EngineError::step_not_found(id))?,
        None => timeline.first_pending().ok_or_else(|| EngineError::NotFound {
            kind: "Pending step",
            id: timeline.bake_id().to_string(),
        })?,
    };

    if step.status != StepStatus::Pending {
        return Err(EngineError::invalid_transition(
            &step.id,
            step.status,
            "only pending steps can be activated",
        ));
    }

    let pos = timeline
        .position(&step.id)
        .ok_or_else(|| EngineError::step_not_found(&step.id))?;
    if let Some(blocker) = blocking_active(timeline, pos) {
        return Err(EngineError::invalid_transition(
            &step.id,
            step.status,
            format!("step '{}' is already active", blocker.id),
        ));
    }

    let id = step.id.clone();
    let mut next = timeline.clone();
    let activated = next
        .step_mut(&id)
        .ok_or_else(|| EngineError::step_not_found(&id))?;
    activated.status = StepStatus::Active;
    activated.reschedule_from(now);
    let activated = activated.clone();

    // Restarting at `now` can move the step out of the group it shared.
    if let Some(blocker) = blocking_active(&next, pos) {
        return Err(EngineError::invalid_transition(
            &id,
            StepStatus::Pending,
            format!("step '{}' no longer overlaps it once started now", blocker.id),
        ));
    }

    tracing::info!(bake_id = timeline.bake_id(), step_id = %id, "step activated");
    Ok(Transition {
        timeline: next,
        step: activated,
        activated: Some(id),
        clock_skew: None,
        pulled_forward_minutes: 0,
    })
}

/// Complete an active step and activate its successor.
///
/// The actual duration is `now - scheduled_start`, rounded to whole minutes.
pub fn mark_done(
    timeline: &Timeline,
    step_id: &str,
    now: DateTime<Utc>,
) -> Result<Transition, EngineError> {
    let current = timeline
        .get(step_id)
        .ok_or_else(|| EngineError::step_not_found(step_id))?;
    if current.status != StepStatus::Active {
        return Err(EngineError::invalid_transition(
            step_id,
            current.status,
            "only active steps can be marked done",
        ));
    }

    let (actual, clock_skew) = elapsed_minutes(current.scheduled_start, now);
    if let Some(skew) = &clock_skew {
        tracing::warn!(bake_id = timeline.bake_id(), step_id, "{skew}; recording zero duration");
    }

    let mut next = timeline.clone();
    let done = next
        .step_mut(step_id)
        .ok_or_else(|| EngineError::step_not_found(step_id))?;
    done.status = StepStatus::Completed;
    done.actual_duration_minutes = Some(actual);
    let done = done.clone();

    let activated = activate_successor(&mut next, done.step_index, now);
    tracing::info!(
        bake_id = timeline.bake_id(),
        step_id,
        actual_minutes = actual,
        activated = activated.as_deref().unwrap_or("-"),
        "step completed"
    );

    Ok(Transition {
        timeline: next,
        step: done,
        activated,
        clock_skew,
        pulled_forward_minutes: 0,
    })
}

/// Skip a pending or active step and activate its successor.
pub fn skip(
    timeline: &Timeline,
    step_id: &str,
    mode: SkipMode,
    now: DateTime<Utc>,
) -> Result<Transition, EngineError> {
    let current = timeline
        .get(step_id)
        .ok_or_else(|| EngineError::step_not_found(step_id))?;
    if current.status.is_terminal() {
        return Err(EngineError::invalid_transition(
            step_id,
            current.status,
            "step is already finished",
        ));
    }

    let unused = (current.scheduled_end - now.max(current.scheduled_start))
        .num_minutes()
        .max(0);

    let mut next = timeline.clone();
    let skipped = next
        .step_mut(step_id)
        .ok_or_else(|| EngineError::step_not_found(step_id))?;
    skipped.status = StepStatus::Skipped;
    skipped.actual_duration_minutes = None;
    let skipped = skipped.clone();

    let activated = activate_successor(&mut next, skipped.step_index, now);

    let mut pulled = 0;
    if mode == SkipMode::PullForward && unused > 0 {
        for step in next
            .steps_mut()
            .iter_mut()
            .filter(|s| s.step_index > skipped.step_index && s.status == StepStatus::Pending)
        {
            step.shift(-unused)?;
        }
        pulled = unused;
    }

    tracing::info!(
        bake_id = timeline.bake_id(),
        step_id,
        pulled_forward_minutes = pulled,
        activated = activated.as_deref().unwrap_or("-"),
        "step skipped"
    );

    Ok(Transition {
        timeline: next,
        step: skipped,
        activated,
        clock_skew: None,
        pulled_forward_minutes: pulled,
    })
}

/// Activate the step at `step_index + 1` if it is pending and no other
/// active step outside its overlap group remains.
fn activate_successor(
    timeline: &mut Timeline,
    step_index: u32,
    now: DateTime<Utc>,
) -> Option<String> {
    let successor = timeline.by_index(step_index.checked_add(1)?)?;
    if successor.status != StepStatus::Pending {
        return None;
    }
    let id = successor.id.clone();
    let pos = timeline.position(&id)?;
    if blocking_active(timeline, pos).is_some() {
        return None;
    }

    let step = timeline.step_mut(&id)?;
    let planned = step.clone();
    step.status = StepStatus::Active;
    step.reschedule_from(now);

    if blocking_active(timeline, pos).is_some() {
        if let Some(step) = timeline.step_mut(&id) {
            *step = planned;
        }
        return None;
    }
    Some(id)
}

/// First active step that does not share an overlap group with `pos`.
fn blocking_active(timeline: &Timeline, pos: usize) -> Option<&Step> {
    timeline
        .steps()
        .iter()
        .enumerate()
        .find(|(p, s)| {
            s.status == StepStatus::Active && *p != pos && !timeline.share_overlap_group(*p, pos)
        })
        .map(|(_, s)| s)
}

/// Whole minutes between `start` and `now`, rounded half away from zero.
fn elapsed_minutes(start: DateTime<Utc>, now: DateTime<Utc>) -> (u32, Option<EngineError>) {
    if now < start {
        return (
            0,
            Some(EngineError::ClockSkew {
                derived: now,
                floor: start,
            }),
        );
    }
    let ms = (now - start).num_milliseconds();
    let minutes = (ms as f64 / Duration::minutes(1).num_milliseconds() as f64).round();
    (minutes.min(f64::from(u32::MAX)) as u32, None)
}
