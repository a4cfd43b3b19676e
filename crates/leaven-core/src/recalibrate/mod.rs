//! Recalibration engine.
//!
//! [`recalibrate`] is a pure function from a timeline and a request to a new
//! timeline. The input is never touched, so callers can diff the result
//! before committing it. Alarms are not re-derived here; the session does
//! that once the new timeline is committed.
//!
//! ## Modes
//!
//! - `shift_all`: every pending or active step moves by `delta`.
//! - `compress_to_finish`: pending steps are pulled earlier by a running
//!   compression of `floor(delta / n)` per step. The integer remainder is
//!   dropped, and active steps are left alone even when they are running
//!   behind, so the finish time is only approximately held.
//! - `edit_single`: one step's duration changes; nothing else moves.

mod request;

pub use request::{RecalibrationMode, RecalibrationRequest, StepOffset};

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::timeline::{StepStatus, Timeline};

/// Result of a successful recalibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recalibration {
    pub timeline: Timeline,
    pub request: RecalibrationRequest,
    /// One entry per step whose schedule changed.
    pub offsets: Vec<StepOffset>,
    /// Sum of per-step compression increments (`compress_to_finish` only).
    pub applied_compression_minutes: i64,
}

impl Recalibration {
    fn unchanged(timeline: &Timeline, request: &RecalibrationRequest) -> Self {
        Self {
            timeline: timeline.clone(),
            request: request.clone(),
            offsets: Vec::new(),
            applied_compression_minutes: 0,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.offsets.is_empty()
    }
}

/// Apply `request` to a copy of `timeline`.
///
/// A zero delta is a no-op for every mode and returns the input unchanged.
///
/// # Errors
///
/// `edit_single` without a resolvable target, or aimed at a completed or
/// skipped step, fails with [`EngineError::InvalidRecalibration`].
pub fn recalibrate(
    timeline: &Timeline,
    request: &RecalibrationRequest,
) -> Result<Recalibration, EngineError> {
    if request.delta_minutes == 0 {
        return Ok(Recalibration::unchanged(timeline, request));
    }

    let result = match request.mode {
        RecalibrationMode::ShiftAll => shift_all(timeline, request)?,
        RecalibrationMode::CompressToFinish => compress_to_finish(timeline, request)?,
        RecalibrationMode::EditSingle => edit_single(timeline, request)?,
    };

    let before = timeline.conflicts().len();
    let after = result.timeline.conflicts();
    if after.len() > before {
        tracing::warn!(
            bake_id = timeline.bake_id(),
            mode = %request.mode,
            conflicts = after.len(),
            "recalibration left overlapping steps"
        );
    }

    tracing::info!(
        bake_id = timeline.bake_id(),
        mode = %request.mode,
        delta_minutes = request.delta_minutes,
        changed = result.offsets.len(),
        "recalibration computed"
    );
    Ok(result)
}

fn shift_all(
    timeline: &Timeline,
    request: &RecalibrationRequest,
) -> Result<Recalibration, EngineError> {
    let delta = request.delta_minutes;
    let mut next = timeline.clone();
    let mut offsets = Vec::new();

    for step in next.steps_mut().iter_mut().filter(|s| s.is_open()) {
        step.shift(delta)?;
        offsets.push(StepOffset {
            step_id: step.id.clone(),
            start_minutes: delta,
            end_minutes: delta,
        });
    }

    Ok(Recalibration {
        timeline: next,
        request: request.clone(),
        offsets,
        applied_compression_minutes: 0,
    })
}

fn compress_to_finish(
    timeline: &Timeline,
    request: &RecalibrationRequest,
) -> Result<Recalibration, EngineError> {
    let pending = timeline.pending_steps().count() as i64;
    if pending == 0 {
        return Ok(Recalibration::unchanged(timeline, request));
    }

    // Floor division, also for negative deltas.
    let per_step = request.delta_minutes.div_euclid(pending);
    if per_step == 0 {
        return Ok(Recalibration::unchanged(timeline, request));
    }

    let mut next = timeline.clone();
    let mut offsets = Vec::new();
    let mut compression = 0;

    for step in next
        .steps_mut()
        .iter_mut()
        .filter(|s| s.status == StepStatus::Pending)
    {
        compression += per_step;
        let offset = compression.checked_neg().ok_or_else(|| {
            EngineError::InvalidRecalibration(format!(
                "compression of {} minutes is out of range",
                request.delta_minutes
            ))
        })?;
        step.shift(offset)?;
        offsets.push(StepOffset {
            step_id: step.id.clone(),
            start_minutes: offset,
            end_minutes: offset,
        });
    }

    Ok(Recalibration {
        timeline: next,
        request: request.clone(),
        offsets,
        applied_compression_minutes: per_step * pending,
    })
}

fn edit_single(
    timeline: &Timeline,
    request: &RecalibrationRequest,
) -> Result<Recalibration, EngineError> {
    let target_id = request.target_step_id.as_deref().ok_or_else(|| {
        EngineError::InvalidRecalibration("edit_single requires a target step".into())
    })?;

    let mut next = timeline.clone();
    let step = next.step_mut(target_id).ok_or_else(|| {
        EngineError::InvalidRecalibration(format!("target step '{target_id}' not found"))
    })?;
    if step.status.is_terminal() {
        return Err(EngineError::InvalidRecalibration(format!(
            "target step '{target_id}' is already {}",
            step.status
        )));
    }

    let old = i64::from(step.estimated_duration_minutes);
    let new = (old + request.delta_minutes).clamp(1, i64::from(u32::MAX));
    let old_end = step.scheduled_end;
    let end = chrono::Duration::try_minutes(new)
        .and_then(|d| step.scheduled_start.checked_add_signed(d))
        .ok_or_else(|| {
            EngineError::InvalidRecalibration(format!(
                "a {new} minute step '{target_id}' ends outside the supported time range"
            ))
        })?;
    step.estimated_duration_minutes = new as u32;
    step.scheduled_end = end;

    let offsets = vec![StepOffset {
        step_id: step.id.clone(),
        start_minutes: 0,
        end_minutes: (step.scheduled_end - old_end).num_minutes(),
    }];

    Ok(Recalibration {
        timeline: next,
        request: request.clone(),
        offsets,
        applied_compression_minutes: 0,
    })
}
