//! Step and timeline model.
//!
//! This module provides:
//! - The [`Step`] record and its status lifecycle
//! - The [`Timeline`] container and its invariants
//! - Conflict reporting between open steps
//! - Planning a timeline from recipe step templates

mod conflict;
mod model;
mod plan;
mod step;

pub use conflict::{detect_conflicts, ScheduleConflict};
pub use model::{InvariantViolation, Timeline};
pub use plan::{plan_timeline, plan_timeline_with, PlanDefaults, RecipePlan, StepTemplate};
pub use step::{Step, StepStatus, DEFAULT_CHECK_INTERVAL_MINUTES, OVERNIGHT_THRESHOLD_MINUTES};
