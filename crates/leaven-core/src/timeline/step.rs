//! Step types and utilities.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::EngineError;

/// Steps at or above this length are treated as overnight.
pub const OVERNIGHT_THRESHOLD_MINUTES: u32 = 480;

/// Default recurrence for adaptive readiness checks.
pub const DEFAULT_CHECK_INTERVAL_MINUTES: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Active,
    Completed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Skipped => "skipped",
        }
    }

    /// Completed and skipped steps never change status again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single step of a bake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub step_index: u32,
    pub name: String,
    #[serde(default)]
    pub instructions: String,
    pub status: StepStatus,
    pub scheduled_start: DateTime<Utc>,
    pub scheduled_end: DateTime<Utc>,
    pub estimated_duration_minutes: u32,
    #[serde(default)]
    pub actual_duration_minutes: Option<u32>,
    #[serde(default)]
    pub is_adaptive: bool,
    #[serde(default)]
    pub is_overnight: bool,
    #[serde(default)]
    pub can_overlap: bool,
    #[serde(default = "default_check_interval")]
    pub adaptive_check_interval_minutes: u32,
    /// Recipe this step belongs to, when several share a timeline.
    #[serde(default)]
    pub recipe: Option<String>,
}

fn default_check_interval() -> u32 {
    DEFAULT_CHECK_INTERVAL_MINUTES
}

impl Step {
    /// Create a pending step starting at `start`.
    ///
    /// Durations below one minute are raised to one. Steps of
    /// [`OVERNIGHT_THRESHOLD_MINUTES`] or longer are flagged overnight.
    pub fn new(
        id: impl Into<String>,
        step_index: u32,
        name: impl Into<String>,
        start: DateTime<Utc>,
        duration_minutes: u32,
    ) -> Self {
        let duration_minutes = duration_minutes.max(1);
        Self {
            id: id.into(),
            step_index,
            name: name.into(),
            instructions: String::new(),
            status: StepStatus::Pending,
            scheduled_start: start,
            scheduled_end: start + Duration::minutes(i64::from(duration_minutes)),
            estimated_duration_minutes: duration_minutes,
            actual_duration_minutes: None,
            is_adaptive: false,
            is_overnight: duration_minutes >= OVERNIGHT_THRESHOLD_MINUTES,
            can_overlap: false,
            adaptive_check_interval_minutes: DEFAULT_CHECK_INTERVAL_MINUTES,
            recipe: None,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn adaptive(mut self, check_interval_minutes: u32) -> Self {
        self.is_adaptive = true;
        self.adaptive_check_interval_minutes = check_interval_minutes.max(1);
        self
    }

    pub fn overnight(mut self) -> Self {
        self.is_overnight = true;
        self
    }

    pub fn overlapping(mut self) -> Self {
        self.can_overlap = true;
        self
    }

    pub fn with_recipe(mut self, recipe: impl Into<String>) -> Self {
        self.recipe = Some(recipe.into());
        self
    }

    pub fn with_status(mut self, status: StepStatus) -> Self {
        self.status = status;
        self
    }

    /// Planned length in minutes, from the scheduled range.
    pub fn scheduled_minutes(&self) -> i64 {
        (self.scheduled_end - self.scheduled_start).num_minutes()
    }

    /// Whether the scheduled ranges of two steps intersect.
    pub fn overlaps(&self, other: &Self) -> bool {
        self.scheduled_start < other.scheduled_end && self.scheduled_end > other.scheduled_start
    }

    pub fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Move both ends of the scheduled range.
    ///
    /// The step is left untouched when either end would fall outside the
    /// representable time range.
    pub(crate) fn shift(&mut self, minutes: i64) -> Result<(), EngineError> {
        let out_of_range = || {
            EngineError::InvalidRecalibration(format!(
                "moving step '{}' by {minutes} minutes leaves the supported time range",
                self.id
            ))
        };
        let delta = Duration::try_minutes(minutes).ok_or_else(out_of_range)?;
        let start = self
            .scheduled_start
            .checked_add_signed(delta)
            .ok_or_else(out_of_range)?;
        let end = self
            .scheduled_end
            .checked_add_signed(delta)
            .ok_or_else(out_of_range)?;
        self.scheduled_start = start;
        self.scheduled_end = end;
        Ok(())
    }

    /// Restart the scheduled range at `at`, keeping the estimated duration.
    pub(crate) fn reschedule_from(&mut self, at: DateTime<Utc>) {
        self.scheduled_start = at;
        self.scheduled_end = at + Duration::minutes(i64::from(self.estimated_duration_minutes));
    }
}
