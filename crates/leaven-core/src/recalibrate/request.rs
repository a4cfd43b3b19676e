use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecalibrationMode {
    /// Move every open step by the same delta.
    ShiftAll,
    /// Pull pending steps earlier to absorb a delay.
    CompressToFinish,
    /// Change the duration of one step only.
    EditSingle,
}

impl RecalibrationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ShiftAll => "shift_all",
            Self::CompressToFinish => "compress_to_finish",
            Self::EditSingle => "edit_single",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.replace('-', "_").as_str() {
            "shift_all" => Some(Self::ShiftAll),
            "compress_to_finish" => Some(Self::CompressToFinish),
            "edit_single" => Some(Self::EditSingle),
            _ => None,
        }
    }
}

impl fmt::Display for RecalibrationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user-requested recomputation of the remaining schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecalibrationRequest {
    pub mode: RecalibrationMode,
    pub delta_minutes: i64,
    /// Only read by [`RecalibrationMode::EditSingle`].
    #[serde(default)]
    pub target_step_id: Option<String>,
}

impl RecalibrationRequest {
    pub fn shift_all(delta_minutes: i64) -> Self {
        Self {
            mode: RecalibrationMode::ShiftAll,
            delta_minutes,
            target_step_id: None,
        }
    }

    pub fn compress_to_finish(delta_minutes: i64) -> Self {
        Self {
            mode: RecalibrationMode::CompressToFinish,
            delta_minutes,
            target_step_id: None,
        }
    }

    pub fn edit_single(target_step_id: impl Into<String>, delta_minutes: i64) -> Self {
        Self {
            mode: RecalibrationMode::EditSingle,
            delta_minutes,
            target_step_id: Some(target_step_id.into()),
        }
    }
}

/// How far one step moved or stretched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOffset {
    pub step_id: String,
    /// Signed change of `scheduled_start` in minutes.
    pub start_minutes: i64,
    /// Signed change of `scheduled_end` in minutes.
    pub end_minutes: i64,
}
