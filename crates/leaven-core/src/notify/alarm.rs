use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmKind {
    /// A pending step is due to start.
    T0,
    /// The user has gone quiet while a step is active.
    Missed,
    /// Evening reminder before an overnight step.
    Bedtime,
    /// Morning reminder after an overnight step.
    Wakeup,
    /// Time to check whether an adaptive step is ready.
    AdaptiveCheck,
}

impl AlarmKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::T0 => "t0",
            Self::Missed => "missed",
            Self::Bedtime => "bedtime",
            Self::Wakeup => "wakeup",
            Self::AdaptiveCheck => "adaptive_check",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "t0" => Some(Self::T0),
            "missed" => Some(Self::Missed),
            "bedtime" => Some(Self::Bedtime),
            "wakeup" => Some(Self::Wakeup),
            "adaptive_check" => Some(Self::AdaptiveCheck),
            _ => None,
        }
    }
}

impl fmt::Display for AlarmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scheduled notification tied to a step's planned time.
///
/// Alarms refer to steps by id only and are never used to change them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Alarm {
    pub bake_id: String,
    pub step_id: String,
    pub kind: AlarmKind,
    pub scheduled_time: DateTime<Utc>,
}

impl Alarm {
    pub fn new(
        bake_id: impl Into<String>,
        step_id: impl Into<String>,
        kind: AlarmKind,
        scheduled_time: DateTime<Utc>,
    ) -> Self {
        Self {
            bake_id: bake_id.into(),
            step_id: step_id.into(),
            kind,
            scheduled_time,
        }
    }

    /// Ordering key: time first, then step and kind for a stable order.
    pub(crate) fn sort_key(&self) -> (DateTime<Utc>, &str, AlarmKind) {
        (self.scheduled_time, self.step_id.as_str(), self.kind)
    }
}
