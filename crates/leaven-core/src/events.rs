use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::recalibrate::RecalibrationMode;

/// Every committed change to a bake produces events.
/// The analytics tap records them; nothing reads them to make decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    StepActivated {
        bake_id: String,
        step_id: String,
        step_index: u32,
        scheduled_start: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    StepCompleted {
        bake_id: String,
        step_id: String,
        step_index: u32,
        estimated_minutes: u32,
        actual_minutes: u32,
        at: DateTime<Utc>,
    },
    StepSkipped {
        bake_id: String,
        step_id: String,
        step_index: u32,
        /// Minutes later steps were pulled earlier.
        pulled_forward_minutes: i64,
        at: DateTime<Utc>,
    },
    RecalibrationApplied {
        bake_id: String,
        mode: RecalibrationMode,
        delta_minutes: i64,
        changed_steps: usize,
        projected_finish: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    },
    BakePaused {
        bake_id: String,
        active_step_ids: Vec<String>,
        at: DateTime<Utc>,
    },
    BakeResumed {
        bake_id: String,
        at: DateTime<Utc>,
    },
    BakeCompleted {
        bake_id: String,
        completed_steps: usize,
        skipped_steps: usize,
        total_actual_minutes: u64,
        at: DateTime<Utc>,
    },
}

impl Event {
    /// Stable analytics name.
    pub fn name(&self) -> &'static str {
        match self {
            Event::StepActivated { .. } => "stepActivated",
            Event::StepCompleted { .. } => "stepCompleted",
            Event::StepSkipped { .. } => "stepSkipped",
            Event::RecalibrationApplied { .. } => "recalibrationApplied",
            Event::BakePaused { .. } => "bakePaused",
            Event::BakeResumed { .. } => "bakeResumed",
            Event::BakeCompleted { .. } => "bakeCompleted",
        }
    }

    pub fn bake_id(&self) -> &str {
        match self {
            Event::StepActivated { bake_id, .. }
            | Event::StepCompleted { bake_id, .. }
            | Event::StepSkipped { bake_id, .. }
            | Event::RecalibrationApplied { bake_id, .. }
            | Event::BakePaused { bake_id, .. }
            | Event::BakeResumed { bake_id, .. }
            | Event::BakeCompleted { bake_id, .. } => bake_id,
        }
    }

    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Event::StepActivated { at, .. }
            | Event::StepCompleted { at, .. }
            | Event::StepSkipped { at, .. }
            | Event::RecalibrationApplied { at, .. }
            | Event::BakePaused { at, .. }
            | Event::BakeResumed { at, .. }
            | Event::BakeCompleted { at, .. } => *at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn events_serialize_with_type_tag() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let event = Event::BakeResumed {
            bake_id: "b".into(),
            at,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "BakeResumed");
        assert_eq!(event.name(), "bakeResumed");
        assert_eq!(event.bake_id(), "b");
        assert_eq!(event.at(), at);
        let back: Event = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
