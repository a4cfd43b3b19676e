//! Laying recipe step templates out on a timeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::model::Timeline;
use super::step::{Step, DEFAULT_CHECK_INTERVAL_MINUTES, OVERNIGHT_THRESHOLD_MINUTES};
use crate::error::ValidationError;

/// One step of a recipe, before it is placed in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTemplate {
    /// Stable id for the planned step; a random one is generated when absent.
    #[serde(default)]
    pub key: Option<String>,
    pub name: String,
    #[serde(default)]
    pub instructions: String,
    pub duration_minutes: u32,
    #[serde(default)]
    pub adaptive: bool,
    #[serde(default)]
    pub overnight: bool,
    #[serde(default)]
    pub can_overlap: bool,
    #[serde(default)]
    pub check_interval_minutes: Option<u32>,
    #[serde(default)]
    pub recipe: Option<String>,
}

impl StepTemplate {
    pub fn new(name: impl Into<String>, duration_minutes: u32) -> Self {
        Self {
            key: None,
            name: name.into(),
            instructions: String::new(),
            duration_minutes,
            adaptive: false,
            overnight: false,
            can_overlap: false,
            check_interval_minutes: None,
            recipe: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// A recipe file: a name and its ordered step templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipePlan {
    pub name: String,
    pub steps: Vec<StepTemplate>,
}

/// Values applied to templates that leave them open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanDefaults {
    /// Templates at least this long are planned as overnight steps.
    pub overnight_threshold_minutes: u32,
    pub check_interval_minutes: u32,
}

impl Default for PlanDefaults {
    fn default() -> Self {
        Self {
            overnight_threshold_minutes: OVERNIGHT_THRESHOLD_MINUTES,
            check_interval_minutes: DEFAULT_CHECK_INTERVAL_MINUTES,
        }
    }
}

/// Place templates back to back starting at `start`.
///
/// A `can_overlap` template whose predecessor is also `can_overlap` but
/// belongs to a different recipe starts together with that predecessor, so
/// the two form an overlap group.
pub fn plan_timeline(
    bake_id: impl Into<String>,
    templates: &[StepTemplate],
    start: DateTime<Utc>,
) -> Result<Timeline, ValidationError> {
    plan_timeline_with(bake_id, templates, start, PlanDefaults::default())
}

/// [`plan_timeline`] with explicit defaults.
pub fn plan_timeline_with(
    bake_id: impl Into<String>,
    templates: &[StepTemplate],
    start: DateTime<Utc>,
    defaults: PlanDefaults,
) -> Result<Timeline, ValidationError> {
    if templates.is_empty() {
        return Err(ValidationError::EmptyCollection("recipe steps".into()));
    }

    let mut steps: Vec<Step> = Vec::with_capacity(templates.len());
    let mut cursor = start;

    for (index, template) in templates.iter().enumerate() {
        if template.duration_minutes == 0 {
            return Err(ValidationError::InvalidValue {
                field: "duration_minutes".into(),
                message: format!("step '{}' must last at least one minute", template.name),
            });
        }

        let parallel_with = steps.last().filter(|prev| {
            template.can_overlap && prev.can_overlap && prev.recipe != template.recipe
        });
        let step_start = parallel_with.map_or(cursor, |prev| prev.scheduled_start);

        let id = template
            .key
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut step = Step::new(id, index as u32, &template.name, step_start, template.duration_minutes)
            .with_instructions(&template.instructions);
        if template.adaptive {
            step = step.adaptive(
                template
                    .check_interval_minutes
                    .unwrap_or(defaults.check_interval_minutes),
            );
        }
        step.is_overnight =
            template.overnight || template.duration_minutes >= defaults.overnight_threshold_minutes;
        if template.can_overlap {
            step = step.overlapping();
        }
        if let Some(recipe) = &template.recipe {
            step = step.with_recipe(recipe);
        }

        cursor = cursor.max(step.scheduled_end);
        steps.push(step);
    }

    Timeline::new(bake_id, steps)
}
