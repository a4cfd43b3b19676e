use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::Subcommand;
use leaven_core::storage::AlarmTable;
use leaven_core::{
    plan_timeline_with, BakeSession, Command, Config, Database, Event, NotificationScheduler,
    Outcome, RecalibrationMode, RecalibrationRequest, RecipePlan, ScheduleConflict, StepTemplate,
    SystemClock, TimelineStore, TracingSink,
};
use serde::Serialize;

type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

#[derive(Subcommand)]
pub enum BakeAction {
    /// Plan a new bake from one or more recipe files (TOML or JSON)
    New {
        #[arg(required = true)]
        recipes: Vec<PathBuf>,
        /// Bake id (random when omitted)
        #[arg(long)]
        id: Option<String>,
        /// Display name (defaults to the recipe names)
        #[arg(long)]
        name: Option<String>,
        /// Planned start, RFC 3339 (defaults to now)
        #[arg(long)]
        start: Option<DateTime<Utc>>,
    },
    /// List bakes as JSON
    List,
    /// Print a bake's timeline, alarms and conflicts as JSON
    Status { bake_id: String },
    /// Activate the first pending step, or a given one
    Start {
        bake_id: String,
        #[arg(long)]
        step: Option<String>,
    },
    /// Mark an active step done
    Done { bake_id: String, step_id: String },
    /// Skip a pending or active step
    Skip {
        bake_id: String,
        step_id: String,
        /// Pull later steps earlier by the skipped step's unused time
        #[arg(long)]
        pull_forward: bool,
    },
    /// Confirm that an adaptive step is ready
    Ready { bake_id: String, step_id: String },
    /// Recompute the remaining schedule
    Recalibrate {
        bake_id: String,
        /// shift-all, compress-to-finish or edit-single
        #[arg(long, value_parser = parse_mode)]
        mode: RecalibrationMode,
        /// Minutes; negative moves earlier or shortens
        #[arg(long, allow_negative_numbers = true)]
        delta: i64,
        /// Target step for edit-single
        #[arg(long)]
        step: Option<String>,
    },
    /// Suspend the bake's alarms
    Pause { bake_id: String },
    /// Re-derive the bake's alarms
    Resume { bake_id: String },
    /// Record that the baker is still around
    Touch { bake_id: String },
    /// Print the bake's event log as JSON
    Log { bake_id: String },
    /// Print scheduling conflicts as JSON
    Conflicts { bake_id: String },
    /// Set the adaptive flag on steps matched by the legacy keywords
    Migrate { bake_id: String },
    /// Delete a bake and everything stored for it
    Delete { bake_id: String },
}

fn parse_mode(s: &str) -> Result<RecalibrationMode, String> {
    RecalibrationMode::parse(s)
        .ok_or_else(|| format!("unknown mode '{s}' (shift-all, compress-to-finish, edit-single)"))
}

#[derive(Serialize)]
struct OutcomeView<'a> {
    bake_id: &'a str,
    command: &'a Command,
    revision: u64,
    paused: bool,
    activated: Option<&'a str>,
    changed: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    applied_compression_minutes: Option<i64>,
    events: &'a [Event],
    alarms: &'a [leaven_core::Alarm],
    conflicts: &'a [ScheduleConflict],
    #[serde(skip_serializing_if = "Option::is_none")]
    clock_skew: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    alarm_error: Option<String>,
}

impl<'a> OutcomeView<'a> {
    fn new(bake_id: &'a str, outcome: &'a Outcome) -> Self {
        Self {
            bake_id,
            command: &outcome.command,
            revision: outcome.revision,
            paused: outcome.state.paused,
            activated: outcome.activated.as_deref(),
            changed: outcome.changed.iter().map(|s| s.id.as_str()).collect(),
            applied_compression_minutes: outcome
                .recalibration
                .as_ref()
                .map(|r| r.applied_compression_minutes),
            events: &outcome.events,
            alarms: &outcome.alarms,
            conflicts: &outcome.conflicts,
            clock_skew: outcome.clock_skew.as_ref().map(ToString::to_string),
            alarm_error: outcome.alarm_error.as_ref().map(ToString::to_string),
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Read a recipe file, picking the format from its extension.
fn load_recipe(path: &Path) -> CliResult<RecipePlan> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read recipe {}: {e}", path.display()))?;
    let plan: RecipePlan = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&content)?,
        _ => toml::from_str(&content)?,
    };
    Ok(plan)
}

/// Concatenate recipes, labelling each step with its recipe name.
fn merge_recipes(plans: &[RecipePlan]) -> Vec<StepTemplate> {
    plans
        .iter()
        .flat_map(|plan| {
            plan.steps.iter().cloned().map(|mut step| {
                step.recipe.get_or_insert_with(|| plan.name.clone());
                step
            })
        })
        .collect()
}

fn open_session<'a>(
    db: &'a Database,
    config: &Config,
    bake_id: &str,
) -> CliResult<BakeSession<AlarmTable<'a>>> {
    let scheduler = NotificationScheduler::new(config.notification_policy()?);
    let session = BakeSession::load(db, bake_id, Arc::new(SystemClock), scheduler, db.alarm_table())?
        .with_sink(Arc::new(TracingSink));
    Ok(session)
}

/// Run one command against a stored bake and persist the outcome.
fn execute(bake_id: &str, command: Command) -> CliResult {
    let config = Config::load()?;
    let db = Database::open()?;
    let mut session = open_session(&db, &config, bake_id)?;

    let outcome = session.execute(command)?;
    session.write_through(&db, &outcome)?;
    db.record_events(&outcome.events)?;
    print_json(&OutcomeView::new(bake_id, &outcome))
}

pub fn run(action: BakeAction) -> CliResult {
    match action {
        BakeAction::New {
            recipes,
            id,
            name,
            start,
        } => {
            let config = Config::load()?;
            let db = Database::open()?;

            let plans = recipes
                .iter()
                .map(|p| load_recipe(p))
                .collect::<CliResult<Vec<_>>>()?;
            let templates = merge_recipes(&plans);
            let bake_id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let name = name.unwrap_or_else(|| {
                plans
                    .iter()
                    .map(|p| p.name.as_str())
                    .collect::<Vec<_>>()
                    .join(" + ")
            });
            let now = Utc::now();
            let timeline =
                plan_timeline_with(&bake_id, &templates, start.unwrap_or(now), config.plan_defaults())?;
            db.create_bake(&name, &timeline, now)?;
            tracing::debug!(bake_id = %bake_id, steps = timeline.len(), "bake planned");

            let session = open_session(&db, &config, &bake_id)?;
            print_json(&session.snapshot())?;
        }
        BakeAction::List => {
            let db = Database::open()?;
            print_json(&db.list_bakes()?)?;
        }
        BakeAction::Status { bake_id } => {
            let config = Config::load()?;
            let db = Database::open()?;
            let session = open_session(&db, &config, &bake_id)?;
            print_json(&session.snapshot())?;
        }
        BakeAction::Start { bake_id, step } => {
            execute(&bake_id, Command::Start { step_id: step })?;
        }
        BakeAction::Done { bake_id, step_id } => {
            execute(&bake_id, Command::MarkDone { step_id })?;
        }
        BakeAction::Skip {
            bake_id,
            step_id,
            pull_forward,
        } => {
            execute(
                &bake_id,
                Command::Skip {
                    step_id,
                    pull_forward,
                },
            )?;
        }
        BakeAction::Ready { bake_id, step_id } => {
            execute(&bake_id, Command::ConfirmReady { step_id })?;
        }
        BakeAction::Recalibrate {
            bake_id,
            mode,
            delta,
            step,
        } => {
            let request = RecalibrationRequest {
                mode,
                delta_minutes: delta,
                target_step_id: step,
            };
            execute(&bake_id, Command::Recalibrate(request))?;
        }
        BakeAction::Pause { bake_id } => execute(&bake_id, Command::Pause)?,
        BakeAction::Resume { bake_id } => execute(&bake_id, Command::Resume)?,
        BakeAction::Touch { bake_id } => execute(&bake_id, Command::Touch)?,
        BakeAction::Log { bake_id } => {
            let db = Database::open()?;
            db.load_bake_state(&bake_id)?;
            print_json(&db.events_for(&bake_id)?)?;
        }
        BakeAction::Conflicts { bake_id } => {
            let db = Database::open()?;
            print_json(&db.load_timeline(&bake_id)?.conflicts())?;
        }
        BakeAction::Migrate { bake_id } => {
            let config = Config::load()?;
            if !config.compat.legacy_adaptive_keywords {
                return Err("legacy keywords are disabled; set compat.legacy_adaptive_keywords = true".into());
            }
            let db = Database::open()?;
            let timeline = db.load_timeline(&bake_id)?;
            let (migrated, flagged) = config.resolver().migrate(&timeline);
            db.save_step_mutations(&bake_id, &migrated.changed_since(&timeline))?;
            print_json(&flagged)?;
        }
        BakeAction::Delete { bake_id } => {
            let db = Database::open()?;
            if !db.delete_bake(&bake_id)? {
                return Err(format!("Bake not found: {bake_id}").into());
            }
            println!("deleted {bake_id}");
        }
    }
    Ok(())
}
