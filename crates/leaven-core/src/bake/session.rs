//! Single-writer command processing for one bake.
//!
//! A [`BakeSession`] holds the in-memory timeline, which is the source of
//! truth while the bake runs. Each [`Command`] is applied by the state machine
//! or the recalibration engine, committed, and only then handed to the
//! notification worker as a [`ScheduleMessage`]. Persistence is optimistic:
//! [`BakeSession::write_through`] stores the outcome and rolls the session
//! back to the pre-command snapshot if the store fails.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::command::Command;
use super::machine::{self, SkipMode, Transition};
use crate::activity::ActivityTracker;
use crate::analytics::{self, AnalyticsSink};
use crate::bus::{schedule_channel, Committed, NotificationWorker, ScheduleMessage, ScheduleSender};
use crate::clock::Clock;
use crate::error::{CoreError, EngineError, NotificationError};
use crate::events::Event;
use crate::notify::{Alarm, AlarmBook, NotificationBackend, NotificationScheduler};
use crate::recalibrate::{recalibrate, Recalibration};
use crate::storage::{BakeState, TimelineStore};
use crate::timeline::{InvariantViolation, ScheduleConflict, Step, StepStatus, Timeline};

/// What one command did.
#[derive(Debug)]
pub struct Outcome {
    pub command: Command,
    /// Session revision after the command.
    pub revision: u64,
    /// Timeline before the command.
    pub before: Timeline,
    pub before_state: BakeState,
    pub state: BakeState,
    /// Steps whose status or schedule changed.
    pub changed: Vec<Step>,
    /// Step that became active, if any.
    pub activated: Option<String>,
    pub recalibration: Option<Recalibration>,
    pub events: Vec<Event>,
    /// Alarm set after the command.
    pub alarms: Vec<Alarm>,
    pub conflicts: Vec<ScheduleConflict>,
    /// Set when the clock ran behind a step's start; already clamped.
    pub clock_skew: Option<EngineError>,
    /// Set when the alarm backend failed; the command itself still applied.
    pub alarm_error: Option<NotificationError>,
}

/// Read-only view of a bake for display.
#[derive(Debug, Clone, Serialize)]
pub struct BakeSnapshot {
    pub bake_id: String,
    pub paused: bool,
    pub finished: bool,
    pub last_interaction: Option<DateTime<Utc>>,
    pub progress_pct: f64,
    pub projected_finish: Option<DateTime<Utc>>,
    pub active_step_ids: Vec<String>,
    pub overdue_step_ids: Vec<String>,
    pub steps: Vec<Step>,
    pub alarms: Vec<Alarm>,
    pub conflicts: Vec<ScheduleConflict>,
    pub violations: Vec<InvariantViolation>,
}

#[derive(Default)]
struct Applied {
    timeline: Option<Timeline>,
    activated: Option<String>,
    recalibration: Option<Recalibration>,
    clock_skew: Option<EngineError>,
    paused: Option<bool>,
    events: Vec<Event>,
}

pub struct BakeSession<B: NotificationBackend = AlarmBook> {
    timeline: Timeline,
    clock: Arc<dyn Clock>,
    activity: ActivityTracker,
    sender: ScheduleSender,
    worker: NotificationWorker<B>,
    sinks: Vec<Arc<dyn AnalyticsSink>>,
    paused: bool,
    alarms: Vec<Alarm>,
    revision: u64,
}

impl<B: NotificationBackend> BakeSession<B> {
    /// Start a session over a fresh timeline and derive its alarms.
    pub fn open(
        timeline: Timeline,
        clock: Arc<dyn Clock>,
        scheduler: NotificationScheduler,
        backend: B,
    ) -> Result<Self, NotificationError> {
        Self::open_restored(timeline, clock, scheduler, backend, BakeState::default())
    }

    /// Resume a session from persisted state and re-derive its alarms.
    pub fn open_restored(
        timeline: Timeline,
        clock: Arc<dyn Clock>,
        scheduler: NotificationScheduler,
        backend: B,
        state: BakeState,
    ) -> Result<Self, NotificationError> {
        let activity =
            ActivityTracker::restore(timeline.bake_id(), clock.clone(), state.last_interaction);
        let (sender, worker) = schedule_channel(scheduler, backend);
        let mut session = Self {
            timeline,
            clock,
            activity,
            sender,
            worker,
            sinks: Vec::new(),
            paused: state.paused,
            alarms: Vec::new(),
            revision: 0,
        };
        let now = session.clock.now();
        session.sync_alarms(now)?;
        Ok(session)
    }

    /// Load a bake from `store` and resume it.
    pub fn load<S: TimelineStore + ?Sized>(
        store: &S,
        bake_id: &str,
        clock: Arc<dyn Clock>,
        scheduler: NotificationScheduler,
        backend: B,
    ) -> Result<Self, CoreError> {
        let timeline = store.load_timeline(bake_id)?;
        let state = store.load_bake_state(bake_id)?;
        Ok(Self::open_restored(timeline, clock, scheduler, backend, state)?)
    }

    pub fn with_sink(mut self, sink: Arc<dyn AnalyticsSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn bake_id(&self) -> &str {
        self.timeline.bake_id()
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn alarms(&self) -> &[Alarm] {
        &self.alarms
    }

    pub fn backend(&self) -> &B {
        self.worker.backend()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn state(&self) -> BakeState {
        BakeState {
            paused: self.paused,
            last_interaction: self.activity.last_interaction(),
        }
    }

    pub fn activity(&self) -> &ActivityTracker {
        &self.activity
    }

    pub fn snapshot(&self) -> BakeSnapshot {
        let now = self.clock.now();
        let tl = &self.timeline;
        BakeSnapshot {
            bake_id: tl.bake_id().to_string(),
            paused: self.paused,
            finished: tl.is_finished(),
            last_interaction: self.activity.last_interaction(),
            progress_pct: tl.progress_pct(),
            projected_finish: tl.projected_finish(),
            active_step_ids: tl.active_steps().map(|s| s.id.clone()).collect(),
            overdue_step_ids: tl.overdue(now).into_iter().map(|s| s.id.clone()).collect(),
            steps: tl.steps().to_vec(),
            alarms: self.alarms.clone(),
            conflicts: tl.conflicts(),
            violations: tl.violations(),
        }
    }

    /// Apply one command, commit it and re-derive alarms.
    ///
    /// Every command, including a rejected one, counts as user interaction.
    /// While the bake is paused the schedule may still change but no alarms
    /// are scheduled until it resumes.
    pub fn execute(&mut self, command: Command) -> Result<Outcome, EngineError> {
        self.activity.touch();
        let now = self.clock.now();
        let before = self.timeline.clone();
        let before_state = self.state();

        let applied = match self.apply(&command, now) {
            Ok(applied) => applied,
            Err(err) => {
                tracing::info!(
                    bake_id = self.bake_id(),
                    command = command.name(),
                    "command rejected: {err}"
                );
                return Err(err);
            }
        };

        let mut events = applied.events;
        let mut changed = Vec::new();
        if let Some(next) = applied.timeline {
            changed = next.changed_since(&before);
            self.timeline = next;
        }
        if let Some(paused) = applied.paused {
            self.paused = paused;
        }
        self.revision += 1;

        if !before.is_finished() && self.timeline.is_finished() {
            events.push(self.completed_event(now));
        }

        let alarm_error = self.sync_alarms(now).err();
        for event in &events {
            analytics::publish(&self.sinks, event);
        }

        Ok(Outcome {
            command,
            revision: self.revision,
            before,
            before_state,
            state: self.state(),
            changed,
            activated: applied.activated,
            recalibration: applied.recalibration,
            events,
            alarms: self.alarms.clone(),
            conflicts: self.timeline.conflicts(),
            clock_skew: applied.clock_skew,
            alarm_error,
        })
    }

    /// Persist `outcome`, rolling the session back if the store fails.
    ///
    /// Only the most recent outcome can be written; an older one is refused
    /// without touching the store.
    pub fn write_through<S: TimelineStore + ?Sized>(
        &mut self,
        store: &S,
        outcome: &Outcome,
    ) -> Result<(), CoreError> {
        if outcome.revision != self.revision {
            return Err(CoreError::Custom(format!(
                "stale outcome: revision {} but bake '{}' is at {}",
                outcome.revision,
                self.bake_id(),
                self.revision
            )));
        }

        let bake_id = self.bake_id().to_string();
        if let Err(err) = store.commit(&bake_id, &outcome.changed, &outcome.state) {
            tracing::warn!(
                bake_id = %bake_id,
                command = outcome.command.name(),
                "persisting failed, rolling back: {err}"
            );
            self.rollback(outcome);
            return Err(err);
        }
        Ok(())
    }

    fn rollback(&mut self, outcome: &Outcome) {
        self.timeline = outcome.before.clone();
        self.paused = outcome.before_state.paused;
        self.revision += 1;
        let now = self.clock.now();
        if let Err(err) = self.sync_alarms(now) {
            tracing::warn!(bake_id = self.bake_id(), "alarm rebuild after rollback failed: {err}");
        }
    }

    fn apply(&self, command: &Command, now: DateTime<Utc>) -> Result<Applied, EngineError> {
        let bake_id = self.bake_id();
        let mut applied = Applied::default();

        match command {
            Command::Start { step_id } => {
                let t = machine::activate(&self.timeline, step_id.as_deref(), now)?;
                applied.events.push(activated_event(bake_id, &t.step, now));
                self.absorb(&mut applied, t);
            }
            Command::MarkDone { step_id } => {
                let t = machine::mark_done(&self.timeline, step_id, now)?;
                self.absorb_completion(&mut applied, t, now);
            }
            Command::ConfirmReady { step_id } => {
                let step = self
                    .timeline
                    .get(step_id)
                    .ok_or_else(|| EngineError::step_not_found(step_id))?;
                if !self.worker.scheduler().policy().resolver.is_adaptive(step) {
                    return Err(EngineError::invalid_transition(
                        step_id,
                        step.status,
                        "only adaptive steps can be confirmed ready",
                    ));
                }
                let t = machine::mark_done(&self.timeline, step_id, now)?;
                self.absorb_completion(&mut applied, t, now);
            }
            Command::Skip {
                step_id,
                pull_forward,
            } => {
                let t = machine::skip(&self.timeline, step_id, SkipMode::from(*pull_forward), now)?;
                applied.events.push(Event::StepSkipped {
                    bake_id: bake_id.to_string(),
                    step_id: t.step.id.clone(),
                    step_index: t.step.step_index,
                    pulled_forward_minutes: t.pulled_forward_minutes,
                    at: now,
                });
                self.absorb(&mut applied, t);
            }
            Command::Recalibrate(request) => {
                let result = recalibrate(&self.timeline, request)?;
                if !result.is_noop() {
                    applied.events.push(Event::RecalibrationApplied {
                        bake_id: bake_id.to_string(),
                        mode: request.mode,
                        delta_minutes: request.delta_minutes,
                        changed_steps: result.offsets.len(),
                        projected_finish: result.timeline.projected_finish(),
                        at: now,
                    });
                    applied.timeline = Some(result.timeline.clone());
                }
                applied.recalibration = Some(result);
            }
            Command::Pause => {
                if !self.paused {
                    applied.paused = Some(true);
                    applied.events.push(Event::BakePaused {
                        bake_id: bake_id.to_string(),
                        active_step_ids: self.timeline.active_steps().map(|s| s.id.clone()).collect(),
                        at: now,
                    });
                    tracing::info!(bake_id, "bake paused");
                }
            }
            Command::Resume => {
                if self.paused {
                    applied.paused = Some(false);
                    applied.events.push(Event::BakeResumed {
                        bake_id: bake_id.to_string(),
                        at: now,
                    });
                    tracing::info!(bake_id, "bake resumed");
                }
            }
            Command::Touch => {}
        }

        Ok(applied)
    }

    fn absorb_completion(&self, applied: &mut Applied, t: Transition, now: DateTime<Utc>) {
        applied.events.push(Event::StepCompleted {
            bake_id: self.bake_id().to_string(),
            step_id: t.step.id.clone(),
            step_index: t.step.step_index,
            estimated_minutes: t.step.estimated_duration_minutes,
            actual_minutes: t.step.actual_duration_minutes.unwrap_or(0),
            at: now,
        });
        self.absorb(applied, t);
    }

    /// Take the transition's timeline, adding the successor activation event.
    fn absorb(&self, applied: &mut Applied, t: Transition) {
        let successor = t
            .activated
            .as_deref()
            .filter(|id| *id != t.step.id)
            .and_then(|id| t.timeline.get(id));
        if let Some(step) = successor {
            applied
                .events
                .push(activated_event(self.bake_id(), step, step.scheduled_start));
        }
        applied.activated = t.activated;
        applied.clock_skew = t.clock_skew;
        applied.timeline = Some(t.timeline);
    }

    fn completed_event(&self, now: DateTime<Utc>) -> Event {
        let steps = self.timeline.steps();
        Event::BakeCompleted {
            bake_id: self.bake_id().to_string(),
            completed_steps: steps.iter().filter(|s| s.status == StepStatus::Completed).count(),
            skipped_steps: steps.iter().filter(|s| s.status == StepStatus::Skipped).count(),
            total_actual_minutes: steps
                .iter()
                .filter_map(|s| s.actual_duration_minutes)
                .map(u64::from)
                .sum(),
            at: now,
        }
    }

    /// Queue the message the current state implies and let the worker apply it.
    fn sync_alarms(&mut self, now: DateTime<Utc>) -> Result<(), NotificationError> {
        let message = if self.paused {
            ScheduleMessage::Cancel {
                bake_id: self.bake_id().to_string(),
            }
        } else {
            ScheduleMessage::Rebuild(Committed::new(
                self.timeline.clone(),
                self.activity.last_interaction(),
                now,
            ))
        };
        if !self.sender.send(message) {
            tracing::warn!(bake_id = self.bake_id(), "schedule worker is gone; alarms not updated");
        }

        if let Some(alarms) = self.worker.drain()? {
            self.alarms = alarms;
        }
        Ok(())
    }
}

fn activated_event(bake_id: &str, step: &Step, at: DateTime<Utc>) -> Event {
    Event::StepActivated {
        bake_id: bake_id.to_string(),
        step_id: step.id.clone(),
        step_index: step.step_index,
        scheduled_start: step.scheduled_start,
        at,
    }
}
