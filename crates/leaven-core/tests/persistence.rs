//! Write-through persistence: SQLite round trips and rollback on failure.

use std::cell::Cell;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use leaven_core::storage::database::Database;
use leaven_core::{
    plan_timeline, AlarmBook, AlarmKind, BakeSession, BakeState, Command, CoreError,
    DatabaseError, ManualClock, NotificationScheduler, RecalibrationRequest, Step, StepStatus,
    StepTemplate, Timeline, TimelineStore,
};

fn t() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
}

fn loaf() -> Timeline {
    let templates = vec![
        StepTemplate::new("Levain", 240).with_key("levain"),
        StepTemplate::new("Mix", 30).with_key("mix"),
        StepTemplate::new("Bulk", 300).with_key("bulk"),
    ];
    plan_timeline("loaf", &templates, t()).unwrap()
}

/// Delegates to a database but can be told to fail the next commit.
struct FlakyStore {
    db: Database,
    fail_next: Cell<bool>,
}

impl TimelineStore for FlakyStore {
    fn load_timeline(&self, bake_id: &str) -> leaven_core::error::Result<Timeline> {
        self.db.load_timeline(bake_id)
    }

    fn save_step_mutations(&self, bake_id: &str, steps: &[Step]) -> leaven_core::error::Result<()> {
        if self.fail_next.replace(false) {
            return Err(DatabaseError::QueryFailed("disk I/O error".into()).into());
        }
        self.db.save_step_mutations(bake_id, steps)
    }

    fn load_bake_state(&self, bake_id: &str) -> leaven_core::error::Result<BakeState> {
        self.db.load_bake_state(bake_id)
    }

    fn save_bake_state(&self, bake_id: &str, state: &BakeState) -> leaven_core::error::Result<()> {
        self.db.save_bake_state(bake_id, state)
    }
}

fn flaky_store() -> FlakyStore {
    let db = Database::open_memory().unwrap();
    db.create_bake("Country loaf", &loaf(), t()).unwrap();
    FlakyStore {
        db,
        fail_next: Cell::new(false),
    }
}

fn open(store: &FlakyStore, clock: &Arc<ManualClock>) -> BakeSession {
    BakeSession::load(
        store,
        "loaf",
        clock.clone(),
        NotificationScheduler::default(),
        AlarmBook::new(),
    )
    .unwrap()
}

#[test]
fn committed_commands_survive_a_reload() {
    let clock = Arc::new(ManualClock::new(t()));
    let store = flaky_store();
    let mut session = open(&store, &clock);

    let outcome = session.execute(Command::Start { step_id: None }).unwrap();
    session.write_through(&store, &outcome).unwrap();
    clock.advance_minutes(30);
    let outcome = session
        .execute(Command::Recalibrate(RecalibrationRequest::shift_all(20)))
        .unwrap();
    session.write_through(&store, &outcome).unwrap();

    let reloaded = open(&store, &clock);
    assert_eq!(reloaded.timeline(), session.timeline());
    assert_eq!(reloaded.state(), session.state());
    assert_eq!(
        reloaded.timeline().get("levain").unwrap().status,
        StepStatus::Active
    );
    assert_eq!(
        reloaded.timeline().get("mix").unwrap().scheduled_start,
        t() + Duration::minutes(260)
    );
}

#[test]
fn failed_commit_restores_timeline_and_alarms() {
    let clock = Arc::new(ManualClock::new(t()));
    let store = flaky_store();
    let mut session = open(&store, &clock);
    let before = session.timeline().clone();
    let alarms_before = session.alarms().to_vec();

    let outcome = session.execute(Command::Start { step_id: None }).unwrap();
    assert_eq!(
        session.timeline().get("levain").unwrap().status,
        StepStatus::Active
    );

    store.fail_next.set(true);
    let err = session.write_through(&store, &outcome).unwrap_err();
    assert!(matches!(err, CoreError::Database(_)));

    assert_eq!(session.timeline(), &before);
    assert_eq!(session.backend().alarms_for("loaf"), alarms_before.as_slice());
    assert_eq!(store.load_timeline("loaf").unwrap(), before);

    // The rolled-back outcome can no longer be written.
    assert!(session.write_through(&store, &outcome).is_err());
}

#[test]
fn paused_state_is_restored_without_alarms() {
    let clock = Arc::new(ManualClock::new(t()));
    let store = flaky_store();
    let mut session = open(&store, &clock);

    let outcome = session.execute(Command::Pause).unwrap();
    session.write_through(&store, &outcome).unwrap();

    let reloaded = open(&store, &clock);
    assert!(reloaded.is_paused());
    assert!(reloaded.alarms().is_empty());
    assert_eq!(reloaded.activity().last_interaction(), Some(t()));
}

#[test]
fn database_alarm_table_mirrors_session_alarms() {
    let clock = Arc::new(ManualClock::new(t() - Duration::minutes(10)));
    let db = Database::open_memory().unwrap();
    db.create_bake("Country loaf", &loaf(), t()).unwrap();

    let mut session = BakeSession::load(
        &db,
        "loaf",
        clock.clone(),
        NotificationScheduler::default(),
        db.alarm_table(),
    )
    .unwrap();
    let opened = session.alarms().to_vec();
    assert_eq!(db.alarms_for("loaf").unwrap(), opened);
    assert!(opened.iter().all(|a| a.kind == AlarmKind::T0));

    clock.set(t());
    let outcome = session.execute(Command::Start { step_id: None }).unwrap();
    session.write_through(&db, &outcome).unwrap();
    db.record_events(&outcome.events).unwrap();

    let stored = db.alarms_for("loaf").unwrap();
    assert_eq!(stored, outcome.alarms);
    assert!(stored
        .iter()
        .any(|a| a.step_id == "levain" && a.kind == AlarmKind::Missed));
    assert_eq!(db.events_for("loaf").unwrap().len(), 1);
}
