//! End-to-end bake scenarios driven through `BakeSession` with a pinned clock.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use leaven_core::{
    plan_timeline, recalibrate, ActivityLog, AlarmBook, AlarmKind, BakeSession, Command, Event,
    ManualClock, NotificationScheduler, RecalibrationRequest, StepStatus, StepTemplate, Timeline,
};

fn t() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

fn templates(durations: &[(&str, u32)]) -> Vec<StepTemplate> {
    durations
        .iter()
        .map(|(key, minutes)| StepTemplate::new(*key, *minutes).with_key(*key))
        .collect()
}

fn session_at(timeline: Timeline, clock: &Arc<ManualClock>) -> BakeSession {
    BakeSession::open(
        timeline,
        clock.clone(),
        NotificationScheduler::default(),
        AlarmBook::new(),
    )
    .unwrap()
}

#[test]
fn shift_all_moves_overnight_bake_intact() {
    let tl = plan_timeline(
        "loaf",
        &templates(&[("retard", 480), ("shape", 30), ("proof", 240)]),
        t(),
    )
    .unwrap();

    let rc = recalibrate(&tl, &RecalibrationRequest::shift_all(30)).unwrap();

    for (before, after) in tl.steps().iter().zip(rc.timeline.steps()) {
        assert_eq!(after.scheduled_start, before.scheduled_start + Duration::minutes(30));
        assert_eq!(after.scheduled_minutes(), before.scheduled_minutes());
    }
    assert!(rc.timeline.get("retard").unwrap().is_overnight);
    assert!(rc.timeline.conflicts().is_empty());
    assert_eq!(rc.offsets.len(), 3);
}

#[test]
fn mark_done_records_actual_time_and_starts_successor() {
    let clock = Arc::new(ManualClock::new(t() - Duration::minutes(60)));
    let tl = plan_timeline("loaf", &templates(&[("a", 90), ("b", 45)]), t() - Duration::minutes(60))
        .unwrap();
    let mut session = session_at(tl, &clock);

    session
        .execute(Command::Start {
            step_id: Some("a".into()),
        })
        .unwrap();
    clock.set(t());
    let outcome = session
        .execute(Command::MarkDone {
            step_id: "a".into(),
        })
        .unwrap();

    let a = session.timeline().get("a").unwrap();
    let b = session.timeline().get("b").unwrap();
    assert_eq!(a.status, StepStatus::Completed);
    assert_eq!(a.actual_duration_minutes, Some(60));
    assert_eq!(b.status, StepStatus::Active);
    assert_eq!(b.scheduled_start, t());
    assert_eq!(b.scheduled_end, t() + Duration::minutes(45));
    assert_eq!(outcome.activated.as_deref(), Some("b"));
    assert!(outcome.clock_skew.is_none());
    assert!(matches!(
        &outcome.events[0],
        Event::StepCompleted {
            actual_minutes: 60,
            estimated_minutes: 90,
            ..
        }
    ));
}

#[test]
fn clock_running_backwards_records_zero_minutes() {
    let clock = Arc::new(ManualClock::new(t()));
    let tl = plan_timeline("loaf", &templates(&[("a", 30), ("b", 30)]), t()).unwrap();
    let mut session = session_at(tl, &clock);

    session.execute(Command::Start { step_id: None }).unwrap();
    clock.set(t() - Duration::minutes(5));
    let outcome = session
        .execute(Command::MarkDone {
            step_id: "a".into(),
        })
        .unwrap();

    assert!(outcome.clock_skew.is_some());
    assert_eq!(
        session.timeline().get("a").unwrap().actual_duration_minutes,
        Some(0)
    );
}

#[test]
fn whole_bake_produces_ordered_event_stream() {
    let clock = Arc::new(ManualClock::new(t()));
    let tl = plan_timeline(
        "loaf",
        &templates(&[("levain", 240), ("mix", 30), ("bulk", 300)]),
        t(),
    )
    .unwrap();
    let log = Arc::new(ActivityLog::new());
    let mut session = session_at(tl, &clock).with_sink(log.clone());

    session.execute(Command::Start { step_id: None }).unwrap();
    clock.advance_minutes(200);
    session
        .execute(Command::Recalibrate(RecalibrationRequest::shift_all(-40)))
        .unwrap();
    session
        .execute(Command::MarkDone {
            step_id: "levain".into(),
        })
        .unwrap();
    session
        .execute(Command::Skip {
            step_id: "mix".into(),
            pull_forward: true,
        })
        .unwrap();
    clock.advance_minutes(280);
    session
        .execute(Command::MarkDone {
            step_id: "bulk".into(),
        })
        .unwrap();

    assert_eq!(
        log.names(),
        vec![
            "stepActivated",
            "recalibrationApplied",
            "stepCompleted",
            "stepActivated",
            "stepSkipped",
            "stepActivated",
            "stepCompleted",
            "bakeCompleted",
        ]
    );
    assert!(session.timeline().is_finished());
    assert!(session.alarms().is_empty());
    assert!(session.backend().alarms_for("loaf").is_empty());
}

#[test]
fn overnight_step_gets_bedtime_and_wakeup_reminders() {
    let clock = Arc::new(ManualClock::new(t()));
    let tl = plan_timeline("loaf", &templates(&[("shape", 60), ("retard", 600)]), t()).unwrap();
    let session = session_at(tl, &clock);

    let kinds: Vec<AlarmKind> = session
        .alarms()
        .iter()
        .filter(|a| a.step_id == "retard")
        .map(|a| a.kind)
        .collect();
    assert_eq!(kinds, vec![AlarmKind::T0, AlarmKind::Bedtime, AlarmKind::Wakeup]);
    let wakeup = session.alarms().last().unwrap();
    assert_eq!(
        wakeup.scheduled_time,
        Utc.with_ymd_and_hms(2024, 3, 2, 7, 0, 0).unwrap()
    );
}

#[test]
fn adaptive_step_is_checked_until_confirmed() {
    let clock = Arc::new(ManualClock::new(t()));
    let mut plan = templates(&[("bulk", 240), ("shape", 30)]);
    plan[0].adaptive = true;
    plan[0].check_interval_minutes = Some(60);
    let tl = plan_timeline("loaf", &plan, t()).unwrap();
    let mut session = session_at(tl, &clock);

    let outcome = session.execute(Command::Start { step_id: None }).unwrap();
    let checks: Vec<DateTime<Utc>> = outcome
        .alarms
        .iter()
        .filter(|a| a.kind == AlarmKind::AdaptiveCheck)
        .map(|a| a.scheduled_time)
        .collect();
    assert_eq!(checks.first(), Some(&(t() + Duration::minutes(60))));
    assert!(checks.windows(2).all(|w| w[1] - w[0] == Duration::minutes(60)));

    clock.advance_minutes(150);
    let outcome = session
        .execute(Command::ConfirmReady {
            step_id: "bulk".into(),
        })
        .unwrap();
    assert_eq!(outcome.activated.as_deref(), Some("shape"));
    assert!(outcome
        .alarms
        .iter()
        .all(|a| a.kind != AlarmKind::AdaptiveCheck));
}

#[test]
fn paused_bake_keeps_schedule_changes_but_no_alarms() {
    let clock = Arc::new(ManualClock::new(t()));
    let tl = plan_timeline("loaf", &templates(&[("a", 30), ("b", 30)]), t()).unwrap();
    let mut session = session_at(tl, &clock);
    session.execute(Command::Start { step_id: None }).unwrap();

    session.execute(Command::Pause).unwrap();
    assert!(session.backend().alarms_for("loaf").is_empty());

    let outcome = session
        .execute(Command::Recalibrate(RecalibrationRequest::shift_all(15)))
        .unwrap();
    assert_eq!(outcome.changed.len(), 2);
    assert!(outcome.alarms.is_empty());

    session.execute(Command::Resume).unwrap();
    let b_start = session.timeline().get("b").unwrap().scheduled_start;
    assert!(session
        .backend()
        .alarms_for("loaf")
        .iter()
        .any(|a| a.step_id == "b" && a.kind == AlarmKind::T0 && a.scheduled_time == b_start));
}
