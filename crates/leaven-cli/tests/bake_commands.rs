//! `leaven bake` and `leaven alarms` E2E tests.

mod common;

use chrono::{Duration, Utc};
use common::{assert_contains, event_names, Sandbox, COUNTRY_LOAF};

fn tomorrow() -> String {
    (Utc::now() + Duration::days(1)).to_rfc3339()
}

fn new_loaf(sb: &Sandbox) -> serde_json::Value {
    let recipe = sb.write("loaf.toml", COUNTRY_LOAF);
    let start = tomorrow();
    sb.run_json(&[
        "bake",
        "new",
        recipe.to_str().unwrap(),
        "--id",
        "loaf",
        "--start",
        &start,
    ])
}

fn alarm_kinds(alarms: &serde_json::Value) -> Vec<String> {
    alarms
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["kind"].as_str().unwrap().to_string())
        .collect()
}

#[test]
fn new_bake_plans_steps_and_alarms() {
    let sb = Sandbox::new();
    let snapshot = new_loaf(&sb);

    let steps = snapshot["steps"].as_array().unwrap();
    assert_eq!(steps.len(), 4);
    assert_eq!(steps[0]["is_adaptive"], true);
    assert_eq!(steps[3]["is_overnight"], true);
    assert_eq!(steps[0]["recipe"], "Country loaf");
    // t0 for every step plus bedtime and wakeup for the retard.
    assert_eq!(snapshot["alarms"].as_array().unwrap().len(), 6);

    let stored = sb.run_json(&["alarms", "list", "loaf"]);
    assert_eq!(stored, snapshot["alarms"]);

    let bakes = sb.run_json(&["bake", "list"]);
    assert_eq!(bakes[0]["id"], "loaf");
    assert_eq!(bakes[0]["name"], "Country loaf");
    assert_eq!(bakes[0]["open_steps"], 4);
}

#[test]
fn full_bake_lifecycle() {
    let sb = Sandbox::new();
    new_loaf(&sb);

    let out = sb.run_json(&["bake", "start", "loaf"]);
    assert_eq!(out["activated"], "levain");
    assert_eq!(out["events"][0]["type"], "StepActivated");
    assert!(alarm_kinds(&sb.run_json(&["alarms", "list", "loaf"]))
        .contains(&"adaptive_check".to_string()));

    let stderr = sb.run_failure(&["bake", "done", "loaf", "mix"]);
    assert_contains(&stderr, "Invalid transition");
    let stderr = sb.run_failure(&["bake", "ready", "loaf", "mix"]);
    assert_contains(&stderr, "error:");

    let out = sb.run_json(&["bake", "ready", "loaf", "levain"]);
    assert_eq!(out["activated"], "mix");
    assert!(!alarm_kinds(&out["alarms"]).contains(&"adaptive_check".to_string()));

    let out = sb.run_json(&[
        "bake", "recalibrate", "loaf", "--mode", "shift-all", "--delta", "30",
    ]);
    assert_eq!(out["changed"].as_array().unwrap().len(), 3);

    sb.run_failure(&[
        "bake", "recalibrate", "loaf", "--mode", "edit-single", "--delta", "-10",
    ]);

    let out = sb.run_json(&[
        "bake",
        "recalibrate",
        "loaf",
        "--mode",
        "compress-to-finish",
        "--delta",
        "20",
    ]);
    assert_eq!(out["applied_compression_minutes"], 20);

    sb.run_json(&["bake", "pause", "loaf"]);
    assert_eq!(sb.run_json(&["alarms", "list", "loaf"]), serde_json::json!([]));
    assert_eq!(sb.run_json(&["bake", "status", "loaf"])["paused"], true);

    let out = sb.run_json(&["bake", "resume", "loaf"]);
    assert!(!out["alarms"].as_array().unwrap().is_empty());

    let out = sb.run_json(&["bake", "skip", "loaf", "mix", "--pull-forward"]);
    assert_eq!(out["activated"], "bulk");

    let names = event_names(&sb.run_json(&["bake", "log", "loaf"]));
    for expected in [
        "stepActivated",
        "stepCompleted",
        "recalibrationApplied",
        "bakePaused",
        "bakeResumed",
        "stepSkipped",
    ] {
        assert!(names.iter().any(|n| n == expected), "missing {expected} in {names:?}");
    }

    let out = sb.run_json(&["bake", "touch", "loaf"]);
    assert!(out["events"].as_array().unwrap().is_empty());
    assert_eq!(sb.run_json(&["bake", "conflicts", "loaf"]), serde_json::json!([]));
}

#[test]
fn overlapping_recipes_share_a_start() {
    let sb = Sandbox::new();
    let rye = sb.write(
        "rye.json",
        r#"{"name":"Rye","steps":[{"key":"rye-levain","name":"Rye levain","duration_minutes":120,"can_overlap":true}]}"#,
    );
    let wheat = sb.write(
        "wheat.toml",
        r#"
name = "Wheat"

[[steps]]
key = "wheat-levain"
name = "Wheat levain"
duration_minutes = 90
can_overlap = true

[[steps]]
key = "mix"
name = "Mix both doughs"
duration_minutes = 30
"#,
    );
    // Planned from now so both levains are still running together once started.
    let snapshot = sb.run_json(&[
        "bake",
        "new",
        rye.to_str().unwrap(),
        wheat.to_str().unwrap(),
        "--id",
        "duo",
    ]);
    let steps = snapshot["steps"].as_array().unwrap();
    assert_eq!(steps[0]["scheduled_start"], steps[1]["scheduled_start"]);
    assert_eq!(snapshot["conflicts"], serde_json::json!([]));

    sb.run_json(&["bake", "start", "duo"]);
    sb.run_json(&["bake", "start", "duo", "--step", "wheat-levain"]);
    let status = sb.run_json(&["bake", "status", "duo"]);
    assert_eq!(status["active_step_ids"].as_array().unwrap().len(), 2);
    assert_eq!(status["violations"], serde_json::json!([]));

    sb.run_failure(&["bake", "start", "duo", "--step", "mix"]);
}

#[test]
fn migrate_requires_legacy_keywords() {
    let sb = Sandbox::new();
    let recipe = sb.write(
        "proof.toml",
        r#"
name = "Legacy"

[[steps]]
key = "proof"
name = "Proof until doubled"
duration_minutes = 120
"#,
    );
    let start = tomorrow();
    sb.run_json(&[
        "bake", "new", recipe.to_str().unwrap(), "--id", "old", "--start", &start,
    ]);

    sb.run_failure(&["bake", "migrate", "old"]);
    sb.run_success(&["config", "set", "compat.legacy_adaptive_keywords", "true"]);
    assert_eq!(sb.run_json(&["bake", "migrate", "old"]), serde_json::json!(["proof"]));
    assert_eq!(sb.run_json(&["bake", "status", "old"])["steps"][0]["is_adaptive"], true);
}

#[test]
fn unknown_and_deleted_bakes_fail() {
    let sb = Sandbox::new();
    assert_contains(&sb.run_failure(&["bake", "status", "nope"]), "Bake not found");

    new_loaf(&sb);
    assert_eq!(sb.run_success(&["bake", "delete", "loaf"]).trim(), "deleted loaf");
    sb.run_failure(&["bake", "status", "loaf"]);
    assert_eq!(sb.run_json(&["alarms", "list"]), serde_json::json!([]));
}
