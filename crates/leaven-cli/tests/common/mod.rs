//! Common utilities for CLI E2E tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

/// An isolated data directory for one test.
pub struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("Failed to create temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write a file into the sandbox and return its path.
    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, content).expect("Failed to write fixture");
        path
    }

    /// Invoke the CLI and return (stdout, stderr, exit code).
    pub fn run(&self, args: &[&str]) -> (String, String, i32) {
        let output = Command::new(env!("CARGO_BIN_EXE_leaven"))
            .args(args)
            .env("LEAVEN_DATA_DIR", self.dir.path())
            .env_remove("LEAVEN_ENV")
            .env("LEAVEN_LOG", "off")
            .output()
            .expect("Failed to execute CLI command");

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let code = output.status.code().unwrap_or(-1);
        (stdout, stderr, code)
    }

    /// Invoke the CLI and expect success.
    pub fn run_success(&self, args: &[&str]) -> String {
        let (stdout, stderr, code) = self.run(args);
        assert_eq!(code, 0, "CLI command failed: {args:?}\n{stderr}");
        stdout
    }

    /// Invoke the CLI and expect failure; returns stderr.
    pub fn run_failure(&self, args: &[&str]) -> String {
        let (_, stderr, code) = self.run(args);
        assert_ne!(code, 0, "CLI command unexpectedly succeeded: {args:?}");
        stderr
    }

    /// Invoke the CLI, expect success and parse stdout as JSON.
    pub fn run_json(&self, args: &[&str]) -> serde_json::Value {
        let stdout = self.run_success(args);
        serde_json::from_str(&stdout).expect("Failed to parse JSON output")
    }
}

pub const COUNTRY_LOAF: &str = r#"
name = "Country loaf"

[[steps]]
key = "levain"
name = "Build levain"
duration_minutes = 240
adaptive = true
check_interval_minutes = 60

[[steps]]
key = "mix"
name = "Mix dough"
duration_minutes = 30

[[steps]]
key = "bulk"
name = "Bulk ferment"
duration_minutes = 300

[[steps]]
key = "retard"
name = "Cold retard"
duration_minutes = 720
"#;

/// Check if string contains substring
pub fn assert_contains(haystack: &str, needle: &str) {
    assert!(
        haystack.contains(needle),
        "Expected '{haystack}' to contain '{needle}'"
    );
}

/// Event names of a `bake log` listing.
pub fn event_names(log: &serde_json::Value) -> Vec<String> {
    log.as_array()
        .expect("log is an array")
        .iter()
        .map(|r| r["name"].as_str().unwrap_or_default().to_string())
        .collect()
}
