use serde::{Deserialize, Serialize};

use crate::recalibrate::RecalibrationRequest;

/// A user command against one bake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Activate the first pending step, or a specific one.
    Start {
        #[serde(default)]
        step_id: Option<String>,
    },
    MarkDone {
        step_id: String,
    },
    /// Mark done, restricted to adaptive steps.
    ConfirmReady {
        step_id: String,
    },
    Skip {
        step_id: String,
        #[serde(default)]
        pull_forward: bool,
    },
    Recalibrate(RecalibrationRequest),
    /// Suspend all alarms of the bake.
    Pause,
    Resume,
    /// Record a user interaction without changing the schedule.
    Touch,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Start { .. } => "start",
            Command::MarkDone { .. } => "mark_done",
            Command::ConfirmReady { .. } => "confirm_ready",
            Command::Skip { .. } => "skip",
            Command::Recalibrate(_) => "recalibrate",
            Command::Pause => "pause",
            Command::Resume => "resume",
            Command::Touch => "touch",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse_from_tagged_json() {
        let cmd: Command =
            serde_json::from_str(r#"{"command":"skip","step_id":"fold"}"#).unwrap();
        assert_eq!(
            cmd,
            Command::Skip {
                step_id: "fold".into(),
                pull_forward: false
            }
        );

        let cmd: Command = serde_json::from_str(
            r#"{"command":"recalibrate","mode":"shift_all","delta_minutes":15}"#,
        )
        .unwrap();
        assert_eq!(cmd, Command::Recalibrate(RecalibrationRequest::shift_all(15)));
        assert_eq!(cmd.name(), "recalibrate");
    }
}
