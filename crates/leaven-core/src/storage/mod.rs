mod config;
pub mod database;

pub use config::{CompatConfig, Config, NotificationsConfig, ScheduleConfig};
pub use database::{AlarmTable, BakeRecord, Database, EventRecord};

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::timeline::{Step, Timeline};

/// Returns the data directory.
///
/// `LEAVEN_DATA_DIR` wins when set; otherwise `~/.config/leaven[-dev]/`
/// based on `LEAVEN_ENV`. Set `LEAVEN_ENV=dev` to use the development
/// directory.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf> {
    let dir = match std::env::var_os("LEAVEN_DATA_DIR") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");
            let env = std::env::var("LEAVEN_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("leaven-dev")
            } else {
                base_dir.join("leaven")
            }
        }
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Per-bake session state persisted next to the timeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BakeState {
    pub paused: bool,
    pub last_interaction: Option<DateTime<Utc>>,
}

/// Where bake timelines are persisted.
pub trait TimelineStore {
    fn load_timeline(&self, bake_id: &str) -> Result<Timeline>;

    /// Write the given steps, replacing their stored versions.
    fn save_step_mutations(&self, bake_id: &str, steps: &[Step]) -> Result<()>;

    fn load_bake_state(&self, _bake_id: &str) -> Result<BakeState> {
        Ok(BakeState::default())
    }

    fn save_bake_state(&self, _bake_id: &str, _state: &BakeState) -> Result<()> {
        Ok(())
    }

    /// Persist one command's effects. Stores that can should do this
    /// atomically.
    fn commit(&self, bake_id: &str, steps: &[Step], state: &BakeState) -> Result<(), CoreError> {
        self.save_step_mutations(bake_id, steps)?;
        self.save_bake_state(bake_id, state)
    }
}
