//! TOML-based application configuration.
//!
//! Stores user preferences including:
//! - Scheduling defaults for planned steps
//! - Alarm policy (bedtime/wakeup reminders, inactivity threshold)
//! - The opt-in keyword heuristic for legacy adaptive steps
//!
//! Configuration is stored at `<data_dir>/config.toml`.

use std::path::{Path, PathBuf};

use chrono::{Duration, FixedOffset, NaiveTime};
use serde::{Deserialize, Serialize};

use super::data_dir;
use crate::adaptive::{AdaptiveResolver, LegacyKeywords};
use crate::error::{ConfigError, CoreError};
use crate::notify::NotificationPolicy;
use crate::timeline::{PlanDefaults, DEFAULT_CHECK_INTERVAL_MINUTES, OVERNIGHT_THRESHOLD_MINUTES};

/// Planning defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Planned steps at least this long are treated as overnight.
    #[serde(default = "default_overnight_threshold")]
    pub overnight_threshold_minutes: u32,
    #[serde(default = "default_check_interval")]
    pub adaptive_check_interval_minutes: u32,
}

/// Notification configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Local "HH:MM".
    #[serde(default = "default_bedtime")]
    pub bedtime: String,
    /// Local "HH:MM".
    #[serde(default = "default_wakeup")]
    pub wakeup: String,
    /// Offset of local time from UTC, east positive.
    #[serde(default)]
    pub utc_offset_minutes: i32,
    #[serde(default = "default_missed_after")]
    pub missed_after_minutes: u32,
    #[serde(default = "default_check_horizon")]
    pub adaptive_check_horizon: u32,
}

/// Compatibility with bakes created before steps carried an adaptive flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompatConfig {
    #[serde(default)]
    pub legacy_adaptive_keywords: bool,
    #[serde(default = "default_keywords")]
    pub keywords: Vec<String>,
}

/// Application configuration.
///
/// Serialized to/from TOML at `<data_dir>/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub compat: CompatConfig,
}

// Default functions
fn default_overnight_threshold() -> u32 {
    OVERNIGHT_THRESHOLD_MINUTES
}
fn default_check_interval() -> u32 {
    DEFAULT_CHECK_INTERVAL_MINUTES
}
fn default_true() -> bool {
    true
}
fn default_bedtime() -> String {
    "22:00".into()
}
fn default_wakeup() -> String {
    "07:00".into()
}
fn default_missed_after() -> u32 {
    45
}
fn default_check_horizon() -> u32 {
    8
}
fn default_keywords() -> Vec<String> {
    LegacyKeywords::default().words().to_vec()
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            overnight_threshold_minutes: default_overnight_threshold(),
            adaptive_check_interval_minutes: default_check_interval(),
        }
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bedtime: default_bedtime(),
            wakeup: default_wakeup(),
            utc_offset_minutes: 0,
            missed_after_minutes: default_missed_after(),
            adaptive_check_horizon: default_check_horizon(),
        }
    }
}

impl Default for CompatConfig {
    fn default() -> Self {
        Self {
            legacy_adaptive_keywords: false,
            keywords: default_keywords(),
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_some() {
                current = current.get_mut(part).ok_or_else(unknown)?;
                continue;
            }

            let obj = current.as_object_mut().ok_or_else(unknown)?;
            let existing = obj.get(part).ok_or_else(unknown)?;

            let new_value = match existing {
                serde_json::Value::Bool(_) => serde_json::Value::Bool(
                    value
                        .parse::<bool>()
                        .map_err(|e| invalid(e.to_string()))?,
                ),
                serde_json::Value::Number(_) => {
                    let n = value
                        .parse::<i64>()
                        .map_err(|_| invalid(format!("cannot parse '{value}' as integer")))?;
                    serde_json::Value::Number(n.into())
                }
                serde_json::Value::Array(_) => serde_json::Value::Array(
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(|s| serde_json::Value::String(s.to_string()))
                        .collect(),
                ),
                serde_json::Value::Object(_) => {
                    return Err(invalid("cannot replace a whole section".into()))
                }
                _ => serde_json::Value::String(value.into()),
            };

            obj.insert(part.to_string(), new_value);
            return Ok(());
        }

        Err(unknown())
    }

    fn path() -> Result<PathBuf, CoreError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from the data directory, writing defaults on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, CoreError> {
        Self::load_from(&Self::path()?)
    }

    /// Load from `path`, writing defaults there when it does not exist.
    pub fn load_from(path: &Path) -> Result<Self, CoreError> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let cfg: Config = toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?;
                cfg.validate()?;
                Ok(cfg)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Persist to the data directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save(&self) -> Result<(), CoreError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), CoreError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))?;
        Ok(())
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Array(items) => Some(
                items
                    .iter()
                    .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string))
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            other => Some(other.to_string()),
        }
    }

    /// Every leaf key with its value, sorted by key.
    pub fn entries(&self) -> Vec<(String, String)> {
        fn walk(prefix: &str, value: &serde_json::Value, out: &mut Vec<String>) {
            match value {
                serde_json::Value::Object(map) => {
                    for (k, v) in map {
                        let key = if prefix.is_empty() {
                            k.clone()
                        } else {
                            format!("{prefix}.{k}")
                        };
                        walk(&key, v, out);
                    }
                }
                _ => out.push(prefix.to_string()),
            }
        }

        let Ok(json) = serde_json::to_value(self) else {
            return Vec::new();
        };
        let mut keys = Vec::new();
        walk("", &json, &mut keys);
        keys.into_iter()
            .filter_map(|k| self.get(&k).map(|v| (k, v)))
            .collect()
    }

    /// Set a value by dot-separated key, keeping the field's type.
    ///
    /// The change is validated but not saved; call [`Config::save`].
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the value cannot be parsed
    /// or fails validation. `self` is left unchanged on error.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json =
            serde_json::to_value(&*self).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Config = serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Check values that the type alone does not constrain.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.notification_policy().map(|_| ())?;
        if self.schedule.overnight_threshold_minutes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "schedule.overnight_threshold_minutes".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.schedule.adaptive_check_interval_minutes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "schedule.adaptive_check_interval_minutes".into(),
                message: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    pub fn plan_defaults(&self) -> PlanDefaults {
        PlanDefaults {
            overnight_threshold_minutes: self.schedule.overnight_threshold_minutes,
            check_interval_minutes: self.schedule.adaptive_check_interval_minutes,
        }
    }

    /// Resolver matching the `[compat]` section.
    pub fn resolver(&self) -> AdaptiveResolver {
        if self.compat.legacy_adaptive_keywords {
            AdaptiveResolver::with_legacy_fallback(LegacyKeywords::new(&self.compat.keywords))
        } else {
            AdaptiveResolver::new()
        }
    }

    /// Alarm derivation policy from the `[notifications]` section.
    pub fn notification_policy(&self) -> Result<NotificationPolicy, ConfigError> {
        let n = &self.notifications;
        let utc_offset = FixedOffset::east_opt(n.utc_offset_minutes.saturating_mul(60))
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "notifications.utc_offset_minutes".into(),
                message: format!("{} is out of range", n.utc_offset_minutes),
            })?;
        Ok(NotificationPolicy {
            enabled: n.enabled,
            bedtime: parse_clock_time("notifications.bedtime", &n.bedtime)?,
            wakeup: parse_clock_time("notifications.wakeup", &n.wakeup)?,
            utc_offset,
            missed_after: Duration::minutes(i64::from(n.missed_after_minutes)),
            adaptive_check_horizon: n.adaptive_check_horizon as usize,
            resolver: self.resolver(),
        })
    }
}

fn parse_clock_time(key: &str, value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value, "%H:%M").map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("expected HH:MM, got '{value}'"),
    })
}
