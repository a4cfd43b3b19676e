//! Notification backends.
//!
//! A backend is whatever actually delivers reminders: an OS notification
//! service, a database table polled by a daemon, or memory in tests.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::alarm::Alarm;
use crate::error::NotificationError;

pub trait NotificationBackend {
    fn schedule_alarm(&mut self, alarm: &Alarm) -> Result<(), NotificationError>;

    /// Cancel every alarm of a bake as a unit.
    fn cancel_alarms(&mut self, bake_id: &str) -> Result<(), NotificationError>;
}

impl<B: NotificationBackend + ?Sized> NotificationBackend for &mut B {
    fn schedule_alarm(&mut self, alarm: &Alarm) -> Result<(), NotificationError> {
        (**self).schedule_alarm(alarm)
    }

    fn cancel_alarms(&mut self, bake_id: &str) -> Result<(), NotificationError> {
        (**self).cancel_alarms(bake_id)
    }
}

impl<B: NotificationBackend + ?Sized> NotificationBackend for Box<B> {
    fn schedule_alarm(&mut self, alarm: &Alarm) -> Result<(), NotificationError> {
        (**self).schedule_alarm(alarm)
    }

    fn cancel_alarms(&mut self, bake_id: &str) -> Result<(), NotificationError> {
        (**self).cancel_alarms(bake_id)
    }
}

/// In-memory alarm store keyed by bake.
#[derive(Debug, Clone, Default)]
pub struct AlarmBook {
    alarms: HashMap<String, Vec<Alarm>>,
}

impl AlarmBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alarms_for(&self, bake_id: &str) -> &[Alarm] {
        self.alarms.get(bake_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.alarms.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Alarms of a bake that are due at `now`, in firing order.
    pub fn due(&self, bake_id: &str, now: DateTime<Utc>) -> Vec<&Alarm> {
        let mut due: Vec<&Alarm> = self
            .alarms_for(bake_id)
            .iter()
            .filter(|a| a.scheduled_time <= now)
            .collect();
        due.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        due
    }
}

impl NotificationBackend for AlarmBook {
    fn schedule_alarm(&mut self, alarm: &Alarm) -> Result<(), NotificationError> {
        self.alarms
            .entry(alarm.bake_id.clone())
            .or_default()
            .push(alarm.clone());
        Ok(())
    }

    fn cancel_alarms(&mut self, bake_id: &str) -> Result<(), NotificationError> {
        self.alarms.remove(bake_id);
        Ok(())
    }
}
