//! Notification scheduling.
//!
//! Alarms are owned here and derived purely from the current timeline. See
//! [`NotificationScheduler`] for the derivation rules and
//! [`NotificationBackend`] for the delivery seam.

mod alarm;
mod backend;
mod scheduler;

pub use alarm::{Alarm, AlarmKind};
pub use backend::{AlarmBook, NotificationBackend};
pub use scheduler::{NotificationPolicy, NotificationScheduler};
