//! # Leaven Core Library
//!
//! This library provides the scheduling engine behind Leaven, a guide for
//! long-running sourdough bakes. It keeps a bake's step timeline in sync with
//! real elapsed time as the baker runs early or late, and keeps reminders in
//! sync with the timeline. All operations are available through the `leaven`
//! CLI, which is a thin layer over this crate.
//!
//! ## Architecture
//!
//! - **Timeline**: Ordered steps with planned start/end times and invariants
//! - **State Machine**: `pending -> active -> completed | skipped` transitions
//! - **Recalibration**: Pure recomputation of the remaining schedule
//! - **Notifications**: Stateless re-derivation of alarms after every change
//! - **Storage**: SQLite bake storage and TOML-based configuration
//!
//! ## Key Components
//!
//! - [`BakeSession`]: Single-writer command processing for one bake
//! - [`recalibrate()`]: The recalibration engine
//! - [`NotificationScheduler`]: Alarm derivation
//! - [`Database`]: Bake persistence
//! - [`Config`]: Application configuration management

pub mod activity;
pub mod adaptive;
pub mod analytics;
pub mod bake;
pub mod bus;
pub mod clock;
pub mod error;
pub mod events;
pub mod notify;
pub mod recalibrate;
pub mod storage;
pub mod timeline;

pub use activity::ActivityTracker;
pub use adaptive::{AdaptiveResolver, LegacyKeywords};
pub use analytics::{ActivityLog, AnalyticsSink, ChannelSink, TracingSink};
pub use bake::{BakeSession, BakeSnapshot, Command, Outcome, SkipMode};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{
    ConfigError, CoreError, DatabaseError, EngineError, NotificationError, ValidationError,
};
pub use events::Event;
pub use notify::{
    Alarm, AlarmBook, AlarmKind, NotificationBackend, NotificationPolicy, NotificationScheduler,
};
pub use recalibrate::{recalibrate, Recalibration, RecalibrationMode, RecalibrationRequest};
pub use storage::{BakeState, Config, Database, TimelineStore};
pub use timeline::{
    plan_timeline, plan_timeline_with, RecipePlan, ScheduleConflict, Step, StepStatus,
    StepTemplate, Timeline,
};
