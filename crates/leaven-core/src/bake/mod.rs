//! Running a bake.
//!
//! This module provides:
//! - The pure step state machine ([`machine`])
//! - The user [`Command`] vocabulary
//! - [`BakeSession`], which applies commands one at a time, commits the new
//!   timeline and keeps alarms, analytics and persistence in step with it

pub mod machine;

mod command;
mod session;

pub use command::Command;
pub use machine::{SkipMode, Transition};
pub use session::{BakeSession, BakeSnapshot, Outcome};
