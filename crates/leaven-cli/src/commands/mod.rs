pub mod alarms;
pub mod bake;
pub mod config;
