//! Analytics tap.
//!
//! Sinks observe committed events and never participate in control flow:
//! [`AnalyticsSink::record`] cannot fail. [`publish`] also catches a
//! panicking sink, which only helps in builds that unwind; the release
//! profile aborts on panic.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::events::Event;

/// Fire-and-forget consumer of bake events.
pub trait AnalyticsSink: Send + Sync {
    fn record(&self, event: &Event);
}

/// Deliver `event` to every sink, catching sink panics where they unwind.
pub fn publish(sinks: &[Arc<dyn AnalyticsSink>], event: &Event) {
    for sink in sinks {
        if catch_unwind(AssertUnwindSafe(|| sink.record(event))).is_err() {
            tracing::warn!(
                bake_id = event.bake_id(),
                event = event.name(),
                "analytics sink panicked; event dropped"
            );
        }
    }
}

/// In-memory log of events for later inspection.
#[derive(Debug, Default)]
pub struct ActivityLog {
    events: Mutex<Vec<Event>>,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.lock().clone()
    }

    pub fn for_bake(&self, bake_id: &str) -> Vec<Event> {
        self.lock()
            .iter()
            .filter(|e| e.bake_id() == bake_id)
            .cloned()
            .collect()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.lock().iter().map(Event::name).collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Event>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl AnalyticsSink for ActivityLog {
    fn record(&self, event: &Event) {
        self.lock().push(event.clone());
    }
}

/// Forwards events over an unbounded channel; sending never blocks.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: UnboundedSender<Event>,
}

impl ChannelSink {
    pub fn new() -> (Self, UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AnalyticsSink for ChannelSink {
    fn record(&self, event: &Event) {
        if self.tx.send(event.clone()).is_err() {
            tracing::debug!(event = event.name(), "analytics receiver gone; event dropped");
        }
    }
}

/// Writes every event to the `tracing` log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl AnalyticsSink for TracingSink {
    fn record(&self, event: &Event) {
        tracing::info!(
            bake_id = event.bake_id(),
            event = event.name(),
            at = %event.at(),
            "bake event"
        );
    }
}
