//! Channel between timeline mutation and alarm scheduling.
//!
//! A [`ScheduleMessage::Rebuild`] carries a [`Committed`] timeline, and
//! `Committed` can only be built by the session after it has swapped in the
//! new timeline. Rescheduling from an uncommitted timeline is therefore not
//! expressible.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};

use crate::error::NotificationError;
use crate::notify::{Alarm, NotificationBackend, NotificationScheduler};
use crate::timeline::Timeline;

/// A timeline that has been committed as the bake's current state.
#[derive(Debug, Clone)]
pub struct Committed {
    timeline: Timeline,
    last_interaction: Option<DateTime<Utc>>,
    at: DateTime<Utc>,
}

impl Committed {
    pub(crate) fn new(
        timeline: Timeline,
        last_interaction: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            timeline,
            last_interaction,
            at,
        }
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn at(&self) -> DateTime<Utc> {
        self.at
    }
}

#[derive(Debug, Clone)]
pub enum ScheduleMessage {
    /// Clear and re-derive the bake's alarms from the committed timeline.
    Rebuild(Committed),
    /// Cancel every alarm of the bake (pause, deletion).
    Cancel { bake_id: String },
}

impl ScheduleMessage {
    pub fn bake_id(&self) -> &str {
        match self {
            ScheduleMessage::Rebuild(committed) => committed.timeline.bake_id(),
            ScheduleMessage::Cancel { bake_id } => bake_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScheduleSender {
    tx: UnboundedSender<ScheduleMessage>,
}

impl ScheduleSender {
    /// Queue a message; returns false once the worker is gone.
    pub fn send(&self, message: ScheduleMessage) -> bool {
        self.tx.send(message).is_ok()
    }
}

/// Applies schedule messages to a notification backend, in order.
pub struct NotificationWorker<B> {
    scheduler: NotificationScheduler,
    backend: B,
    rx: UnboundedReceiver<ScheduleMessage>,
}

/// Create a sender and the worker that owns `backend`.
pub fn schedule_channel<B: NotificationBackend>(
    scheduler: NotificationScheduler,
    backend: B,
) -> (ScheduleSender, NotificationWorker<B>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ScheduleSender { tx },
        NotificationWorker {
            scheduler,
            backend,
            rx,
        },
    )
}

impl<B: NotificationBackend> NotificationWorker<B> {
    pub fn scheduler(&self) -> &NotificationScheduler {
        &self.scheduler
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Apply one message and return the alarms now scheduled for its bake.
    pub fn apply(&mut self, message: &ScheduleMessage) -> Result<Vec<Alarm>, NotificationError> {
        match message {
            ScheduleMessage::Rebuild(committed) => self.scheduler.rebuild(
                &mut self.backend,
                &committed.timeline,
                committed.last_interaction,
                committed.at,
            ),
            ScheduleMessage::Cancel { bake_id } => {
                self.backend.cancel_alarms(bake_id)?;
                tracing::debug!(bake_id = %bake_id, "alarms cancelled");
                Ok(Vec::new())
            }
        }
    }

    /// Apply everything queued so far and return the alarm set left by the
    /// last message, or `None` when nothing was queued.
    ///
    /// Every message is applied even if an earlier one failed; the first
    /// error is returned.
    pub fn drain(&mut self) -> Result<Option<Vec<Alarm>>, NotificationError> {
        let mut last = None;
        let mut first_error = None;
        loop {
            match self.rx.try_recv() {
                Ok(message) => match self.apply(&message) {
                    Ok(alarms) => last = Some(alarms),
                    Err(err) => {
                        tracing::warn!(bake_id = message.bake_id(), "alarm update failed: {err}");
                        first_error.get_or_insert(err);
                    }
                },
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(last),
        }
    }

    /// Process messages until every sender is dropped, then hand back the
    /// backend. Failed updates are logged and do not stop the loop.
    pub async fn run(mut self) -> B {
        while let Some(message) = self.rx.recv().await {
            if let Err(err) = self.apply(&message) {
                tracing::warn!(bake_id = message.bake_id(), "alarm update failed: {err}");
            }
        }
        self.backend
    }
}
