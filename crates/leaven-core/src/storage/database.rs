//! SQLite-based bake storage.
//!
//! Provides persistent storage for:
//! - Bakes and their step timelines
//! - Per-bake session state (paused flag, last interaction)
//! - Scheduled alarms, for a delivery daemon to poll
//! - The bake event log
//! - Key-value store for application state

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::{data_dir, BakeState, TimelineStore};
use crate::error::{CoreError, DatabaseError, NotificationError, Result};
use crate::events::Event;
use crate::notify::{Alarm, AlarmKind, NotificationBackend};
use crate::timeline::{Step, StepStatus, Timeline};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BakeRecord {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub paused: bool,
    pub last_interaction: Option<DateTime<Utc>>,
    pub step_count: u32,
    pub open_steps: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: i64,
    pub bake_id: String,
    pub name: String,
    pub at: DateTime<Utc>,
    pub event: Event,
}

/// SQLite database for bake storage.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open the database at `<data_dir>/leaven.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self> {
        Self::open_at(&data_dir()?.join("leaven.db"))
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute_batch(
            "PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS bakes (
                id               TEXT PRIMARY KEY,
                name             TEXT NOT NULL DEFAULT '',
                created_at       TEXT NOT NULL,
                paused           INTEGER NOT NULL DEFAULT 0,
                last_interaction TEXT
            );

            CREATE TABLE IF NOT EXISTS steps (
                bake_id          TEXT NOT NULL REFERENCES bakes(id) ON DELETE CASCADE,
                id               TEXT NOT NULL,
                step_index       INTEGER NOT NULL,
                name             TEXT NOT NULL,
                instructions     TEXT NOT NULL DEFAULT '',
                status           TEXT NOT NULL,
                scheduled_start  TEXT NOT NULL,
                scheduled_end    TEXT NOT NULL,
                estimated_minutes INTEGER NOT NULL,
                actual_minutes   INTEGER,
                is_adaptive      INTEGER NOT NULL DEFAULT 0,
                is_overnight     INTEGER NOT NULL DEFAULT 0,
                can_overlap      INTEGER NOT NULL DEFAULT 0,
                check_interval_minutes INTEGER NOT NULL,
                recipe           TEXT,
                PRIMARY KEY (bake_id, id)
            );

            CREATE TABLE IF NOT EXISTS alarms (
                bake_id        TEXT NOT NULL,
                step_id        TEXT NOT NULL,
                kind           TEXT NOT NULL,
                scheduled_time TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS events (
                id      INTEGER PRIMARY KEY AUTOINCREMENT,
                bake_id TEXT NOT NULL,
                name    TEXT NOT NULL,
                at      TEXT NOT NULL,
                payload TEXT NOT NULL
            );

            -- Create indexes for common query patterns
            CREATE INDEX IF NOT EXISTS idx_steps_bake_index ON steps(bake_id, step_index);
            CREATE INDEX IF NOT EXISTS idx_alarms_bake ON alarms(bake_id, scheduled_time);
            CREATE INDEX IF NOT EXISTS idx_events_bake ON events(bake_id, id);",
        )?;
        Ok(())
    }

    /// Store a new bake with its full timeline.
    ///
    /// # Errors
    /// Fails if a bake with the same id exists or the insert fails.
    pub fn create_bake(&self, name: &str, timeline: &Timeline, created_at: DateTime<Utc>) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO bakes (id, name, created_at) VALUES (?1, ?2, ?3)",
            params![timeline.bake_id(), name, created_at.to_rfc3339()],
        )?;
        for step in timeline.steps() {
            upsert_step(&tx, timeline.bake_id(), step)?;
        }
        tx.commit()?;
        tracing::info!(bake_id = timeline.bake_id(), steps = timeline.len(), "bake created");
        Ok(())
    }

    /// Every bake, newest first.
    pub fn list_bakes(&self) -> Result<Vec<BakeRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT b.id, b.name, b.created_at, b.paused, b.last_interaction,
                    COUNT(s.id),
                    COALESCE(SUM(CASE WHEN s.status IN ('pending', 'active') THEN 1 ELSE 0 END), 0)
             FROM bakes b LEFT JOIN steps s ON s.bake_id = b.id
             GROUP BY b.id
             ORDER BY b.created_at DESC, b.id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, bool>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, u32>(5)?,
                row.get::<_, u32>(6)?,
            ))
        })?;

        let mut bakes = Vec::new();
        for row in rows {
            let (id, name, created_at, paused, last, step_count, open_steps) = row?;
            bakes.push(BakeRecord {
                id,
                name,
                created_at: parse_time("bakes", &created_at)?,
                paused,
                last_interaction: last.as_deref().map(|s| parse_time("bakes", s)).transpose()?,
                step_count,
                open_steps,
            });
        }
        Ok(bakes)
    }

    /// Remove a bake with its steps, alarms and events.
    pub fn delete_bake(&self, bake_id: &str) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM alarms WHERE bake_id = ?1", params![bake_id])?;
        tx.execute("DELETE FROM events WHERE bake_id = ?1", params![bake_id])?;
        tx.execute("DELETE FROM steps WHERE bake_id = ?1", params![bake_id])?;
        let removed = tx.execute("DELETE FROM bakes WHERE id = ?1", params![bake_id])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    /// Append events to the bake event log.
    pub fn record_events(&self, events: &[Event]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        for event in events {
            tx.execute(
                "INSERT INTO events (bake_id, name, at, payload) VALUES (?1, ?2, ?3, ?4)",
                params![
                    event.bake_id(),
                    event.name(),
                    event.at().to_rfc3339(),
                    serde_json::to_string(event)?,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// A bake's event log, oldest first.
    pub fn events_for(&self, bake_id: &str) -> Result<Vec<EventRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, bake_id, name, at, payload FROM events WHERE bake_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![bake_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, bake_id, name, at, payload) = row?;
            let event = serde_json::from_str(&payload).map_err(|e| DatabaseError::CorruptRow {
                table: "events".into(),
                message: e.to_string(),
            })?;
            records.push(EventRecord {
                id,
                bake_id,
                name,
                at: parse_time("events", &at)?,
                event,
            });
        }
        Ok(records)
    }

    /// Stored alarms of a bake in firing order.
    pub fn alarms_for(&self, bake_id: &str) -> Result<Vec<Alarm>> {
        let mut stmt = self.conn.prepare(
            "SELECT bake_id, step_id, kind, scheduled_time FROM alarms
             WHERE bake_id = ?1 ORDER BY scheduled_time, step_id, kind",
        )?;
        let rows = stmt.query_map(params![bake_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut alarms = Vec::new();
        for row in rows {
            let (bake_id, step_id, kind, at) = row?;
            let kind = AlarmKind::parse(&kind).ok_or_else(|| DatabaseError::CorruptRow {
                table: "alarms".into(),
                message: format!("unknown alarm kind '{kind}'"),
            })?;
            alarms.push(Alarm::new(bake_id, step_id, kind, parse_time("alarms", &at)?));
        }
        Ok(alarms)
    }

    /// Alarm backend writing to the `alarms` table.
    pub fn alarm_table(&self) -> AlarmTable<'_> {
        AlarmTable { db: self }
    }

    fn ensure_bake(&self, bake_id: &str) -> Result<()> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM bakes WHERE id = ?1)",
            params![bake_id],
            |row| row.get(0),
        )?;
        if exists {
            Ok(())
        } else {
            Err(crate::error::EngineError::NotFound {
                kind: "Bake",
                id: bake_id.to_string(),
            }
            .into())
        }
    }
}

impl TimelineStore for Database {
    fn load_timeline(&self, bake_id: &str) -> Result<Timeline> {
        self.ensure_bake(bake_id)?;
        let mut stmt = self.conn.prepare(
            "SELECT id, step_index, name, instructions, status, scheduled_start, scheduled_end,
                    estimated_minutes, actual_minutes, is_adaptive, is_overnight, can_overlap,
                    check_interval_minutes, recipe
             FROM steps WHERE bake_id = ?1 ORDER BY step_index",
        )?;
        let rows = stmt.query_map(params![bake_id], RawStep::from_row)?;
        let mut steps = Vec::new();
        for row in rows {
            steps.push(row?.into_step()?);
        }
        Ok(Timeline::new(bake_id, steps)?)
    }

    fn save_step_mutations(&self, bake_id: &str, steps: &[Step]) -> Result<()> {
        self.ensure_bake(bake_id)?;
        let tx = self.conn.unchecked_transaction()?;
        for step in steps {
            upsert_step(&tx, bake_id, step)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn load_bake_state(&self, bake_id: &str) -> Result<BakeState> {
        let row = self
            .conn
            .query_row(
                "SELECT paused, last_interaction FROM bakes WHERE id = ?1",
                params![bake_id],
                |row| Ok((row.get::<_, bool>(0)?, row.get::<_, Option<String>>(1)?)),
            )
            .optional()?;
        let (paused, last) = row.ok_or_else(|| crate::error::EngineError::NotFound {
            kind: "Bake",
            id: bake_id.to_string(),
        })?;
        Ok(BakeState {
            paused,
            last_interaction: last.as_deref().map(|s| parse_time("bakes", s)).transpose()?,
        })
    }

    fn save_bake_state(&self, bake_id: &str, state: &BakeState) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE bakes SET paused = ?2, last_interaction = ?3 WHERE id = ?1",
            params![
                bake_id,
                state.paused,
                state.last_interaction.map(|t| t.to_rfc3339())
            ],
        )?;
        if updated == 0 {
            self.ensure_bake(bake_id)?;
        }
        Ok(())
    }

    fn commit(&self, bake_id: &str, steps: &[Step], state: &BakeState) -> Result<(), CoreError> {
        self.ensure_bake(bake_id)?;
        let tx = self.conn.unchecked_transaction()?;
        for step in steps {
            upsert_step(&tx, bake_id, step)?;
        }
        tx.execute(
            "UPDATE bakes SET paused = ?2, last_interaction = ?3 WHERE id = ?1",
            params![
                bake_id,
                state.paused,
                state.last_interaction.map(|t| t.to_rfc3339())
            ],
        )?;
        tx.commit()?;
        tracing::debug!(bake_id, steps = steps.len(), "bake changes persisted");
        Ok(())
    }
}

/// Alarm backend over the `alarms` table.
pub struct AlarmTable<'a> {
    db: &'a Database,
}

impl NotificationBackend for AlarmTable<'_> {
    fn schedule_alarm(&mut self, alarm: &Alarm) -> Result<(), NotificationError> {
        self.db
            .conn
            .execute(
                "INSERT INTO alarms (bake_id, step_id, kind, scheduled_time) VALUES (?1, ?2, ?3, ?4)",
                params![
                    alarm.bake_id,
                    alarm.step_id,
                    alarm.kind.as_str(),
                    alarm.scheduled_time.to_rfc3339()
                ],
            )
            .map(|_| ())
            .map_err(|e| NotificationError::Rejected {
                step_id: alarm.step_id.clone(),
                message: e.to_string(),
            })
    }

    fn cancel_alarms(&mut self, bake_id: &str) -> Result<(), NotificationError> {
        self.db
            .conn
            .execute("DELETE FROM alarms WHERE bake_id = ?1", params![bake_id])
            .map(|_| ())
            .map_err(|e| NotificationError::CancelFailed {
                bake_id: bake_id.to_string(),
                message: e.to_string(),
            })
    }
}

fn upsert_step(conn: &Connection, bake_id: &str, step: &Step) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR REPLACE INTO steps (
            bake_id, id, step_index, name, instructions, status, scheduled_start, scheduled_end,
            estimated_minutes, actual_minutes, is_adaptive, is_overnight, can_overlap,
            check_interval_minutes, recipe
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            bake_id,
            step.id,
            step.step_index,
            step.name,
            step.instructions,
            step.status.as_str(),
            step.scheduled_start.to_rfc3339(),
            step.scheduled_end.to_rfc3339(),
            step.estimated_duration_minutes,
            step.actual_duration_minutes,
            step.is_adaptive,
            step.is_overnight,
            step.can_overlap,
            step.adaptive_check_interval_minutes,
            step.recipe,
        ],
    )?;
    Ok(())
}

fn parse_time(table: &str, value: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::CorruptRow {
            table: table.to_string(),
            message: format!("bad timestamp '{value}': {e}"),
        })
}

/// A `steps` row before its text columns are decoded.
struct RawStep {
    id: String,
    step_index: u32,
    name: String,
    instructions: String,
    status: String,
    scheduled_start: String,
    scheduled_end: String,
    estimated_minutes: u32,
    actual_minutes: Option<u32>,
    is_adaptive: bool,
    is_overnight: bool,
    can_overlap: bool,
    check_interval_minutes: u32,
    recipe: Option<String>,
}

impl RawStep {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            step_index: row.get(1)?,
            name: row.get(2)?,
            instructions: row.get(3)?,
            status: row.get(4)?,
            scheduled_start: row.get(5)?,
            scheduled_end: row.get(6)?,
            estimated_minutes: row.get(7)?,
            actual_minutes: row.get(8)?,
            is_adaptive: row.get(9)?,
            is_overnight: row.get(10)?,
            can_overlap: row.get(11)?,
            check_interval_minutes: row.get(12)?,
            recipe: row.get(13)?,
        })
    }

    fn into_step(self) -> Result<Step, DatabaseError> {
        let status = StepStatus::parse(&self.status).ok_or_else(|| DatabaseError::CorruptRow {
            table: "steps".into(),
            message: format!("unknown status '{}'", self.status),
        })?;
        Ok(Step {
            id: self.id,
            step_index: self.step_index,
            name: self.name,
            instructions: self.instructions,
            status,
            scheduled_start: parse_time("steps", &self.scheduled_start)?,
            scheduled_end: parse_time("steps", &self.scheduled_end)?,
            estimated_duration_minutes: self.estimated_minutes,
            actual_duration_minutes: self.actual_minutes,
            is_adaptive: self.is_adaptive,
            is_overnight: self.is_overnight,
            can_overlap: self.can_overlap,
            adaptive_check_interval_minutes: self.check_interval_minutes,
            recipe: self.recipe,
        })
    }
}
