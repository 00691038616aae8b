//! Durable task store.
//!
//! Every create/cancel/fire/re-arm mutation hits sqlite before the
//! scheduler's view of the task changes, so a restart reconstructs exactly
//! the pending set.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::SchedulerError;
use crate::scheduler::recurrence::Recurrence;

/// Lifecycle state of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Fired,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Fired => "fired",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    fn from_db_str(s: &str) -> Self {
        match s {
            "fired" => TaskStatus::Fired,
            "cancelled" => TaskStatus::Cancelled,
            _ => TaskStatus::Pending,
        }
    }
}

/// A persisted scheduled send.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledTask {
    pub task_id: String,
    pub recipient: String,
    pub payload: String,
    pub fire_time: DateTime<Utc>,
    pub timezone: Tz,
    pub recurrence: Recurrence,
    pub status: TaskStatus,
}

/// Sqlite-backed store for scheduled tasks.
pub struct TaskStore {
    conn: Mutex<Connection>,
}

impl TaskStore {
    /// Open (and bootstrap) the store at `path`.
    pub fn open(path: &Path) -> Result<Self, SchedulerError> {
        let conn = Connection::open(path)?;
        Self::bootstrap(conn)
    }

    /// Open an in-memory store. Used by tests and ephemeral runs.
    pub fn open_in_memory() -> Result<Self, SchedulerError> {
        Self::bootstrap(Connection::open_in_memory()?)
    }

    fn bootstrap(conn: Connection) -> Result<Self, SchedulerError> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS scheduled_tasks (
                task_id    TEXT PRIMARY KEY,
                recipient  TEXT NOT NULL,
                payload    TEXT NOT NULL,
                fire_time  TEXT NOT NULL,
                timezone   TEXT NOT NULL,
                recurrence TEXT NOT NULL,
                status     TEXT NOT NULL DEFAULT 'pending'
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert a new pending task.
    pub fn insert(&self, task: &ScheduledTask) -> Result<(), SchedulerError> {
        let conn = self.conn.lock().expect("task store lock poisoned");
        conn.execute(
            "INSERT INTO scheduled_tasks
                (task_id, recipient, payload, fire_time, timezone, recurrence, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                task.task_id,
                task.recipient,
                task.payload,
                task.fire_time.to_rfc3339(),
                task.timezone.name(),
                task.recurrence.to_string(),
                task.status.as_str(),
            ],
        )?;
        Ok(())
    }

    /// Mark a one-time task as fired.
    pub fn mark_fired(&self, task_id: &str) -> Result<(), SchedulerError> {
        let conn = self.conn.lock().expect("task store lock poisoned");
        conn.execute(
            "UPDATE scheduled_tasks SET status = 'fired' WHERE task_id = ?1",
            params![task_id],
        )?;
        Ok(())
    }

    /// Re-arm a recurring task at its next fire time, keeping it pending.
    pub fn rearm(&self, task_id: &str, next: DateTime<Utc>) -> Result<(), SchedulerError> {
        let conn = self.conn.lock().expect("task store lock poisoned");
        conn.execute(
            "UPDATE scheduled_tasks SET fire_time = ?2 WHERE task_id = ?1",
            params![task_id, next.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Cancel a pending task. Returns false when no pending task matched.
    pub fn cancel(&self, task_id: &str) -> Result<bool, SchedulerError> {
        let conn = self.conn.lock().expect("task store lock poisoned");
        let changed = conn.execute(
            "UPDATE scheduled_tasks SET status = 'cancelled'
             WHERE task_id = ?1 AND status = 'pending'",
            params![task_id],
        )?;
        Ok(changed > 0)
    }

    /// Fetch one task by id.
    pub fn get(&self, task_id: &str) -> Result<Option<ScheduledTask>, SchedulerError> {
        let conn = self.conn.lock().expect("task store lock poisoned");
        conn.query_row(
            "SELECT task_id, recipient, payload, fire_time, timezone, recurrence, status
             FROM scheduled_tasks WHERE task_id = ?1",
            params![task_id],
            row_to_task,
        )
        .optional()
        .map_err(SchedulerError::from)
    }

    /// List tasks, optionally restricted to one status, soonest first.
    pub fn list(&self, status: Option<TaskStatus>) -> Result<Vec<ScheduledTask>, SchedulerError> {
        let conn = self.conn.lock().expect("task store lock poisoned");

        let mut tasks = Vec::new();
        match status {
            Some(status) => {
                let mut stmt = conn.prepare(
                    "SELECT task_id, recipient, payload, fire_time, timezone, recurrence, status
                     FROM scheduled_tasks WHERE status = ?1 ORDER BY fire_time",
                )?;
                let rows = stmt.query_map(params![status.as_str()], row_to_task)?;
                for row in rows {
                    tasks.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT task_id, recipient, payload, fire_time, timezone, recurrence, status
                     FROM scheduled_tasks ORDER BY fire_time",
                )?;
                let rows = stmt.query_map([], row_to_task)?;
                for row in rows {
                    tasks.push(row?);
                }
            }
        }
        Ok(tasks)
    }

    /// Pending tasks due at or before `now`, soonest first.
    pub fn due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledTask>, SchedulerError> {
        let conn = self.conn.lock().expect("task store lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT task_id, recipient, payload, fire_time, timezone, recurrence, status
             FROM scheduled_tasks
             WHERE status = 'pending' AND fire_time <= ?1
             ORDER BY fire_time",
        )?;
        let rows = stmt.query_map(params![now.to_rfc3339()], row_to_task)?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }
        Ok(tasks)
    }
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduledTask> {
    let fire_time: String = row.get(3)?;
    let timezone: String = row.get(4)?;
    let recurrence: String = row.get(5)?;
    let status: String = row.get(6)?;

    let fire_time = DateTime::parse_from_rfc3339(&fire_time)
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?
        .with_timezone(&Utc);

    let timezone: Tz = timezone.parse().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown timezone '{timezone}'").into(),
        )
    })?;

    let recurrence: Recurrence = recurrence.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            rusqlite::types::Type::Text,
            format!("{e}").into(),
        )
    })?;

    Ok(ScheduledTask {
        task_id: row.get(0)?,
        recipient: row.get(1)?,
        payload: row.get(2)?,
        fire_time,
        timezone,
        recurrence,
        status: TaskStatus::from_db_str(&status),
    })
}
