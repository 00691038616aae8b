//! Scheduling tools: create, list, and cancel timed sends.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;

use crate::error::ToolError;
use crate::scheduler::{resolve_local, Recurrence, Scheduler, TaskStatus};
use crate::tools::{require_str, Tool};

/// Schedule a message for later, once or on a recurrence.
pub struct ScheduleMessageTool {
    scheduler: Arc<Scheduler>,
    timezone: Tz,
}

impl ScheduleMessageTool {
    pub fn new(scheduler: Arc<Scheduler>, timezone: Tz) -> Self {
        Self {
            scheduler,
            timezone,
        }
    }
}

#[async_trait]
impl Tool for ScheduleMessageTool {
    fn name(&self) -> &str {
        "schedule_message"
    }

    fn description(&self) -> &str {
        "Schedule a message to be sent at a future time, once or on a \
         recurring basis. Times may be HH:MM (24-hour, local) or a full \
         RFC 3339 timestamp."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "phone_number": {
                    "type": "string",
                    "description": "Recipient phone number (digits with country code)."
                },
                "message": {
                    "type": "string",
                    "description": "The message text to schedule."
                },
                "schedule_time": {
                    "type": "string",
                    "description": "When to send: HH:MM 24-hour local time, or RFC 3339."
                },
                "recurring": {
                    "type": "boolean",
                    "description": "Whether the message repeats.",
                    "default": false
                },
                "recurrence_pattern": {
                    "type": "string",
                    "enum": ["daily", "weekly", "monthly", "every_30_minutes", "every_2_hours"],
                    "description": "Required when recurring: how the message repeats."
                }
            },
            "required": ["phone_number", "message", "schedule_time"]
        })
    }

    async fn execute(&self, params: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let phone_number = require_str(&params, "phone_number")?;
        let message = require_str(&params, "message")?;
        let raw_time = require_str(&params, "schedule_time")?;
        let recurring = params
            .get("recurring")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let recurrence = if recurring {
            let pattern = require_str(&params, "recurrence_pattern")?;
            pattern
                .parse::<Recurrence>()
                .map_err(|e| ToolError::InvalidParameters(e.to_string()))?
        } else {
            Recurrence::Once
        };

        let now = Utc::now();
        let mut fire_time = parse_schedule_time(raw_time, self.timezone, now)?;
        if fire_time <= now {
            fire_time = match recurrence {
                // A one-time HH:MM already past today means tomorrow.
                Recurrence::Once => fire_time + chrono::Duration::days(1),
                rec => rec
                    .skip_forward(fire_time, now, self.timezone)
                    .unwrap_or(fire_time),
            };
        }

        let task_id = self
            .scheduler
            .schedule(phone_number, message, fire_time, self.timezone, recurrence)
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        Ok(serde_json::json!({
            "status": "scheduled",
            "task_id": task_id,
            "to": phone_number,
            "fire_time": fire_time.to_rfc3339(),
            "recurrence": recurrence.to_string(),
        }))
    }
}

/// Interpret a schedule time: RFC 3339 as-is, or HH:MM as the next local
/// wall-clock occurrence today.
fn parse_schedule_time(raw: &str, tz: Tz, now: DateTime<Utc>) -> Result<DateTime<Utc>, ToolError> {
    if let Ok(absolute) = DateTime::parse_from_rfc3339(raw) {
        return Ok(absolute.with_timezone(&Utc));
    }

    let time = NaiveTime::parse_from_str(raw, "%H:%M").map_err(|_| {
        ToolError::InvalidParameters(format!(
            "'{raw}' is not an HH:MM time or an RFC 3339 timestamp"
        ))
    })?;

    let today = now.with_timezone(&tz).date_naive();
    Ok(resolve_local(today.and_time(time), tz))
}

/// List pending scheduled tasks.
pub struct ListScheduledTasksTool {
    scheduler: Arc<Scheduler>,
}

impl ListScheduledTasksTool {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl Tool for ListScheduledTasksTool {
    fn name(&self) -> &str {
        "list_scheduled_tasks"
    }

    fn description(&self) -> &str {
        "List all pending scheduled messages with their ids, next fire \
         times, and recurrence."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _params: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let tasks = self
            .scheduler
            .list(Some(TaskStatus::Pending))
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        let formatted: Vec<serde_json::Value> = tasks
            .iter()
            .map(|task| {
                serde_json::json!({
                    "id": task.task_id,
                    "to": task.recipient,
                    "next_run": task.fire_time.to_rfc3339(),
                    "recurrence": task.recurrence.to_string(),
                    "message_preview": task.payload.chars().take(50).collect::<String>(),
                })
            })
            .collect();

        Ok(serde_json::json!({ "tasks": formatted }))
    }
}

/// Cancel a scheduled task by id.
pub struct CancelScheduledTaskTool {
    scheduler: Arc<Scheduler>,
}

impl CancelScheduledTaskTool {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl Tool for CancelScheduledTaskTool {
    fn name(&self) -> &str {
        "cancel_scheduled_task"
    }

    fn description(&self) -> &str {
        "Cancel a scheduled message by its task id (see list_scheduled_tasks)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "task_id": {
                    "type": "string",
                    "description": "The task id to cancel."
                }
            },
            "required": ["task_id"]
        })
    }

    async fn execute(&self, params: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let task_id = require_str(&params, "task_id")?;

        self.scheduler
            .cancel(task_id)
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        Ok(serde_json::json!({
            "status": "cancelled",
            "task_id": task_id,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{TimeZone, Timelike};
    use chrono_tz::Tz::UTC;

    use crate::error::TransportError;
    use crate::scheduler::{Dispatch, TaskStore};

    struct NullDispatch;

    #[async_trait]
    impl Dispatch for NullDispatch {
        async fn deliver(&self, _recipient: &str, _payload: &str) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn scheduler() -> Arc<Scheduler> {
        let store = Arc::new(TaskStore::open_in_memory().unwrap());
        Arc::new(Scheduler::new(store, Arc::new(NullDispatch)))
    }

    #[test]
    fn schedule_time_accepts_rfc3339_and_wall_clock() {
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 10, 0, 0).unwrap();

        let absolute = parse_schedule_time("2026-07-01T08:00:00+02:00", UTC, now).unwrap();
        assert_eq!(absolute, Utc.with_ymd_and_hms(2026, 7, 1, 6, 0, 0).unwrap());

        let wall = parse_schedule_time("14:30", chrono_tz::Europe::Rome, now).unwrap();
        let local = wall.with_timezone(&chrono_tz::Europe::Rome);
        assert_eq!((local.hour(), local.minute()), (14, 30));

        assert!(parse_schedule_time("half past nine", UTC, now).is_err());
    }

    #[tokio::test]
    async fn schedules_one_time_task_and_lists_it() {
        let scheduler = scheduler();
        let schedule = ScheduleMessageTool::new(scheduler.clone(), UTC);
        let list = ListScheduledTasksTool::new(scheduler.clone());

        let future = (Utc::now() + chrono::Duration::hours(2)).to_rfc3339();
        let result = schedule
            .execute(serde_json::json!({
                "phone_number": "15550001111",
                "message": "remember the meeting",
                "schedule_time": future,
            }))
            .await
            .unwrap();
        assert_eq!(result["status"], "scheduled");
        assert_eq!(result["recurrence"], "once");

        let listed = list.execute(serde_json::json!({})).await.unwrap();
        assert_eq!(listed["tasks"].as_array().unwrap().len(), 1);
        assert_eq!(listed["tasks"][0]["to"], "15550001111");
    }

    #[tokio::test]
    async fn recurring_requires_a_pattern_and_validates_it() {
        let tool = ScheduleMessageTool::new(scheduler(), UTC);

        let err = tool
            .execute(serde_json::json!({
                "phone_number": "1",
                "message": "m",
                "schedule_time": "08:00",
                "recurring": true,
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParameters(_)));

        let err = tool
            .execute(serde_json::json!({
                "phone_number": "1",
                "message": "m",
                "schedule_time": "08:00",
                "recurring": true,
                "recurrence_pattern": "sometimes",
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParameters(_)));
    }

    #[tokio::test]
    async fn past_wall_clock_times_move_into_the_future() {
        let scheduler = scheduler();
        let tool = ScheduleMessageTool::new(scheduler.clone(), UTC);

        // Schedule for "now minus a bit" by using the current HH:MM; the
        // resulting fire time must not be in the past for recurring tasks.
        let result = tool
            .execute(serde_json::json!({
                "phone_number": "1",
                "message": "daily ping",
                "schedule_time": "00:00",
                "recurring": true,
                "recurrence_pattern": "daily",
            }))
            .await
            .unwrap();

        let fire_time: DateTime<Utc> = result["fire_time"]
            .as_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!(fire_time > Utc::now() - chrono::Duration::minutes(1));
    }

    #[tokio::test]
    async fn cancel_round_trip_and_unknown_id() {
        let scheduler = scheduler();
        let schedule = ScheduleMessageTool::new(scheduler.clone(), UTC);
        let cancel = CancelScheduledTaskTool::new(scheduler.clone());

        let created = schedule
            .execute(serde_json::json!({
                "phone_number": "1",
                "message": "m",
                "schedule_time": (Utc::now() + chrono::Duration::hours(1)).to_rfc3339(),
            }))
            .await
            .unwrap();
        let task_id = created["task_id"].as_str().unwrap();

        let result = cancel
            .execute(serde_json::json!({"task_id": task_id}))
            .await
            .unwrap();
        assert_eq!(result["status"], "cancelled");

        let result = cancel
            .execute(serde_json::json!({"task_id": "msg_missing"}))
            .await
            .unwrap_err();
        assert!(matches!(result, ToolError::ExecutionFailed(_)));
    }
}
