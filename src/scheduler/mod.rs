//! Durable task scheduler.
//!
//! A tick loop scans the store for due tasks and delivers them through the
//! [`Dispatch`] port. One-time tasks are marked fired after delivery;
//! recurring tasks re-arm at their next occurrence. Tasks that were due
//! while the process was offline fire once (one-time) or skip forward to
//! the first future occurrence (recurring) — never a catch-up burst.

mod recurrence;
mod store;

pub use recurrence::Recurrence;
pub(crate) use recurrence::resolve_local;
pub use store::{ScheduledTask, TaskStatus, TaskStore};

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{SchedulerError, TransportError};

/// Delivery port for fired tasks; the production implementation sends
/// through the bridge transport.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn deliver(&self, recipient: &str, payload: &str) -> Result<(), TransportError>;
}

/// Fires persisted tasks at or after their scheduled time.
pub struct Scheduler {
    store: Arc<TaskStore>,
    dispatch: Arc<dyn Dispatch>,
    tick: Duration,
    retry_base: Duration,
    max_attempts: u32,
    stopped: AtomicBool,
    in_flight: Mutex<HashSet<String>>,
}

impl Scheduler {
    pub fn new(store: Arc<TaskStore>, dispatch: Arc<dyn Dispatch>) -> Self {
        Self {
            store,
            dispatch,
            tick: Duration::from_secs(1),
            retry_base: Duration::from_secs(2),
            max_attempts: 3,
            stopped: AtomicBool::new(false),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Override the scan interval. Tests run with millisecond ticks.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Override the delivery retry backoff base.
    pub fn with_retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    /// Persist a new task and return its id. The write is durable before
    /// this returns; a failure here refuses the schedule request rather
    /// than acknowledging work that could be lost.
    pub fn schedule(
        &self,
        recipient: &str,
        payload: &str,
        fire_time: DateTime<Utc>,
        timezone: Tz,
        recurrence: Recurrence,
    ) -> Result<String, SchedulerError> {
        let task_id = format!("msg_{}", &Uuid::new_v4().simple().to_string()[..8]);

        let task = ScheduledTask {
            task_id: task_id.clone(),
            recipient: recipient.to_string(),
            payload: payload.to_string(),
            fire_time,
            timezone,
            recurrence,
            status: TaskStatus::Pending,
        };
        self.store.insert(&task)?;

        info!(
            task_id,
            recipient,
            %fire_time,
            recurrence = %recurrence,
            "scheduled task"
        );
        Ok(task_id)
    }

    /// Cancel a pending task.
    pub fn cancel(&self, task_id: &str) -> Result<(), SchedulerError> {
        if self.store.cancel(task_id)? {
            info!(task_id, "cancelled task");
            Ok(())
        } else {
            Err(SchedulerError::NotFound(task_id.to_string()))
        }
    }

    /// List tasks, optionally restricted to one status.
    pub fn list(&self, status: Option<TaskStatus>) -> Result<Vec<ScheduledTask>, SchedulerError> {
        self.store.list(status)
    }

    /// Re-align pending tasks after a restart: recurring tasks whose fire
    /// time passed while offline skip forward to the first strictly-future
    /// occurrence without firing; past-due one-time tasks are left due and
    /// fire once on the first tick.
    pub fn recover(&self) -> Result<(), SchedulerError> {
        let now = Utc::now();
        for task in self.store.due(now)? {
            if !task.recurrence.is_recurring() {
                continue;
            }
            if let Some(next) = task.recurrence.skip_forward(task.fire_time, now, task.timezone) {
                info!(
                    task_id = %task.task_id,
                    missed_from = %task.fire_time,
                    resumed_at = %next,
                    "skipping recurring task forward past offline window"
                );
                self.store.rearm(&task.task_id, next)?;
            }
        }
        Ok(())
    }

    /// Spawn the tick loop. Runs until [`Scheduler::shutdown`].
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if self.stopped.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(e) = Self::tick_once(&self, Utc::now()).await {
                    error!("scheduler tick failed: {e}");
                }
            }
        })
    }

    /// Stop the tick loop after the current iteration.
    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    async fn tick_once(scheduler: &Arc<Self>, now: DateTime<Utc>) -> Result<(), SchedulerError> {
        for task in scheduler.store.due(now)? {
            {
                let mut in_flight = scheduler.in_flight.lock().await;
                if !in_flight.insert(task.task_id.clone()) {
                    continue;
                }
            }

            // Each task fires on its own; a slow or failing delivery never
            // delays unrelated tasks.
            let worker = Arc::clone(scheduler);
            tokio::spawn(async move {
                worker.fire(task).await;
            });
        }
        Ok(())
    }

    async fn fire(&self, task: ScheduledTask) {
        let delivered = self.deliver_with_retry(&task).await;
        if !delivered {
            error!(
                task_id = %task.task_id,
                recipient = %task.recipient,
                attempts = self.max_attempts,
                "task delivery failed; advancing anyway"
            );
        }

        let advance = if task.recurrence.is_recurring() {
            task.recurrence
                .next_occurrence(task.fire_time, task.timezone)
                .and_then(|next| task.recurrence.skip_forward(next, Utc::now(), task.timezone))
        } else {
            None
        };

        let result = match advance {
            Some(next) => self.store.rearm(&task.task_id, next),
            None => self.store.mark_fired(&task.task_id),
        };
        if let Err(e) = result {
            error!(task_id = %task.task_id, "failed to persist task state: {e}");
        }

        self.in_flight.lock().await.remove(&task.task_id);
    }

    async fn deliver_with_retry(&self, task: &ScheduledTask) -> bool {
        for attempt in 0..self.max_attempts {
            match self.dispatch.deliver(&task.recipient, &task.payload).await {
                Ok(()) => {
                    info!(task_id = %task.task_id, recipient = %task.recipient, "task delivered");
                    return true;
                }
                Err(e) => {
                    warn!(
                        task_id = %task.task_id,
                        attempt = attempt + 1,
                        "task delivery failed: {e}"
                    );
                    if attempt + 1 < self.max_attempts {
                        tokio::time::sleep(self.retry_base * 2u32.pow(attempt)).await;
                    }
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicU32;

    use chrono::TimeZone;
    use chrono_tz::Tz::UTC;

    struct RecordingDispatch {
        sent: Mutex<Vec<(String, String)>>,
        attempts: AtomicU32,
        fail: bool,
    }

    impl RecordingDispatch {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                attempts: AtomicU32::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl Dispatch for RecordingDispatch {
        async fn deliver(&self, recipient: &str, payload: &str) -> Result<(), TransportError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TransportError::Closed);
            }
            self.sent
                .lock()
                .await
                .push((recipient.to_string(), payload.to_string()));
            Ok(())
        }
    }

    fn scheduler(dispatch: Arc<RecordingDispatch>) -> Arc<Scheduler> {
        let store = Arc::new(TaskStore::open_in_memory().unwrap());
        Arc::new(
            Scheduler::new(store, dispatch)
                .with_tick(Duration::from_millis(5))
                .with_retry_base(Duration::from_millis(1)),
        )
    }

    #[tokio::test]
    async fn one_time_task_fires_once_and_is_marked_fired() {
        let dispatch = RecordingDispatch::new(false);
        let scheduler = scheduler(dispatch.clone());

        let task_id = scheduler
            .schedule("15550001111", "ping", Utc::now(), UTC, Recurrence::Once)
            .unwrap();

        let handle = scheduler.clone().spawn();
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.shutdown();
        handle.await.unwrap();

        let sent = dispatch.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], ("15550001111".to_string(), "ping".to_string()));

        let task = scheduler.store.get(&task_id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Fired);
    }

    #[tokio::test]
    async fn recurring_task_rearms_in_the_future_and_stays_pending() {
        let dispatch = RecordingDispatch::new(false);
        let scheduler = scheduler(dispatch.clone());

        let task_id = scheduler
            .schedule(
                "15550001111",
                "checkin",
                Utc::now(),
                UTC,
                Recurrence::EveryHours(2),
            )
            .unwrap();

        let handle = scheduler.clone().spawn();
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.shutdown();
        handle.await.unwrap();

        assert_eq!(dispatch.sent.lock().await.len(), 1);

        let task = scheduler.store.get(&task_id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.fire_time > Utc::now());
    }

    #[tokio::test]
    async fn failed_delivery_retries_then_advances() {
        let dispatch = RecordingDispatch::new(true);
        let scheduler = scheduler(dispatch.clone());

        let task_id = scheduler
            .schedule("15550001111", "doomed", Utc::now(), UTC, Recurrence::Once)
            .unwrap();

        let handle = scheduler.clone().spawn();
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.shutdown();
        handle.await.unwrap();

        assert_eq!(dispatch.attempts.load(Ordering::SeqCst), 3);
        let task = scheduler.store.get(&task_id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Fired);
    }

    #[tokio::test]
    async fn recover_skips_recurring_forward_without_firing() {
        let dispatch = RecordingDispatch::new(false);
        let scheduler = scheduler(dispatch.clone());

        // Fire time four hours in the past: two occurrences were missed.
        let missed = Utc::now() - chrono::Duration::hours(4);
        let task_id = scheduler
            .schedule(
                "15550001111",
                "stale",
                missed,
                UTC,
                Recurrence::EveryHours(2),
            )
            .unwrap();

        scheduler.recover().unwrap();

        // No backfires, and the next occurrence is strictly in the future
        // on the original 2-hour grid.
        assert_eq!(dispatch.sent.lock().await.len(), 0);
        let task = scheduler.store.get(&task_id).unwrap().unwrap();
        assert!(task.fire_time > Utc::now());
        let offset = task.fire_time - missed;
        assert_eq!(offset.num_minutes() % 120, 0);
    }

    #[tokio::test]
    async fn recover_leaves_past_due_one_time_tasks_to_fire() {
        let dispatch = RecordingDispatch::new(false);
        let scheduler = scheduler(dispatch.clone());

        let missed = Utc::now() - chrono::Duration::hours(1);
        scheduler
            .schedule("15550001111", "late", missed, UTC, Recurrence::Once)
            .unwrap();

        scheduler.recover().unwrap();

        let handle = scheduler.clone().spawn();
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.shutdown();
        handle.await.unwrap();

        // Missed one-time tasks fire immediately once on restart.
        assert_eq!(dispatch.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn cancel_unknown_task_reports_not_found() {
        let dispatch = RecordingDispatch::new(false);
        let scheduler = scheduler(dispatch);

        let err = scheduler.cancel("msg_missing").unwrap_err();
        assert!(matches!(err, SchedulerError::NotFound(_)));

        let task_id = scheduler
            .schedule(
                "15550001111",
                "bye",
                Utc::now() + chrono::Duration::hours(1),
                UTC,
                Recurrence::Once,
            )
            .unwrap();
        scheduler.cancel(&task_id).unwrap();
        let task = scheduler.store.get(&task_id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
    }

    #[test]
    fn restart_round_trip_preserves_task_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scheduler.db");

        let fire_time = Utc.with_ymd_and_hms(2026, 12, 24, 18, 0, 0).unwrap();
        let task_id;
        {
            let store = Arc::new(TaskStore::open(&path).unwrap());
            let scheduler = Scheduler::new(store, RecordingDispatch::new(false));
            task_id = scheduler
                .schedule(
                    "15550001111",
                    "merry christmas",
                    fire_time,
                    chrono_tz::Europe::Rome,
                    Recurrence::Weekly,
                )
                .unwrap();
        }

        let store = Arc::new(TaskStore::open(&path).unwrap());
        let scheduler = Scheduler::new(store, RecordingDispatch::new(false));
        let tasks = scheduler.list(Some(TaskStatus::Pending)).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].task_id, task_id);
        assert_eq!(tasks[0].recipient, "15550001111");
        assert_eq!(tasks[0].payload, "merry christmas");
        assert_eq!(tasks[0].fire_time, fire_time);
        assert_eq!(tasks[0].timezone, chrono_tz::Europe::Rome);
        assert_eq!(tasks[0].recurrence, Recurrence::Weekly);
        assert_eq!(tasks[0].status, TaskStatus::Pending);
    }
}
