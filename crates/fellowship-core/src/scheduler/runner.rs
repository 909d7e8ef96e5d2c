//! Scheduler background loop.
//!
//! Spawns a tokio task that wakes on a fixed tick and starts every registered
//! task whose interval has elapsed. Tasks run detached from the tick, so a
//! slow task never delays the others.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::utils::InFlightFlag;

use super::IntervalSpec;

/// Default interval between scheduler ticks (seconds).
pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 60;

/// Async job run by the scheduler.
pub type TaskAction = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

struct ScheduledTask {
    name: String,
    interval: IntervalSpec,
    last_run: Option<DateTime<Utc>>,
    action: TaskAction,
    /// Set while an invocation is still running
    in_flight: Arc<InFlightFlag>,
}

impl ScheduledTask {
    fn label(&self) -> String {
        format!("{} ({})", self.name, self.interval)
    }
}

/// Introspection snapshot for the diagnostics page.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct BackgroundStatus {
    pub running: bool,
    pub tasks: Vec<String>,
}

/// Periodic task runner with an explicit `start`/`stop` lifecycle.
pub struct TaskScheduler {
    tasks: Arc<Mutex<Vec<ScheduledTask>>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    tick_interval: Duration,
}

impl TaskScheduler {
    pub fn new(tick_interval: Duration) -> Self {
        Self {
            tasks: Arc::new(Mutex::new(Vec::new())),
            ticker: Mutex::new(None),
            tick_interval,
        }
    }

    fn lock_tasks(tasks: &Mutex<Vec<ScheduledTask>>) -> MutexGuard<'_, Vec<ScheduledTask>> {
        // A panic while holding the lock cannot leave the task list half-updated
        tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_ticker(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.ticker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register `action` to run on the cron-style `schedule`.
    ///
    /// Registering an existing name replaces the previous action and keeps its
    /// last run time.
    pub fn register_task<F, Fut>(&self, name: &str, schedule: &str, action: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let interval = IntervalSpec::parse(schedule);
        let action: TaskAction = Arc::new(move || action().boxed());
        let mut tasks = Self::lock_tasks(&self.tasks);

        if let Some(existing) = tasks.iter_mut().find(|t| t.name == name) {
            warn!(task = name, %interval, "Task already registered, replacing");
            existing.interval = interval;
            existing.action = action;
            return;
        }

        debug!(task = name, %interval, "Task registered");
        tasks.push(ScheduledTask {
            name: name.to_string(),
            interval,
            last_run: None,
            action,
            in_flight: Arc::new(InFlightFlag::new()),
        });
    }

    pub fn unregister_task(&self, name: &str) -> bool {
        let mut tasks = Self::lock_tasks(&self.tasks);
        let before = tasks.len();
        tasks.retain(|t| t.name != name);
        tasks.len() != before
    }

    /// Start ticking. Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut ticker = self.lock_ticker();
        if ticker.as_ref().is_some_and(|h| !h.is_finished()) {
            warn!("Scheduler already running");
            return;
        }

        let tasks = Arc::clone(&self.tasks);
        let period = self.tick_interval;
        *ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                Self::run_due(&tasks, Utc::now());
            }
        }));
        info!(tick_secs = period.as_secs(), "Scheduler started");
    }

    pub fn stop(&self) {
        match self.lock_ticker().take() {
            Some(handle) => {
                handle.abort();
                info!("Scheduler stopped");
            }
            None => debug!("Scheduler not running"),
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_ticker().as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn status(&self) -> BackgroundStatus {
        let tasks = Self::lock_tasks(&self.tasks)
            .iter()
            .map(ScheduledTask::label)
            .collect();
        BackgroundStatus {
            running: self.is_running(),
            tasks,
        }
    }

    /// One tick: start every due task that is not still running.
    ///
    /// `last_run` is stamped before the task settles, so a failed run waits
    /// for its next interval rather than retrying on the next tick.
    fn run_due(tasks: &Mutex<Vec<ScheduledTask>>, now: DateTime<Utc>) -> Vec<JoinHandle<()>> {
        let due: Vec<_> = {
            let mut tasks = Self::lock_tasks(tasks);
            tasks
                .iter_mut()
                .filter(|task| task.interval.is_due(task.last_run, now))
                .filter_map(|task| {
                    let Some(guard) = task.in_flight.try_acquire_owned() else {
                        debug!(task = %task.name, "Previous run still in flight, skipping");
                        return None;
                    };
                    task.last_run = Some(now);
                    Some((task.name.clone(), Arc::clone(&task.action), guard))
                })
                .collect()
        };

        // Task list is unlocked here; actions may call back into the scheduler
        due.into_iter()
            .map(|(name, action, guard)| {
                let run = action();
                tokio::spawn(async move {
                    let _guard = guard;
                    debug!(task = %name, "Running scheduled task");
                    if let Err(e) = run.await {
                        warn!(task = %name, error = %e, "Scheduled task failed");
                    }
                })
            })
            .collect()
    }

    #[cfg(test)]
    fn tick_at(&self, now: DateTime<Utc>) -> Vec<JoinHandle<()>> {
        Self::run_due(&self.tasks, now)
    }

    #[cfg(test)]
    fn set_last_run(&self, name: &str, at: DateTime<Utc>) {
        for task in Self::lock_tasks(&self.tasks).iter_mut().filter(|t| t.name == name) {
            task.last_run = Some(at);
        }
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_TICK_INTERVAL_SECS))
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.lock_ticker().take() {
            handle.abort();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_task(
        counter: &Arc<AtomicUsize>,
    ) -> impl Fn() -> futures::future::Ready<anyhow::Result<()>> + Send + Sync + 'static {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(Ok(()))
        }
    }

    async fn settle(handles: Vec<JoinHandle<()>>) -> usize {
        let count = handles.len();
        for handle in handles {
            handle.await.unwrap();
        }
        count
    }

    #[tokio::test]
    async fn test_never_run_task_is_due_immediately() {
        let scheduler = TaskScheduler::default();
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler.register_task("refresh", "*/5 * * * *", counting_task(&counter));

        assert_eq!(settle(scheduler.tick_at(Utc::now())).await, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_thirty_minute_interval() {
        let scheduler = TaskScheduler::default();
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler.register_task("digest", "*/30 * * * *", counting_task(&counter));

        let now = Utc::now();
        scheduler.set_last_run("digest", now - ChronoDuration::minutes(29));
        assert_eq!(settle(scheduler.tick_at(now)).await, 0);
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        // Two minutes later the last run is 31 minutes old
        let later = now + ChronoDuration::minutes(2);
        assert_eq!(settle(scheduler.tick_at(later)).await, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // Same tick time again: already marked as run
        assert_eq!(settle(scheduler.tick_at(later)).await, 0);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_task_waits_for_next_interval() {
        let scheduler = TaskScheduler::default();
        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&attempts);
        scheduler.register_task("flaky", "*/10 * * * *", move || {
            seen.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow::anyhow!("backend down")) }
        });

        let now = Utc::now();
        settle(scheduler.tick_at(now)).await;
        settle(scheduler.tick_at(now + ChronoDuration::minutes(1))).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        settle(scheduler.tick_at(now + ChronoDuration::minutes(10))).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_slow_task_is_not_reentered() {
        let scheduler = TaskScheduler::default();
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&counter);
        scheduler.register_task("slow", "*/1 * * * *", move || {
            seen.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100))
                .map(|_| Ok(()))
        });

        let now = Utc::now();
        let first = scheduler.tick_at(now);
        assert_eq!(first.len(), 1);

        // Due again by the clock, but the first run has not settled
        assert!(scheduler.tick_at(now + ChronoDuration::minutes(5)).is_empty());

        settle(first).await;
        assert_eq!(settle(scheduler.tick_at(now + ChronoDuration::minutes(5))).await, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_duplicate_registration_replaces() {
        let scheduler = TaskScheduler::default();
        let old = Arc::new(AtomicUsize::new(0));
        let new = Arc::new(AtomicUsize::new(0));
        scheduler.register_task("check", "*/5 * * * *", counting_task(&old));
        scheduler.register_task("check", "*/15 * * * *", counting_task(&new));

        assert_eq!(scheduler.status().tasks, vec!["check (every 15 minutes)".to_string()]);
        settle(scheduler.tick_at(Utc::now())).await;
        assert_eq!(old.load(Ordering::SeqCst), 0);
        assert_eq!(new.load(Ordering::SeqCst), 1);

        assert!(scheduler.unregister_task("check"));
        assert!(!scheduler.unregister_task("check"));
    }

    #[tokio::test]
    async fn test_action_may_inspect_scheduler() {
        let scheduler = Arc::new(TaskScheduler::default());
        let observer = Arc::downgrade(&scheduler);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        scheduler.register_task("introspect", "*/5 * * * *", move || {
            if let Some(scheduler) = observer.upgrade() {
                *sink.lock().unwrap() = scheduler.status().tasks;
            }
            futures::future::ready(Ok(()))
        });

        assert_eq!(settle(scheduler.tick_at(Utc::now())).await, 1);
        assert_eq!(*seen.lock().unwrap(), vec!["introspect (every 5 minutes)".to_string()]);
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let scheduler = TaskScheduler::new(Duration::from_millis(20));
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler.register_task("heartbeat", "*/1 * * * *", counting_task(&counter));
        assert!(!scheduler.status().running);

        scheduler.start();
        scheduler.start(); // no-op
        assert!(scheduler.is_running());

        tokio::time::sleep(Duration::from_millis(70)).await;
        // First tick fires immediately; later ticks are within the minute
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        scheduler.stop();
        scheduler.stop(); // no-op
        assert!(!scheduler.status().running);
    }
}
