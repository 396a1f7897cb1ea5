//! Scheduler module for running balance sweeps and generating reports.
//!
//! Two independent timers run while the scheduler is started: one sweeps every active
//! number and appends the batch to history, the other rolls the latest history up into a
//! report. Starting while already running restarts with the new plan.

mod orchestrator;
mod report;

pub use orchestrator::*;
pub use report::*;

use crate::balance::SourceConfig;
use crate::clock::Clock;
use crate::db::{HistoryStore, NumberTarget, QueryResult, Report};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Receives the results of timer-driven work.
///
/// Both methods default to doing nothing. Panics raised here are caught and logged.
pub trait SchedulerObserver: Send + Sync {
    fn on_query_complete(&self, _results: &[QueryResult]) {}
    fn on_report_generated(&self, _report: &Report) {}
}

/// Everything needed to start the timers.
#[derive(Debug, Clone)]
pub struct SchedulePlan {
    pub numbers: Vec<NumberTarget>,
    pub adsl: Option<SourceConfig>,
    pub forge: Option<SourceConfig>,
    pub query_interval_minutes: u64,
    pub report_interval_hours: u64,
}

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("{0} interval must be between one minute and one year")]
    InvalidInterval(&'static str),
    #[error("scheduler is not running")]
    NotRunning,
}

/// Snapshot of the scheduler for the dashboard.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub running: bool,
    pub query_interval_minutes: Option<u64>,
    pub report_interval_hours: Option<u64>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_query_at: Option<DateTime<Utc>>,
    pub next_query_at: Option<DateTime<Utc>>,
    pub last_report_at: Option<DateTime<Utc>>,
    pub next_report_at: Option<DateTime<Utc>>,
    pub history_len: usize,
}

/// Longest accepted timer period.
pub const MAX_INTERVAL: Duration = Duration::from_secs(365 * 24 * 3600);

/// Turn an interval count into a timer period, rejecting zero and anything past `MAX_INTERVAL`.
fn checked_period(count: u64, unit_secs: u64, what: &'static str) -> Result<Duration, SchedulerError> {
    let period = count
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .filter(|p| !p.is_zero() && *p <= MAX_INTERVAL)
        .ok_or(SchedulerError::InvalidInterval(what))?;
    Instant::now()
        .checked_add(period)
        .ok_or(SchedulerError::InvalidInterval(what))?;
    Ok(period)
}

/// Per-run state shared with the timer tasks.
struct Schedule {
    numbers: RwLock<Vec<NumberTarget>>,
    adsl: SourceConfig,
    forge: SourceConfig,
    query_interval_minutes: u64,
    report_interval_hours: u64,
    query_period: Duration,
    report_period: Duration,
    started_at: DateTime<Utc>,
    times: Mutex<ScheduleTimes>,
}

#[derive(Default, Clone)]
struct ScheduleTimes {
    last_query_at: Option<DateTime<Utc>>,
    next_query_at: Option<DateTime<Utc>>,
    last_report_at: Option<DateTime<Utc>>,
    next_report_at: Option<DateTime<Utc>>,
}

impl Schedule {
    fn numbers(&self) -> Vec<NumberTarget> {
        self.numbers.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn times(&self) -> std::sync::MutexGuard<'_, ScheduleTimes> {
        self.times.lock().unwrap_or_else(|e| e.into_inner())
    }
}

struct Running {
    schedule: Arc<Schedule>,
    stop_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

/// Services the timer tasks work with.
#[derive(Clone)]
struct TimerContext {
    orchestrator: Arc<QueryOrchestrator>,
    history: Arc<HistoryStore>,
    reporter: Arc<ReportGenerator>,
    clock: Arc<dyn Clock>,
}

/// Owns the query and report timers.
pub struct Scheduler {
    ctx: TimerContext,
    running: tokio::sync::Mutex<Option<Running>>,
    active_timers: Arc<AtomicUsize>,
}

impl Scheduler {
    pub fn new(
        orchestrator: Arc<QueryOrchestrator>,
        history: Arc<HistoryStore>,
        reporter: Arc<ReportGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ctx: TimerContext {
                orchestrator,
                history,
                reporter,
                clock,
            },
            running: tokio::sync::Mutex::new(None),
            active_timers: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Start both timers, restarting if already running.
    ///
    /// The plan is validated first; an invalid plan leaves the current state untouched.
    /// The first query fires one full query interval after start.
    pub async fn start(
        &self,
        plan: SchedulePlan,
        observer: Arc<dyn SchedulerObserver>,
    ) -> Result<(), SchedulerError> {
        let query_period = checked_period(plan.query_interval_minutes, 60, "query")?;
        let report_period = checked_period(plan.report_interval_hours, 3600, "report")?;
        QueryOrchestrator::validate(&plan.numbers, plan.adsl.as_ref(), plan.forge.as_ref())?;
        let (Some(adsl), Some(forge)) = (plan.adsl, plan.forge) else {
            return Err(QueryError::MissingConfig(crate::balance::SourceKind::Adsl).into());
        };

        let mut running = self.running.lock().await;
        if let Some(prev) = running.take() {
            tracing::info!("Scheduler: restarting");
            shutdown(prev).await;
        }

        // Populated memory takes precedence over storage.
        if self.ctx.history.len() == 0 {
            self.ctx.history.load();
        }

        let now = self.ctx.clock.now();
        let schedule = Arc::new(Schedule {
            numbers: RwLock::new(plan.numbers),
            adsl,
            forge,
            query_interval_minutes: plan.query_interval_minutes,
            report_interval_hours: plan.report_interval_hours,
            query_period,
            report_period,
            started_at: now,
            times: Mutex::new(ScheduleTimes::default()),
        });
        {
            let mut times = schedule.times();
            times.next_query_at = chrono::Duration::from_std(schedule.query_period)
                .ok()
                .map(|d| now + d);
            times.next_report_at = chrono::Duration::from_std(schedule.report_period)
                .ok()
                .map(|d| now + d);
        }

        let (stop_tx, _) = broadcast::channel(1);
        let tasks = vec![
            tokio::spawn(run_query_loop(
                self.ctx.clone(),
                schedule.clone(),
                observer.clone(),
                stop_tx.subscribe(),
                TimerGuard::acquire(&self.active_timers),
            )),
            tokio::spawn(run_report_loop(
                self.ctx.clone(),
                schedule.clone(),
                observer,
                stop_tx.subscribe(),
                TimerGuard::acquire(&self.active_timers),
            )),
        ];

        tracing::info!(
            "Scheduler started: queries every {} min, reports every {} h",
            schedule.query_interval_minutes,
            schedule.report_interval_hours
        );

        *running = Some(Running {
            schedule,
            stop_tx,
            tasks,
        });
        Ok(())
    }

    /// Stop both timers. Safe to call when already stopped.
    ///
    /// A sweep in progress is abandoned and its results are not recorded.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        if let Some(prev) = running.take() {
            shutdown(prev).await;
            tracing::info!("Scheduler stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Replace the numbers used by subsequent sweeps.
    pub async fn update_numbers(&self, numbers: Vec<NumberTarget>) -> Result<(), SchedulerError> {
        let running = self.running.lock().await;
        let running = running.as_ref().ok_or(SchedulerError::NotRunning)?;
        *running
            .schedule
            .numbers
            .write()
            .unwrap_or_else(|e| e.into_inner()) = numbers;
        Ok(())
    }

    /// Sweep right now with the running schedule's numbers and configs.
    pub async fn run_now(&self, save_to_history: bool) -> Result<Vec<QueryResult>, SchedulerError> {
        let schedule = {
            let running = self.running.lock().await;
            running
                .as_ref()
                .map(|r| r.schedule.clone())
                .ok_or(SchedulerError::NotRunning)?
        };

        self.query_once(
            &schedule.numbers(),
            Some(&schedule.adsl),
            Some(&schedule.forge),
            save_to_history,
        )
        .await
    }

    /// One manual sweep, independent of the timers.
    pub async fn query_once(
        &self,
        numbers: &[NumberTarget],
        adsl: Option<&SourceConfig>,
        forge: Option<&SourceConfig>,
        save_to_history: bool,
    ) -> Result<Vec<QueryResult>, SchedulerError> {
        let results = self.ctx.orchestrator.run_query(numbers, adsl, forge).await?;
        if save_to_history {
            let batch = self.ctx.orchestrator.to_batch(results.clone());
            self.ctx.history.append(batch);
        }
        Ok(results)
    }

    pub async fn status(&self) -> SchedulerStatus {
        let running = self.running.lock().await;
        let history_len = self.ctx.history.len();

        match running.as_ref() {
            Some(r) => {
                let times = r.schedule.times().clone();
                SchedulerStatus {
                    running: true,
                    query_interval_minutes: Some(r.schedule.query_interval_minutes),
                    report_interval_hours: Some(r.schedule.report_interval_hours),
                    started_at: Some(r.schedule.started_at),
                    last_query_at: times.last_query_at,
                    next_query_at: times.next_query_at,
                    last_report_at: times.last_report_at,
                    next_report_at: times.next_report_at,
                    history_len,
                }
            }
            None => SchedulerStatus {
                running: false,
                query_interval_minutes: None,
                report_interval_hours: None,
                started_at: None,
                last_query_at: None,
                next_query_at: None,
                last_report_at: None,
                next_report_at: None,
                history_len,
            },
        }
    }

    /// Number of timer tasks currently alive.
    pub fn active_timers(&self) -> usize {
        self.active_timers.load(Ordering::SeqCst)
    }
}

async fn shutdown(running: Running) {
    let _ = running.stop_tx.send(());
    for task in running.tasks {
        if let Err(e) = task.await {
            tracing::error!("Scheduler: timer task ended abnormally: {}", e);
        }
    }
}

/// Counts a timer task for as long as it (or its unpolled future) is alive.
struct TimerGuard(Arc<AtomicUsize>);

impl TimerGuard {
    fn acquire(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn fixed_interval(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

/// Run the query timer until stopped.
///
/// Each sweep is awaited before the next tick is taken, so sweeps never overlap; ticks
/// missed during a long sweep are skipped.
async fn run_query_loop(
    ctx: TimerContext,
    schedule: Arc<Schedule>,
    observer: Arc<dyn SchedulerObserver>,
    mut stop_rx: broadcast::Receiver<()>,
    _guard: TimerGuard,
) {
    let mut interval = fixed_interval(schedule.query_period);

    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,
            _ = interval.tick() => {}
        }

        // Dropping the sweep on stop means nothing from it reaches history.
        tokio::select! {
            _ = stop_rx.recv() => break,
            _ = run_query_tick(&ctx, &schedule, observer.as_ref()) => {}
        }
    }
}

async fn run_query_tick(ctx: &TimerContext, schedule: &Schedule, observer: &dyn SchedulerObserver) {
    tracing::info!("Running scheduled query...");
    let numbers = schedule.numbers();

    match ctx
        .orchestrator
        .run_query(&numbers, Some(&schedule.adsl), Some(&schedule.forge))
        .await
    {
        Ok(results) => {
            let batch = ctx.orchestrator.to_batch(results);
            ctx.history.append(batch.clone());
            notify("query", || observer.on_query_complete(&batch.results));
        }
        Err(e) => tracing::error!("Scheduled query failed: {}", e),
    }

    let now = ctx.clock.now();
    let mut times = schedule.times();
    times.last_query_at = Some(now);
    times.next_query_at = chrono::Duration::from_std(schedule.query_period)
        .ok()
        .map(|d| now + d);
}

async fn run_report_loop(
    ctx: TimerContext,
    schedule: Arc<Schedule>,
    observer: Arc<dyn SchedulerObserver>,
    mut stop_rx: broadcast::Receiver<()>,
    _guard: TimerGuard,
) {
    let mut interval = fixed_interval(schedule.report_period);

    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,
            _ = interval.tick() => {
                run_report_tick(&ctx, &schedule, observer.as_ref());
            }
        }
    }
}

fn run_report_tick(ctx: &TimerContext, schedule: &Schedule, observer: &dyn SchedulerObserver) {
    tracing::info!("Generating scheduled report...");

    match ctx.reporter.generate_scheduled() {
        Some(report) => notify("report", || observer.on_report_generated(&report)),
        None => tracing::info!("No data available for report generation"),
    }

    let now = ctx.clock.now();
    let mut times = schedule.times();
    times.last_report_at = Some(now);
    times.next_report_at = chrono::Duration::from_std(schedule.report_period)
        .ok()
        .map(|d| now + d);
}

/// Invoke an observer callback, containing any panic it raises.
fn notify(what: &str, callback: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        tracing::error!("Scheduler: {} callback panicked: {}", what, msg);
    }
}
