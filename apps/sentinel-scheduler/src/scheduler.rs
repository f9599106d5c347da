//! Background loops: the main lifecycle cycle, the ticket SLA watcher and the
//! panel health monitor, each on its own timer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sentinel_db::models::monitoring::{LogFilter, MonitoringLogEntry, Page};
use sentinel_db::{Store, UnitOfWork};
use sentinel_shared::{LastTick, MaintenanceSnapshot, MonitorStatus, ProbeReport};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::CycleConfig;
use crate::error::{CoreError, CoreResult, TickError};
use crate::report::BatchReport;
use crate::services::admin_notifier::{AdminNotifier, AlertCategory};
use crate::services::event_log::{EventLog, entry, events};
use crate::services::health_monitor::HealthMonitor;
use crate::services::maintenance::MaintenanceState;
use crate::services::notification_ledger::NotifiedCache;
use crate::services::ticket_sla::TicketSlaWatcher;
use crate::templates::Template;

const CHECK_SAVEPOINT: &str = "cycle_check";

/// One unit of work inside the main tick.
#[async_trait]
pub trait CycleCheck: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, uow: &mut dyn UnitOfWork, now: DateTime<Utc>) -> CoreResult<BatchReport>;
}

pub struct SchedulerDeps {
    pub config: CycleConfig,
    pub store: Arc<dyn Store>,
    /// Run in order on every tick.
    pub checks: Vec<Arc<dyn CycleCheck>>,
    pub cache: Arc<NotifiedCache>,
    pub event_log: Arc<EventLog>,
    pub admin: Arc<AdminNotifier>,
    pub maintenance: Arc<MaintenanceState>,
    pub sla: Option<Arc<TicketSlaWatcher>>,
    pub health: Option<Arc<HealthMonitor>>,
}

pub struct CycleScheduler {
    config: CycleConfig,
    store: Arc<dyn Store>,
    checks: Vec<Arc<dyn CycleCheck>>,
    cache: Arc<NotifiedCache>,
    event_log: Arc<EventLog>,
    admin: Arc<AdminNotifier>,
    maintenance: Arc<MaintenanceState>,
    sla: Option<Arc<TicketSlaWatcher>>,
    health: Option<Arc<HealthMonitor>>,
    cancel: CancellationToken,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
    tick_lock: tokio::sync::Mutex<()>,
    last_tick: Mutex<Option<LastTick>>,
}

impl CycleScheduler {
    pub fn new(deps: SchedulerDeps) -> Self {
        Self {
            config: deps.config,
            store: deps.store,
            checks: deps.checks,
            cache: deps.cache,
            event_log: deps.event_log,
            admin: deps.admin,
            maintenance: deps.maintenance,
            sla: deps.sla,
            health: deps.health,
            cancel: CancellationToken::new(),
            tasks: tokio::sync::Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            tick_lock: tokio::sync::Mutex::new(()),
            last_tick: Mutex::new(None),
        }
    }

    pub fn maintenance(&self) -> &Arc<MaintenanceState> {
        &self.maintenance
    }

    /// Spawns the three loops. Calling it twice is a no-op.
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            warn!("Scheduler already running");
            return;
        }

        let mut tasks = self.tasks.lock().await;
        tasks.push(tokio::spawn(Arc::clone(self).main_loop()));
        if let Some(sla) = self.sla.clone() {
            tasks.push(tokio::spawn(Arc::clone(self).sla_loop(sla)));
        }
        if let Some(health) = self.health.clone() {
            tasks.push(tokio::spawn(Arc::clone(self).health_loop(health)));
        }
        info!("Scheduler started with {} background loops", tasks.len());
    }

    /// Cancels every loop and waits for in-flight work to finish.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Scheduler task ended abnormally: {}", e);
            }
        }
        self.running.store(false, Ordering::Release);
        info!("Scheduler stopped");
    }

    /// Runs every check once inside a single unit of work.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<LastTick, TickError> {
        let Ok(_guard) = self.tick_lock.try_lock() else {
            return Err(TickError::InProgress);
        };
        let started = Instant::now();
        let mut uow = self.store.begin().await.map_err(TickError::Begin)?;

        let mut totals = BatchReport::new("cycle");
        let mut failures: Vec<(&'static str, CoreError)> = Vec::new();

        for check in &self.checks {
            uow.savepoint(CHECK_SAVEPOINT).await.map_err(CoreError::from)?;
            let result = check.run(uow.as_mut(), now).await;
            uow.settle_savepoint(CHECK_SAVEPOINT, result.is_ok())
                .await
                .map_err(CoreError::from)?;

            match result {
                Ok(report) => {
                    if !report.is_empty() {
                        self.event_log
                            .record(uow.as_mut(), report.to_log_entry(events::CHECK_COMPLETED, now))
                            .await
                            .map_err(CoreError::from)?;
                    }
                    totals.merge(report);
                }
                Err(e) => {
                    error!(check = check.name(), "Check failed and was rolled back: {}", e);
                    self.event_log
                        .record(
                            uow.as_mut(),
                            entry(
                                events::CHECK_FAILED,
                                format!("Check '{}' failed: {}", check.name(), e),
                                false,
                                Some(json!({ "check": check.name(), "error": e.to_string() })),
                                now,
                            ),
                        )
                        .await
                        .map_err(CoreError::from)?;
                    failures.push((check.name(), e));
                }
            }
        }

        let tick = LastTick {
            started_at: now,
            duration_ms: started.elapsed().as_millis() as u64,
            succeeded: totals.succeeded,
            failed: totals.failed + failures.len() as u64,
            failed_checks: failures.iter().map(|(name, _)| name.to_string()).collect(),
        };
        self.event_log
            .record(
                uow.as_mut(),
                entry(
                    events::CYCLE_COMPLETED,
                    format!(
                        "Cycle finished in {} ms: {} succeeded, {} failed",
                        tick.duration_ms, tick.succeeded, tick.failed
                    ),
                    tick.failed == 0,
                    Some(json!({
                        "declined": totals.declined,
                        "skipped": totals.skipped,
                        "failed_checks": tick.failed_checks,
                    })),
                    now,
                ),
            )
            .await
            .map_err(CoreError::from)?;
        uow.commit().await.map_err(CoreError::from)?;

        for (name, err) in failures {
            self.admin
                .alert(
                    AlertCategory::CheckFailed(name.to_string()),
                    &Template::AdminCheckFailed {
                        check: name.to_string(),
                        error: err.to_string(),
                    },
                )
                .await;
        }

        *self
            .last_tick
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(tick.clone());
        Ok(tick)
    }

    async fn main_loop(self: Arc<Self>) {
        let period = Duration::from_secs(self.config.interval_minutes * 60);
        let cache_ttl = Duration::from_secs(self.config.cache_clear_minutes * 60);
        info!(interval_secs = period.as_secs(), "Main cycle loop started");

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_clear = Instant::now();
        let mut begin_failures = 0u32;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Main cycle loop stopping");
                    break;
                }
                _ = interval.tick() => {
                    if last_clear.elapsed() >= cache_ttl {
                        self.cache.clear();
                        last_clear = Instant::now();
                    }

                    match self.run_once(Utc::now()).await {
                        Ok(tick) => {
                            begin_failures = 0;
                            debug!(
                                duration_ms = tick.duration_ms,
                                succeeded = tick.succeeded,
                                failed = tick.failed,
                                "Main cycle tick finished"
                            );
                        }
                        Err(TickError::Begin(e)) => {
                            begin_failures += 1;
                            error!(
                                "Cannot open unit of work ({}/{}): {:#}",
                                begin_failures, self.config.max_begin_failures, e
                            );
                            if begin_failures >= self.config.max_begin_failures {
                                self.report_loop_stopped("main cycle", &format!("{:#}", e)).await;
                                break;
                            }
                        }
                        Err(TickError::InProgress) => {
                            debug!("Previous tick still running, skipping");
                        }
                        Err(e) => {
                            begin_failures = 0;
                            error!("Main cycle tick failed: {}", e);
                        }
                    }
                }
            }
        }
    }

    async fn sla_loop(self: Arc<Self>, sla: Arc<TicketSlaWatcher>) {
        let mut interval = tokio::time::interval(sla.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = sla.interval().as_secs(), "Ticket SLA loop started");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Ticket SLA loop stopping");
                    break;
                }
                _ = interval.tick() => {
                    match sla.run_pass(Utc::now()).await {
                        Ok(report) => report.log(),
                        Err(e) => error!("Ticket SLA pass failed: {}", e),
                    }
                }
            }
        }
    }

    async fn health_loop(self: Arc<Self>, health: Arc<HealthMonitor>) {
        let mut interval = tokio::time::interval(health.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = health.interval().as_secs(), "Health monitor loop started");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Health monitor loop stopping");
                    break;
                }
                _ = interval.tick() => {
                    health.check().await;
                }
            }
        }
    }

    async fn report_loop_stopped(&self, task: &str, error: &str) {
        error!("Background loop '{}' stopped: {}", task, error);
        self.event_log
            .record_detached(entry(
                events::LOOP_STOPPED,
                format!("Loop '{}' stopped: {}", task, error),
                false,
                None,
                Utc::now(),
            ))
            .await;
        self.admin
            .alert(
                AlertCategory::LoopStopped(task.to_string()),
                &Template::AdminLoopStopped {
                    task: task.to_string(),
                    error: error.to_string(),
                },
            )
            .await;
    }

    pub async fn get_status(&self) -> MonitorStatus {
        MonitorStatus {
            running: self.running.load(Ordering::Acquire) && !self.cancel.is_cancelled(),
            maintenance: self.maintenance.snapshot().await,
            last_probe: self.health.as_ref().and_then(|h| h.last_probe()),
            last_tick: self
                .last_tick
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone(),
            health_monitor_enabled: self.health.is_some(),
        }
    }

    pub async fn get_logs(&self, filter: &LogFilter, page: Page) -> CoreResult<Vec<MonitoringLogEntry>> {
        Ok(self.event_log.get_logs(filter, page).await?)
    }

    pub async fn force_check(&self) -> CoreResult<ProbeReport> {
        match &self.health {
            Some(health) => Ok(health.force_check().await),
            None => Err(CoreError::Configuration(
                "health monitor is disabled (panel not configured)".to_string(),
            )),
        }
    }

    /// Operator toggle. Pins `auto_enabled = false` and resets the failure count.
    pub async fn set_maintenance(&self, active: bool, reason: Option<String>) -> MaintenanceSnapshot {
        let now = Utc::now();
        let snapshot = self.maintenance.set_manual(active, reason, now).await;
        let (event_type, message) = if active {
            (
                events::MAINTENANCE_ENABLED,
                format!(
                    "Maintenance enabled manually: {}",
                    snapshot.reason.as_deref().unwrap_or_default()
                ),
            )
        } else {
            (events::MAINTENANCE_CLEARED, "Maintenance disabled manually".to_string())
        };
        self.event_log
            .record_detached(entry(
                event_type,
                message,
                true,
                Some(json!({ "auto": false })),
                now,
            ))
            .await;
        snapshot
    }
}
