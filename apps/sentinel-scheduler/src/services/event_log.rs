use anyhow::Result;
use chrono::{DateTime, Utc};
use sentinel_db::models::monitoring::{LogFilter, MonitoringLogEntry, NewLogEntry, Page};
use sentinel_db::{Store, UnitOfWork};
use serde_json::Value;
use std::sync::Arc;
use tracing::error;

pub mod events {
    pub const CYCLE_COMPLETED: &str = "cycle.completed";
    pub const CHECK_COMPLETED: &str = "check.completed";
    pub const CHECK_FAILED: &str = "check.failed";
    pub const HEALTH_PROBE_FAILED: &str = "health.probe_failed";
    pub const HEALTH_MANUAL_CHECK: &str = "health.manual_check";
    pub const MAINTENANCE_ENABLED: &str = "maintenance.enabled";
    pub const MAINTENANCE_CLEARED: &str = "maintenance.cleared";
    pub const TICKET_SLA_REMINDER: &str = "ticket.sla_reminder";
    pub const LOOP_STOPPED: &str = "scheduler.loop_stopped";
}

pub fn entry(
    event_type: &str,
    message: impl Into<String>,
    success: bool,
    payload: Option<Value>,
    now: DateTime<Utc>,
) -> NewLogEntry {
    NewLogEntry {
        event_type: event_type.to_string(),
        message: message.into(),
        payload,
        success,
        created_at: now,
    }
}

/// Append-only audit sink behind the operator log view.
pub struct EventLog {
    store: Arc<dyn Store>,
}

impl EventLog {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Appends inside the caller's unit of work; rolled back with it.
    pub async fn record(&self, uow: &mut dyn UnitOfWork, entry: NewLogEntry) -> Result<()> {
        uow.append_log(&entry).await
    }

    /// Appends in a unit of work of its own. Failures are logged, never raised.
    pub async fn record_detached(&self, entry: NewLogEntry) {
        let result = async {
            let mut uow = self.store.begin().await?;
            uow.append_log(&entry).await?;
            uow.commit().await
        }
        .await;

        if let Err(e) = result {
            error!("Failed to persist monitoring log '{}': {:#}", entry.event_type, e);
        }
    }

    pub async fn get_logs(&self, filter: &LogFilter, page: Page) -> Result<Vec<MonitoringLogEntry>> {
        let mut uow = self.store.begin().await?;
        let logs = uow.logs(filter, page).await?;
        uow.commit().await?;
        Ok(logs)
    }
}
