use chrono::Utc;
use sentinel_shared::ProbeReport;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::clients::VpnPanel;
use crate::config::HealthConfig;
use crate::error::bounded;
use crate::services::admin_notifier::{AdminNotifier, AlertCategory};
use crate::services::event_log::{EventLog, entry, events};
use crate::services::maintenance::{MaintenanceState, Transition};
use crate::templates::Template;

/// Probes the panel API and drives the maintenance circuit breaker.
pub struct HealthMonitor {
    panel: Arc<dyn VpnPanel>,
    maintenance: Arc<MaintenanceState>,
    admin: Arc<AdminNotifier>,
    event_log: Arc<EventLog>,
    config: HealthConfig,
    last_probe: Mutex<Option<ProbeReport>>,
}

impl HealthMonitor {
    pub fn new(
        panel: Arc<dyn VpnPanel>,
        maintenance: Arc<MaintenanceState>,
        admin: Arc<AdminNotifier>,
        event_log: Arc<EventLog>,
        config: HealthConfig,
    ) -> Self {
        Self {
            panel,
            maintenance,
            admin,
            event_log,
            config,
            last_probe: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.config.interval_secs)
    }

    pub fn last_probe(&self) -> Option<ProbeReport> {
        self.last_probe
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Up to `attempts` tries, pausing between them. No state changes.
    pub async fn probe(&self) -> ProbeReport {
        let started = Instant::now();
        let attempts = self.config.attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            let attempt_started = Instant::now();
            let result = bounded(
                "panel",
                self.config.attempt_timeout(),
                self.panel.health_probe(),
            )
            .await;

            match result {
                Ok(true) => {
                    return ProbeReport {
                        success: true,
                        attempts: attempt,
                        latency_ms: attempt_started.elapsed().as_millis() as u64,
                        error: None,
                        checked_at: Utc::now(),
                    };
                }
                Ok(false) => last_error = Some("panel reported itself unhealthy".to_string()),
                Err(e) => last_error = Some(e.to_string()),
            }

            if attempt < attempts {
                debug!(
                    "Health probe attempt {}/{} failed: {}",
                    attempt,
                    attempts,
                    last_error.as_deref().unwrap_or_default()
                );
                tokio::time::sleep(self.config.retry_pause()).await;
            }
        }

        ProbeReport {
            success: false,
            attempts,
            latency_ms: started.elapsed().as_millis() as u64,
            error: last_error,
            checked_at: Utc::now(),
        }
    }

    /// One scheduled check: probe, update maintenance state, alert on transitions.
    pub async fn check(&self) -> ProbeReport {
        let report = self.probe().await;
        let now = report.checked_at;

        let transition = if report.success {
            self.maintenance.record_success(now).await
        } else {
            let detail = report.error.as_deref().unwrap_or("unknown error");
            self.maintenance
                .record_failure(
                    now,
                    self.config.failure_threshold,
                    self.config.auto_enable,
                    detail,
                )
                .await
        };

        match &transition {
            Transition::Enabled { reason } => {
                error!("Maintenance mode enabled automatically: {}", reason);
                self.event_log
                    .record_detached(entry(
                        events::MAINTENANCE_ENABLED,
                        reason.clone(),
                        false,
                        Some(json!({ "auto": true, "attempts": report.attempts })),
                        now,
                    ))
                    .await;
                self.admin
                    .alert(
                        AlertCategory::MaintenanceEnabled,
                        &Template::AdminMaintenanceEnabled {
                            reason: reason.clone(),
                        },
                    )
                    .await;
            }
            Transition::Cleared { downtime_minutes } => {
                info!(
                    "Panel API recovered, maintenance cleared after {} min",
                    downtime_minutes
                );
                self.event_log
                    .record_detached(entry(
                        events::MAINTENANCE_CLEARED,
                        format!("Panel API recovered after {} min", downtime_minutes),
                        true,
                        Some(json!({ "downtime_minutes": downtime_minutes, "latency_ms": report.latency_ms })),
                        now,
                    ))
                    .await;
                self.admin
                    .alert(
                        AlertCategory::MaintenanceCleared,
                        &Template::AdminMaintenanceCleared {
                            downtime_minutes: *downtime_minutes,
                        },
                    )
                    .await;
            }
            Transition::Unchanged if !report.success => {
                warn!(
                    "Panel health check failed after {} attempts: {}",
                    report.attempts,
                    report.error.as_deref().unwrap_or_default()
                );
                self.event_log
                    .record_detached(entry(
                        events::HEALTH_PROBE_FAILED,
                        report.error.clone().unwrap_or_default(),
                        false,
                        Some(json!({ "attempts": report.attempts, "latency_ms": report.latency_ms })),
                        now,
                    ))
                    .await;
            }
            Transition::Unchanged => {
                debug!("Panel healthy ({} ms)", report.latency_ms);
            }
        }

        *self
            .last_probe
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(report.clone());
        report
    }

    /// Operator-triggered check with the same state effects as a scheduled one.
    pub async fn force_check(&self) -> ProbeReport {
        let report = self.check().await;
        self.event_log
            .record_detached(entry(
                events::HEALTH_MANUAL_CHECK,
                format!(
                    "Manual health check: {}",
                    if report.success { "ok" } else { "failed" }
                ),
                report.success,
                Some(json!({
                    "attempts": report.attempts,
                    "latency_ms": report.latency_ms,
                    "error": report.error,
                })),
                report.checked_at,
            ))
            .await;
        report
    }
}
