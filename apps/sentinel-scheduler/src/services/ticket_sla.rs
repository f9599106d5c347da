use chrono::{DateTime, Duration, Utc};
use sentinel_db::Store;
use sentinel_db::models::ticket::Ticket;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::SlaConfig;
use crate::error::{CoreError, CoreResult};
use crate::report::{BatchReport, ItemOutcome};
use crate::services::admin_notifier::{AdminNotifier, AlertCategory};
use crate::services::event_log::{EventLog, entry, events};
use crate::templates::Template;

/// Reminds operators about open tickets nobody answered in time.
pub struct TicketSlaWatcher {
    store: Arc<dyn Store>,
    admin: Arc<AdminNotifier>,
    event_log: Arc<EventLog>,
    config: SlaConfig,
}

impl TicketSlaWatcher {
    pub fn new(
        store: Arc<dyn Store>,
        admin: Arc<AdminNotifier>,
        event_log: Arc<EventLog>,
        config: SlaConfig,
    ) -> Self {
        Self {
            store,
            admin,
            event_log,
            config,
        }
    }

    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.config.check_interval_minutes * 60)
    }

    async fn overdue(&self, now: DateTime<Utc>) -> CoreResult<Vec<Ticket>> {
        let mut uow = self.store.begin().await?;
        let tickets = uow
            .stale_open_tickets(
                now - Duration::minutes(self.config.sla_minutes),
                now - Duration::minutes(self.config.cooldown_minutes),
            )
            .await?;
        uow.commit().await?;
        Ok(tickets)
    }

    /// Committed on its own, right after the reminder went out.
    async fn mark_reminded(&self, ticket_id: i64, now: DateTime<Utc>) -> CoreResult<()> {
        let mut uow = self.store.begin().await?;
        if !uow.mark_sla_reminder(ticket_id, now).await? {
            return Err(CoreError::DataIntegrity(format!(
                "ticket {} vanished before its reminder was stored",
                ticket_id
            )));
        }
        uow.commit().await?;
        Ok(())
    }

    async fn remind(&self, ticket: &Ticket, now: DateTime<Utc>) -> CoreResult<ItemOutcome> {
        let idle_minutes = (now - ticket.updated_at).num_minutes();
        let fanout = self
            .admin
            .alert(
                AlertCategory::TicketSla(ticket.id),
                &Template::AdminTicketSla {
                    ticket_id: ticket.id,
                    idle_minutes,
                    subject: ticket.subject.clone().unwrap_or_else(|| "no subject".to_string()),
                },
            )
            .await;

        if fanout.delivered == 0 {
            return Err(CoreError::transient(
                "telegram",
                format!("no operator received the reminder for ticket {}", ticket.id),
            ));
        }

        self.mark_reminded(ticket.id, now).await?;
        info!(
            "SLA reminder sent for ticket {} (idle {} min, {} operators)",
            ticket.id, idle_minutes, fanout.delivered
        );
        Ok(ItemOutcome::Acted)
    }

    pub async fn run_pass(&self, now: DateTime<Utc>) -> CoreResult<BatchReport> {
        let mut report = BatchReport::new("ticket_sla");
        if !self.config.enabled {
            return Ok(report);
        }

        for ticket in self.overdue(now).await? {
            let outcome = self.remind(&ticket, now).await;
            if let Err(e) = &outcome {
                warn!("SLA reminder for ticket {} failed: {}", ticket.id, e);
            }
            report.record(format!("ticket {}", ticket.id), outcome);
        }

        if report.succeeded > 0 || report.failed > 0 {
            self.event_log
                .record_detached(entry(
                    events::TICKET_SLA_REMINDER,
                    format!(
                        "{} SLA reminders sent, {} failed",
                        report.succeeded, report.failed
                    ),
                    report.failed == 0,
                    Some(json!({ "errors": report.errors })),
                    now,
                ))
                .await;
        }
        Ok(report)
    }
}
