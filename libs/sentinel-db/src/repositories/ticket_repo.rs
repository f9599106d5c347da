use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgConnection;

use crate::models::ticket::Ticket;

pub struct TicketRepository;

impl TicketRepository {
    pub async fn stale_open(
        conn: &mut PgConnection,
        stale_before: DateTime<Utc>,
        reminder_before: DateTime<Utc>,
    ) -> Result<Vec<Ticket>> {
        sqlx::query_as::<_, Ticket>(
            "SELECT id, user_id, subject, status, updated_at, last_sla_reminder_at
             FROM tickets
             WHERE status = 'open'
               AND updated_at <= $1
               AND (last_sla_reminder_at IS NULL OR last_sla_reminder_at <= $2)
             ORDER BY updated_at ASC",
        )
        .bind(stale_before)
        .bind(reminder_before)
        .fetch_all(conn)
        .await
        .context("Failed to fetch stale tickets")
    }

    /// Leaves `updated_at` untouched; it tracks the conversation, not reminders.
    pub async fn mark_sla_reminder(
        conn: &mut PgConnection,
        ticket_id: i64,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let rows = sqlx::query("UPDATE tickets SET last_sla_reminder_at = $1 WHERE id = $2")
            .bind(at)
            .bind(ticket_id)
            .execute(conn)
            .await
            .context("Failed to mark SLA reminder")?
            .rows_affected();
        Ok(rows > 0)
    }
}
