use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgConnection;

use crate::models::monitoring::{LogFilter, MonitoringLogEntry, NewLogEntry, Page};

pub struct MonitoringRepository;

impl MonitoringRepository {
    pub async fn append(conn: &mut PgConnection, entry: &NewLogEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO monitoring_logs (event_type, message, payload, success, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&entry.event_type)
        .bind(&entry.message)
        .bind(&entry.payload)
        .bind(entry.success)
        .bind(entry.created_at)
        .execute(conn)
        .await
        .context("Failed to append monitoring log entry")?;
        Ok(())
    }

    pub async fn list(
        conn: &mut PgConnection,
        filter: &LogFilter,
        page: Page,
    ) -> Result<Vec<MonitoringLogEntry>> {
        let mut query = String::from(
            "SELECT id, event_type, message, payload, success, created_at FROM monitoring_logs",
        );

        let mut clauses = Vec::new();
        let mut bind_index = 1;
        let event_type = filter.event_type.as_deref().filter(|t| !t.is_empty());
        if event_type.is_some() {
            clauses.push(format!("event_type = ${}", bind_index));
            bind_index += 1;
        }
        if filter.success.is_some() {
            clauses.push(format!("success = ${}", bind_index));
            bind_index += 1;
        }
        if filter.since.is_some() {
            clauses.push(format!("created_at >= ${}", bind_index));
            bind_index += 1;
        }
        if !clauses.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&clauses.join(" AND "));
        }
        query.push_str(&format!(
            " ORDER BY created_at DESC, id DESC LIMIT ${} OFFSET ${}",
            bind_index,
            bind_index + 1
        ));

        let mut q = sqlx::query_as::<_, MonitoringLogEntry>(&query);
        if let Some(event_type) = event_type {
            q = q.bind(event_type);
        }
        if let Some(success) = filter.success {
            q = q.bind(success);
        }
        if let Some(since) = filter.since {
            q = q.bind(since);
        }
        q = q.bind(page.limit()).bind(page.offset());

        q.fetch_all(conn)
            .await
            .context("Failed to fetch monitoring logs")
    }

    pub async fn prune(conn: &mut PgConnection, older_than: DateTime<Utc>) -> Result<u64> {
        let rows = sqlx::query("DELETE FROM monitoring_logs WHERE created_at < $1")
            .bind(older_than)
            .execute(conn)
            .await
            .context("Failed to prune monitoring logs")?
            .rows_affected();
        Ok(rows)
    }
}
