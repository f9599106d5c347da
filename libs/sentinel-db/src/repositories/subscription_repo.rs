use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgConnection;

use crate::models::subscription::{Subscription, SubscriptionStatus};

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, plan_id, panel_uuid, status, is_trial, start_date, end_date, \
     traffic_limit_bytes, traffic_used_bytes, device_limit, squads, autopay_enabled, \
     autopay_days_before, created_at";

pub struct SubscriptionRepository;

impl SubscriptionRepository {
    pub async fn active_ended_by(
        conn: &mut PgConnection,
        now: DateTime<Utc>,
    ) -> Result<Vec<Subscription>> {
        let sql = format!(
            "SELECT {} FROM subscriptions WHERE status = 'active' AND end_date <= $1 ORDER BY id",
            SUBSCRIPTION_COLUMNS
        );
        sqlx::query_as::<_, Subscription>(&sql)
            .bind(now)
            .fetch_all(conn)
            .await
            .context("Failed to fetch ended active subscriptions")
    }

    pub async fn current_with_status(
        conn: &mut PgConnection,
        status: SubscriptionStatus,
    ) -> Result<Vec<Subscription>> {
        let sql = format!(
            "SELECT {cols} FROM (
                SELECT DISTINCT ON (user_id) {cols}
                FROM subscriptions
                ORDER BY user_id, created_at DESC, id DESC
             ) current
             WHERE current.status = $1
             ORDER BY current.id",
            cols = SUBSCRIPTION_COLUMNS
        );
        sqlx::query_as::<_, Subscription>(&sql)
            .bind(status.as_str())
            .fetch_all(conn)
            .await
            .context("Failed to fetch current subscriptions")
    }

    pub async fn get_by_id(conn: &mut PgConnection, id: i64) -> Result<Option<Subscription>> {
        let sql = format!("SELECT {} FROM subscriptions WHERE id = $1", SUBSCRIPTION_COLUMNS);
        sqlx::query_as::<_, Subscription>(&sql)
            .bind(id)
            .fetch_optional(conn)
            .await
            .context("Failed to fetch subscription by ID")
    }

    /// Compare-and-set on status so a concurrent writer is never overwritten.
    pub async fn transition_status(
        conn: &mut PgConnection,
        id: i64,
        from: SubscriptionStatus,
        to: SubscriptionStatus,
    ) -> Result<bool> {
        let rows = sqlx::query("UPDATE subscriptions SET status = $1 WHERE id = $2 AND status = $3")
            .bind(to.as_str())
            .bind(id)
            .bind(from.as_str())
            .execute(conn)
            .await
            .context("Failed to update subscription status")?
            .rows_affected();
        Ok(rows > 0)
    }

    pub async fn update_end_date(
        conn: &mut PgConnection,
        id: i64,
        end_date: DateTime<Utc>,
    ) -> Result<bool> {
        let rows = sqlx::query("UPDATE subscriptions SET end_date = $1 WHERE id = $2")
            .bind(end_date)
            .bind(id)
            .execute(conn)
            .await
            .context("Failed to update subscription end date")?
            .rows_affected();
        Ok(rows > 0)
    }

    pub async fn reset_traffic(conn: &mut PgConnection, id: i64) -> Result<bool> {
        let rows = sqlx::query("UPDATE subscriptions SET traffic_used_bytes = 0 WHERE id = $1")
            .bind(id)
            .execute(conn)
            .await
            .context("Failed to reset subscription traffic")?
            .rows_affected();
        Ok(rows > 0)
    }
}
