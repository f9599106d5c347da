use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgConnection;

use crate::models::notification::{NotificationKey, NotificationType};

pub struct NotificationRepository;

impl NotificationRepository {
    pub async fn exists(conn: &mut PgConnection, key: &NotificationKey) -> Result<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(
                SELECT 1 FROM notification_records
                WHERE user_id = $1 AND subscription_id = $2
                  AND notification_type = $3 AND threshold = $4
             )",
        )
        .bind(key.user_id)
        .bind(key.subscription_id)
        .bind(key.kind.as_str())
        .bind(key.threshold)
        .fetch_one(conn)
        .await
        .context("Failed to check notification record")
    }

    pub async fn sent_since(
        conn: &mut PgConnection,
        user_id: i64,
        kind: NotificationType,
        since: DateTime<Utc>,
    ) -> Result<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(
                SELECT 1 FROM notification_records
                WHERE user_id = $1 AND notification_type = $2 AND sent_at >= $3
             )",
        )
        .bind(user_id)
        .bind(kind.as_str())
        .bind(since)
        .fetch_one(conn)
        .await
        .context("Failed to look up recent notifications")
    }

    pub async fn insert(
        conn: &mut PgConnection,
        key: &NotificationKey,
        sent_at: DateTime<Utc>,
    ) -> Result<bool> {
        let rows = sqlx::query(
            "INSERT INTO notification_records (user_id, subscription_id, notification_type, threshold, sent_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (user_id, subscription_id, notification_type, threshold) DO NOTHING",
        )
        .bind(key.user_id)
        .bind(key.subscription_id)
        .bind(key.kind.as_str())
        .bind(key.threshold)
        .bind(sent_at)
        .execute(conn)
        .await
        .context("Failed to insert notification record")?
        .rows_affected();
        Ok(rows == 1)
    }

    pub async fn delete_for(
        conn: &mut PgConnection,
        user_id: i64,
        subscription_id: i64,
        kind: NotificationType,
    ) -> Result<u64> {
        let rows = sqlx::query(
            "DELETE FROM notification_records
             WHERE user_id = $1 AND subscription_id = $2 AND notification_type = $3",
        )
        .bind(user_id)
        .bind(subscription_id)
        .bind(kind.as_str())
        .execute(conn)
        .await
        .context("Failed to delete notification records")?
        .rows_affected();
        Ok(rows)
    }
}
