use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgConnection;

use crate::models::discount::NewDiscountOffer;

pub struct DiscountRepository;

impl DiscountRepository {
    pub async fn create(conn: &mut PgConnection, offer: &NewDiscountOffer) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(
            "INSERT INTO discount_offers
                (user_id, subscription_id, notification_type, discount_percent, effect_type, expires_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING id",
        )
        .bind(offer.user_id)
        .bind(offer.subscription_id)
        .bind(offer.notification_type.as_str())
        .bind(offer.discount_percent)
        .bind(&offer.effect_type)
        .bind(offer.expires_at)
        .fetch_one(conn)
        .await
        .context("Failed to create discount offer")
    }

    pub async fn deactivate_expired(conn: &mut PgConnection, now: DateTime<Utc>) -> Result<u64> {
        let rows = sqlx::query(
            "UPDATE discount_offers SET is_active = FALSE
             WHERE is_active = TRUE AND claimed_at IS NULL AND expires_at <= $1",
        )
        .bind(now)
        .execute(conn)
        .await
        .context("Failed to deactivate expired discount offers")?
        .rows_affected();
        Ok(rows)
    }
}
