use async_trait::async_trait;
use sentinel_db::models::subscription::Subscription;
use sqlx::PgPool;

use crate::error::{CoreError, CoreResult};

/// Black-box renewal price source. Minor currency units.
#[async_trait]
pub trait Pricing: Send + Sync {
    async fn renewal_price(&self, subscription: &Subscription) -> CoreResult<i64>;
}

/// Looks up the plan's price row closest to the renewal period.
pub struct PlanPricing {
    pool: PgPool,
    renewal_days: i64,
    fallback_price: Option<i64>,
}

impl PlanPricing {
    pub fn new(pool: PgPool, renewal_days: i64, fallback_price: Option<i64>) -> Self {
        Self {
            pool,
            renewal_days,
            fallback_price,
        }
    }
}

#[async_trait]
impl Pricing for PlanPricing {
    async fn renewal_price(&self, subscription: &Subscription) -> CoreResult<i64> {
        let price = match subscription.plan_id {
            Some(plan_id) => sqlx::query_scalar::<_, i64>(
                r#"
                SELECT price FROM plan_durations
                WHERE plan_id = $1
                ORDER BY ABS(duration_days - $2), duration_days
                LIMIT 1
                "#,
            )
            .bind(plan_id)
            .bind(self.renewal_days as i32)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CoreError::Storage(anyhow::Error::new(e).context("Failed to fetch plan price")))?,
            None => None,
        };

        price.or(self.fallback_price).ok_or_else(|| {
            CoreError::DataIntegrity(format!(
                "no renewal price for subscription {} (plan {:?})",
                subscription.id, subscription.plan_id
            ))
        })
    }
}
