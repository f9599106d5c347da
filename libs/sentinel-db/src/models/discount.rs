use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::notification::NotificationType;

pub const EFFECT_RENEWAL_PERCENT: &str = "renewal_percent_off";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DiscountOffer {
    pub id: i64,
    pub user_id: i64,
    pub subscription_id: i64,
    #[sqlx(try_from = "String")]
    pub notification_type: NotificationType,
    pub discount_percent: i32,
    pub effect_type: String,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl DiscountOffer {
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.claimed_at.is_none() && self.expires_at > now
    }
}

#[derive(Debug, Clone)]
pub struct NewDiscountOffer {
    pub user_id: i64,
    pub subscription_id: i64,
    pub notification_type: NotificationType,
    pub discount_percent: i32,
    pub effect_type: String,
    pub expires_at: DateTime<Utc>,
}
