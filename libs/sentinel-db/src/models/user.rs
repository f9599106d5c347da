use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserAccount {
    pub id: i64,
    pub telegram_id: i64,
    pub username: Option<String>,
    pub language_code: Option<String>,
    /// Minor currency units.
    pub balance: i64,
    pub promo_discount_percent: i32,
    pub promo_discount_expires_at: Option<DateTime<Utc>>,
}

impl UserAccount {
    /// Promo percent that may be applied right now, if any.
    pub fn valid_promo_percent(&self, now: DateTime<Utc>) -> Option<u8> {
        if self.promo_discount_percent <= 0 {
            return None;
        }
        if let Some(expires_at) = self.promo_discount_expires_at {
            if expires_at <= now {
                return None;
            }
        }
        Some(self.promo_discount_percent.min(100) as u8)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BalanceTransaction {
    pub id: i64,
    pub user_id: i64,
    pub amount: i64,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}
