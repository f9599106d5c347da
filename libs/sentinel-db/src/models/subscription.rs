use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Expired,
    Disabled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Disabled => "disabled",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for SubscriptionStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "expired" => Ok(Self::Expired),
            "disabled" => Ok(Self::Disabled),
            other => Err(format!("unknown subscription status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub id: i64,
    pub user_id: i64,
    pub plan_id: Option<i64>,
    /// Client identifier on the VPN panel. `None` until provisioned.
    pub panel_uuid: Option<Uuid>,
    #[sqlx(try_from = "String")]
    pub status: SubscriptionStatus,
    pub is_trial: bool,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub traffic_limit_bytes: i64,
    pub traffic_used_bytes: i64,
    pub device_limit: i32,
    pub squads: Vec<String>,
    pub autopay_enabled: bool,
    pub autopay_days_before: i32,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }

    /// Time left until `end_date`; negative once expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        self.end_date - now
    }

    /// Whole days left, rounded up, so "expires in 36h" counts as 2 days.
    pub fn days_until_expiry(&self, now: DateTime<Utc>) -> i64 {
        let remaining = self.remaining(now);
        if remaining <= Duration::zero() {
            return 0;
        }
        let secs = remaining.num_seconds();
        (secs + 86_399) / 86_400
    }

    pub fn traffic_used_percent(&self) -> Option<u8> {
        if self.traffic_limit_bytes <= 0 {
            return None;
        }
        let pct = (self.traffic_used_bytes as f64 / self.traffic_limit_bytes as f64) * 100.0;
        Some(pct.clamp(0.0, 100.0) as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(end_in: Duration) -> Subscription {
        let now = Utc::now();
        Subscription {
            id: 1,
            user_id: 1,
            plan_id: None,
            panel_uuid: None,
            status: SubscriptionStatus::Active,
            is_trial: false,
            start_date: now - Duration::days(30),
            end_date: now + end_in,
            traffic_limit_bytes: 100,
            traffic_used_bytes: 85,
            device_limit: 3,
            squads: vec![],
            autopay_enabled: false,
            autopay_days_before: 1,
            created_at: now - Duration::days(30),
        }
    }

    #[test]
    fn days_until_expiry_rounds_up() {
        let now = Utc::now();
        let s = Subscription { end_date: now + Duration::hours(36), ..sub(Duration::zero()) };
        assert_eq!(s.days_until_expiry(now), 2);
        let s = Subscription { end_date: now - Duration::hours(1), ..s };
        assert_eq!(s.days_until_expiry(now), 0);
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            SubscriptionStatus::Pending,
            SubscriptionStatus::Active,
            SubscriptionStatus::Expired,
            SubscriptionStatus::Disabled,
        ] {
            assert_eq!(SubscriptionStatus::try_from(status.as_str().to_string()), Ok(status));
        }
        assert!(SubscriptionStatus::try_from("frozen".to_string()).is_err());
    }

    #[test]
    fn traffic_percent_ignores_unlimited_plans() {
        let s = sub(Duration::days(3));
        assert_eq!(s.traffic_used_percent(), Some(85));
        let unlimited = Subscription { traffic_limit_bytes: 0, ..s };
        assert_eq!(unlimited.traffic_used_percent(), None);
    }
}
