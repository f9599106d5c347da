use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// Every user-facing notification the scheduler can send. The text form is
/// persisted in `notification_records.notification_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Expired,
    ExpiringSoon,
    TrialExpiringSoon,
    TrialInactive,
    TrialChannelUnsubscribed,
    ExpiredReminder,
    ExpiredDiscountWave2,
    ExpiredDiscountWave3,
    TrafficWarning,
    AutopaySuccess,
    AutopayFailed,
}

impl NotificationType {
    pub const ALL: [NotificationType; 11] = [
        Self::Expired,
        Self::ExpiringSoon,
        Self::TrialExpiringSoon,
        Self::TrialInactive,
        Self::TrialChannelUnsubscribed,
        Self::ExpiredReminder,
        Self::ExpiredDiscountWave2,
        Self::ExpiredDiscountWave3,
        Self::TrafficWarning,
        Self::AutopaySuccess,
        Self::AutopayFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::ExpiringSoon => "expiring_soon",
            Self::TrialExpiringSoon => "trial_expiring_soon",
            Self::TrialInactive => "trial_inactive",
            Self::TrialChannelUnsubscribed => "trial_channel_unsubscribed",
            Self::ExpiredReminder => "expired_reminder",
            Self::ExpiredDiscountWave2 => "expired_discount_wave2",
            Self::ExpiredDiscountWave3 => "expired_discount_wave3",
            Self::TrafficWarning => "traffic_warning",
            Self::AutopaySuccess => "autopay_success",
            Self::AutopayFailed => "autopay_failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == raw)
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for NotificationType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("unknown notification type '{}'", value))
    }
}

/// Dedup key. At most one record exists per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationKey {
    pub user_id: i64,
    pub subscription_id: i64,
    pub kind: NotificationType,
    pub threshold: i32,
}

impl NotificationKey {
    pub fn new(user_id: i64, subscription_id: i64, kind: NotificationType, threshold: i32) -> Self {
        Self {
            user_id,
            subscription_id,
            kind,
            threshold,
        }
    }
}

impl fmt::Display for NotificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{} (user {}, sub {})",
            self.kind, self.threshold, self.user_id, self.subscription_id
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NotificationRecord {
    pub id: i64,
    pub user_id: i64,
    pub subscription_id: i64,
    #[sqlx(try_from = "String")]
    pub notification_type: NotificationType,
    pub threshold: i32,
    pub sent_at: DateTime<Utc>,
}

impl NotificationRecord {
    pub fn key(&self) -> NotificationKey {
        NotificationKey::new(
            self.user_id,
            self.subscription_id,
            self.notification_type,
            self.threshold,
        )
    }
}
