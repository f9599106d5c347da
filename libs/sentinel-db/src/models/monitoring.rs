use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MonitoringLogEntry {
    pub id: i64,
    pub event_type: String,
    pub message: String,
    pub payload: Option<serde_json::Value>,
    pub success: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub event_type: String,
    pub message: String,
    pub payload: Option<serde_json::Value>,
    pub success: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogFilter {
    pub event_type: Option<String>,
    pub success: Option<bool>,
    pub since: Option<DateTime<Utc>>,
}

impl LogFilter {
    pub fn matches(&self, entry: &MonitoringLogEntry) -> bool {
        if let Some(event_type) = &self.event_type {
            if !event_type.is_empty() && &entry.event_type != event_type {
                return false;
            }
        }
        if let Some(success) = self.success {
            if entry.success != success {
                return false;
            }
        }
        if let Some(since) = self.since {
            if entry.created_at < since {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Page {
    /// 1-based.
    pub number: u32,
    pub per_page: u32,
}

impl Page {
    pub const MAX_PER_PAGE: u32 = 200;

    pub fn new(number: u32, per_page: u32) -> Self {
        Self {
            number: number.max(1),
            per_page: per_page.clamp(1, Self::MAX_PER_PAGE),
        }
    }

    pub fn limit(&self) -> i64 {
        self.per_page as i64
    }

    pub fn offset(&self) -> i64 {
        (self.number.saturating_sub(1) as i64) * self.per_page as i64
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(1, 50)
    }
}
