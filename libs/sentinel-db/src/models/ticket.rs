use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Open,
    Answered,
    Closed,
    Pending,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Answered => "answered",
            Self::Closed => "closed",
            Self::Pending => "pending",
        }
    }
}

impl TryFrom<String> for TicketStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "open" => Ok(Self::Open),
            "answered" => Ok(Self::Answered),
            "closed" => Ok(Self::Closed),
            "pending" => Ok(Self::Pending),
            other => Err(format!("unknown ticket status '{}'", other)),
        }
    }
}

/// Support ticket. Owned by the ticketing subsystem; this crate only writes
/// `last_sla_reminder_at`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Ticket {
    pub id: i64,
    pub user_id: i64,
    pub subject: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: TicketStatus,
    pub updated_at: DateTime<Utc>,
    pub last_sla_reminder_at: Option<DateTime<Utc>>,
}
