//! Wire types shared between the scheduler and the request-handling layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted maintenance blob. Field names are the storage format; do not rename.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceSnapshot {
    pub is_active: bool,
    pub enabled_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
    pub auto_enabled: bool,
    pub consecutive_failures: u32,
    pub last_check: Option<DateTime<Utc>>,
}

impl MaintenanceSnapshot {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

/// Result of a single health probe run (all attempts included).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub success: bool,
    pub attempts: u32,
    pub latency_ms: u64,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastTick {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub failed_checks: Vec<String>,
}

/// Operator dashboard summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub running: bool,
    pub maintenance: MaintenanceSnapshot,
    pub last_probe: Option<ProbeReport>,
    pub last_tick: Option<LastTick>,
    pub health_monitor_enabled: bool,
}
