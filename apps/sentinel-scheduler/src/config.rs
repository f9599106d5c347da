use sentinel_db::models::notification::NotificationType;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub redis_url: Option<String>,
    pub bot_token: String,
    pub panel: PanelConfig,
    pub cycle: CycleConfig,
    pub lifecycle: LifecycleConfig,
    pub autopay: AutopayConfig,
    pub reset_policy: ResetPolicyConfig,
    pub sla: SlaConfig,
    pub health: HealthConfig,
    pub admin: AdminConfig,
    pub notifications: NotificationConfig,
    pub event_log: EventLogConfig,
    pub api: ApiConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            database_max_connections: 10,
            redis_url: None,
            bot_token: String::new(),
            panel: PanelConfig::default(),
            cycle: CycleConfig::default(),
            lifecycle: LifecycleConfig::default(),
            autopay: AutopayConfig::default(),
            reset_policy: ResetPolicyConfig::default(),
            sla: SlaConfig::default(),
            health: HealthConfig::default(),
            admin: AdminConfig::default(),
            notifications: NotificationConfig::default(),
            event_log: EventLogConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    pub base_url: Option<String>,
    pub api_token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_token: None,
            timeout_secs: 15,
        }
    }
}

impl PanelConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn is_configured(&self) -> bool {
        self.base_url.as_deref().is_some_and(|url| !url.is_empty())
            && self.api_token.as_deref().is_some_and(|token| !token.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    pub interval_minutes: u64,
    /// Consecutive failures to open a unit of work before the main loop gives up.
    pub max_begin_failures: u32,
    pub cache_clear_minutes: u64,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 5,
            max_begin_failures: 10,
            cache_clear_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub expiring_thresholds_days: Vec<i32>,
    pub trial_ending_window_hours: i32,
    pub trial_inactivity_hours: Vec<i32>,
    pub traffic_warning_percents: Vec<i32>,
    /// Telegram channel trial users must stay subscribed to.
    pub required_channel_id: Option<i64>,
    pub followups: FollowUpConfig,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            expiring_thresholds_days: vec![1, 3, 7],
            trial_ending_window_hours: 3,
            trial_inactivity_hours: vec![1, 24],
            traffic_warning_percents: vec![80, 90],
            required_channel_id: None,
            followups: FollowUpConfig::default(),
        }
    }
}

/// Day offsets are counted from `end_date` of the expired subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FollowUpConfig {
    pub reminder_day: i64,
    pub wave2_start_day: i64,
    pub wave2_end_day: i64,
    pub wave2_percent: i32,
    pub wave2_ttl_hours: i64,
    pub wave3_day: i64,
    pub wave3_percent: i32,
    pub wave3_ttl_hours: i64,
    pub max_day: i64,
}

impl Default for FollowUpConfig {
    fn default() -> Self {
        Self {
            reminder_day: 1,
            wave2_start_day: 2,
            wave2_end_day: 4,
            wave2_percent: 15,
            wave2_ttl_hours: 48,
            wave3_day: 7,
            wave3_percent: 25,
            wave3_ttl_hours: 72,
            max_day: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutopayConfig {
    pub enabled: bool,
    pub renewal_days: i64,
    pub reset_traffic_on_renewal: bool,
    /// Used when the plan has no price row. Minor units.
    pub fallback_price: Option<i64>,
}

impl Default for AutopayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            renewal_days: 30,
            reset_traffic_on_renewal: true,
            fallback_price: None,
        }
    }
}

/// Which notification keys each reset rule clears.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResetPolicyConfig {
    pub channel_rejoin: Vec<NotificationType>,
    pub renewal: Vec<NotificationType>,
}

impl Default for ResetPolicyConfig {
    fn default() -> Self {
        Self {
            channel_rejoin: vec![NotificationType::TrialChannelUnsubscribed],
            renewal: vec![NotificationType::ExpiringSoon],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlaConfig {
    pub enabled: bool,
    pub check_interval_minutes: u64,
    pub sla_minutes: i64,
    pub cooldown_minutes: i64,
}

impl Default for SlaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_minutes: 5,
            sla_minutes: 60,
            cooldown_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub attempts: u32,
    pub retry_pause_secs: u64,
    pub timeout_secs: u64,
    pub failure_threshold: u32,
    pub auto_enable: bool,
    /// Shown to non-operators while maintenance is active.
    pub maintenance_message: String,
    pub state_ttl_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            attempts: 3,
            retry_pause_secs: 5,
            timeout_secs: 10,
            failure_threshold: 3,
            auto_enable: true,
            maintenance_message:
                "The service is under maintenance. Please try again in a few minutes.".to_string(),
            state_ttl_secs: 7 * 24 * 3600,
        }
    }
}

impl HealthConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_pause(&self) -> Duration {
        Duration::from_secs(self.retry_pause_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Telegram chat ids of operators.
    pub recipients: Vec<i64>,
    pub suppression_minutes: u64,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            recipients: Vec::new(),
            suppression_minutes: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub send_timeout_secs: u64,
    pub templates_path: Option<String>,
    /// Target of the "Renew" button.
    pub renew_url: Option<String>,
    pub default_language: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            send_timeout_secs: 10,
            templates_path: None,
            renew_url: None,
            default_language: "en".to_string(),
        }
    }
}

impl NotificationConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventLogConfig {
    pub retention_days: i64,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self { retention_days: 30 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub listen: Option<String>,
    pub token: Option<String>,
}

impl SchedulerConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config_paths = ["/etc/sentinel/scheduler.toml", "./scheduler.toml"];

        let mut config = None;
        for path in config_paths {
            if let Ok(contents) = fs::read_to_string(path) {
                tracing::info!("Loading config from {}", path);
                config = Some(Self::from_toml(path, &contents)?);
                break;
            }
        }

        let mut config = match config {
            Some(config) => config,
            None => {
                tracing::info!("Loading config from environment");
                Self::default()
            }
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(path: &str, contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    /// Environment variables override file values for connection settings and secrets.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database_url = url;
        }
        if let Ok(url) = std::env::var("REDIS_URL") {
            self.redis_url = Some(url);
        }
        if let Ok(token) = std::env::var("BOT_TOKEN") {
            self.bot_token = token;
        }
        if let Ok(url) = std::env::var("PANEL_URL") {
            self.panel.base_url = Some(url);
        }
        if let Ok(token) = std::env::var("PANEL_TOKEN") {
            self.panel.api_token = Some(token);
        }
        if let Ok(raw) = std::env::var("ADMIN_IDS") {
            self.admin.recipients = raw
                .split(',')
                .filter_map(|id| id.trim().parse().ok())
                .collect();
        }
        if let Some(channel) = std::env::var("REQUIRED_CHANNEL_ID")
            .ok()
            .and_then(|raw| raw.parse().ok())
        {
            self.lifecycle.required_channel_id = Some(channel);
        }
        if let Some(minutes) = std::env::var("CYCLE_INTERVAL_MINUTES")
            .ok()
            .and_then(|raw| raw.parse().ok())
        {
            self.cycle.interval_minutes = minutes;
        }
        if let Ok(listen) = std::env::var("API_LISTEN") {
            self.api.listen = Some(listen);
        }
        if let Ok(token) = std::env::var("API_TOKEN") {
            self.api.token = Some(token);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.is_empty() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }
        if self.bot_token.is_empty() {
            return Err(ConfigError::Missing("BOT_TOKEN"));
        }
        if !(1..=10).contains(&self.cycle.interval_minutes) {
            return Err(invalid(
                "cycle.interval_minutes",
                format!("{} is outside 1..=10", self.cycle.interval_minutes),
            ));
        }
        if self.cycle.max_begin_failures == 0 {
            return Err(invalid("cycle.max_begin_failures", "must be positive"));
        }
        if self.lifecycle.expiring_thresholds_days.iter().any(|t| *t <= 0) {
            return Err(invalid("lifecycle.expiring_thresholds_days", "thresholds must be positive"));
        }
        if self.lifecycle.trial_ending_window_hours <= 0 {
            return Err(invalid("lifecycle.trial_ending_window_hours", "must be positive"));
        }
        if self.lifecycle.trial_inactivity_hours.iter().any(|t| *t <= 0) {
            return Err(invalid("lifecycle.trial_inactivity_hours", "thresholds must be positive"));
        }
        if self
            .lifecycle
            .traffic_warning_percents
            .iter()
            .any(|p| !(1..=100).contains(p))
        {
            return Err(invalid("lifecycle.traffic_warning_percents", "percents must be in 1..=100"));
        }

        let f = &self.lifecycle.followups;
        if !(f.reminder_day >= 1
            && f.reminder_day < f.wave2_start_day
            && f.wave2_start_day < f.wave2_end_day
            && f.wave2_end_day <= f.wave3_day
            && f.wave3_day < f.max_day)
        {
            return Err(invalid(
                "lifecycle.followups",
                format!(
                    "windows must be ordered: reminder {} < wave2 [{}, {}) <= wave3 {} < max {}",
                    f.reminder_day, f.wave2_start_day, f.wave2_end_day, f.wave3_day, f.max_day
                ),
            ));
        }
        for (key, percent) in [
            ("lifecycle.followups.wave2_percent", f.wave2_percent),
            ("lifecycle.followups.wave3_percent", f.wave3_percent),
        ] {
            if !(1..=100).contains(&percent) {
                return Err(invalid(key, format!("{} is outside 1..=100", percent)));
            }
        }
        if f.wave2_ttl_hours <= 0 || f.wave3_ttl_hours <= 0 {
            return Err(invalid("lifecycle.followups", "offer TTLs must be positive"));
        }

        if self.autopay.renewal_days <= 0 {
            return Err(invalid("autopay.renewal_days", "must be positive"));
        }
        if self.sla.sla_minutes <= 0 || self.sla.cooldown_minutes <= 0 {
            return Err(invalid("sla", "sla_minutes and cooldown_minutes must be positive"));
        }
        if self.sla.check_interval_minutes == 0 {
            return Err(invalid("sla.check_interval_minutes", "must be positive"));
        }
        if self.health.attempts == 0 {
            return Err(invalid("health.attempts", "at least one attempt is required"));
        }
        if self.health.failure_threshold == 0 {
            return Err(invalid("health.failure_threshold", "must be positive"));
        }
        if self.health.interval_secs == 0 || self.health.timeout_secs == 0 {
            return Err(invalid("health", "interval_secs and timeout_secs must be positive"));
        }
        if self.event_log.retention_days <= 0 {
            return Err(invalid("event_log.retention_days", "must be positive"));
        }
        if self.api.listen.is_some() && self.api.token.as_deref().is_none_or(str::is_empty) {
            return Err(ConfigError::Missing("API_TOKEN"));
        }
        Ok(())
    }
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.into(),
    }
}
