//! Typed message templates.
//!
//! Every message the scheduler sends is a [`Template`] variant carrying its own
//! parameters. Texts live in a [`TemplateRegistry`]: built-in English defaults,
//! optionally overridden per language from a TOML file:
//!
//! ```toml
//! [ru]
//! expired = "Ваша подписка истекла."
//! expiring_soon = "Подписка истекает через {days} дн."
//! ```
//!
//! An empty override disables that template for the language.

use std::collections::HashMap;
use std::fs;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::NotificationConfig;

#[derive(Debug, Clone, PartialEq)]
pub enum Template {
    Expired,
    ExpiringSoon { days: i64 },
    TrialExpiringSoon { hours: i64 },
    TrialInactive { hours: i32 },
    TrialChannelUnsubscribed,
    ExpiredReminder,
    ExpiredDiscount { wave: u8, percent: i32, valid_hours: i64 },
    TrafficWarning { percent: i32 },
    AutopaySuccess { amount: i64, new_end: DateTime<Utc> },
    AutopayFailed { required: i64, available: i64 },
    AdminMaintenanceEnabled { reason: String },
    AdminMaintenanceCleared { downtime_minutes: i64 },
    AdminTicketSla { ticket_id: i64, idle_minutes: i64, subject: String },
    AdminCheckFailed { check: String, error: String },
    AdminLoopStopped { task: String, error: String },
}

impl Template {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::ExpiringSoon { .. } => "expiring_soon",
            Self::TrialExpiringSoon { .. } => "trial_expiring_soon",
            Self::TrialInactive { .. } => "trial_inactive",
            Self::TrialChannelUnsubscribed => "trial_channel_unsubscribed",
            Self::ExpiredReminder => "expired_reminder",
            Self::ExpiredDiscount { wave: 3, .. } => "expired_discount_wave3",
            Self::ExpiredDiscount { .. } => "expired_discount_wave2",
            Self::TrafficWarning { .. } => "traffic_warning",
            Self::AutopaySuccess { .. } => "autopay_success",
            Self::AutopayFailed { .. } => "autopay_failed",
            Self::AdminMaintenanceEnabled { .. } => "admin_maintenance_enabled",
            Self::AdminMaintenanceCleared { .. } => "admin_maintenance_cleared",
            Self::AdminTicketSla { .. } => "admin_ticket_sla",
            Self::AdminCheckFailed { .. } => "admin_check_failed",
            Self::AdminLoopStopped { .. } => "admin_loop_stopped",
        }
    }

    fn params(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::ExpiringSoon { days } => vec![("days", days.to_string())],
            Self::TrialExpiringSoon { hours } => vec![("hours", hours.to_string())],
            Self::TrialInactive { hours } => vec![("hours", hours.to_string())],
            Self::ExpiredDiscount {
                percent,
                valid_hours,
                ..
            } => vec![
                ("percent", percent.to_string()),
                ("valid_hours", valid_hours.to_string()),
            ],
            Self::TrafficWarning { percent } => vec![("percent", percent.to_string())],
            Self::AutopaySuccess { amount, new_end } => vec![
                ("amount", format_money(*amount)),
                ("new_end", new_end.format("%Y-%m-%d").to_string()),
            ],
            Self::AutopayFailed {
                required,
                available,
            } => vec![
                ("required", format_money(*required)),
                ("available", format_money(*available)),
            ],
            Self::AdminMaintenanceEnabled { reason } => vec![("reason", reason.clone())],
            Self::AdminMaintenanceCleared { downtime_minutes } => {
                vec![("downtime_minutes", downtime_minutes.to_string())]
            }
            Self::AdminTicketSla {
                ticket_id,
                idle_minutes,
                subject,
            } => vec![
                ("ticket_id", ticket_id.to_string()),
                ("idle_minutes", idle_minutes.to_string()),
                ("subject", subject.clone()),
            ],
            Self::AdminCheckFailed { check, error } => {
                vec![("check", check.clone()), ("error", error.clone())]
            }
            Self::AdminLoopStopped { task, error } => {
                vec![("task", task.clone()), ("error", error.clone())]
            }
            Self::Expired | Self::TrialChannelUnsubscribed | Self::ExpiredReminder => Vec::new(),
        }
    }

    fn offers_renewal(&self) -> bool {
        matches!(
            self,
            Self::Expired
                | Self::ExpiringSoon { .. }
                | Self::TrialExpiringSoon { .. }
                | Self::ExpiredReminder
                | Self::ExpiredDiscount { .. }
                | Self::AutopayFailed { .. }
        )
    }
}

fn format_money(minor_units: i64) -> String {
    format!("{:.2}", minor_units as f64 / 100.0)
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedMessage {
    pub text: String,
    /// (label, url) pairs, rendered two per row.
    pub buttons: Vec<(String, String)>,
    pub disable_link_preview: bool,
}

const BUILTIN_EN: &[(&str, &str)] = &[
    ("expired", "⛔️ Your subscription has expired. Renew it to restore access."),
    ("expiring_soon", "⏳ Your subscription expires in {days} day(s). Renew now to stay connected."),
    ("trial_expiring_soon", "⏳ Your trial ends in {hours} hour(s). Pick a plan to keep using the service."),
    ("trial_inactive", "👋 You activated your trial {hours} hour(s) ago but have not connected yet. Need help with the setup?"),
    ("trial_channel_unsubscribed", "📢 Your trial was paused because you left our channel. Join it again to resume access."),
    ("expired_reminder", "Your subscription expired yesterday. Renew any time to get back online."),
    ("expired_discount_wave2", "🎁 Come back with {percent}% off your renewal. The offer is valid for {valid_hours} hours."),
    ("expired_discount_wave3", "🎁 Last chance: {percent}% off your renewal for the next {valid_hours} hours."),
    ("traffic_warning", "📊 You have used {percent}% of your traffic limit."),
    ("autopay_success", "✅ Your subscription was renewed automatically. Charged {amount}, active until {new_end}."),
    ("autopay_failed", "⚠️ Automatic renewal failed: {required} is required but your balance is {available}. Top up to keep your subscription."),
    ("admin_maintenance_enabled", "🚨 Maintenance mode enabled: {reason}"),
    ("admin_maintenance_cleared", "✅ Panel API recovered, maintenance mode cleared after {downtime_minutes} min."),
    ("admin_ticket_sla", "🎫 Ticket #{ticket_id} \"{subject}\" has been waiting {idle_minutes} min for a reply."),
    ("admin_check_failed", "❌ Scheduled check '{check}' failed: {error}"),
    ("admin_loop_stopped", "🛑 Background task '{task}' stopped: {error}"),
];

pub struct TemplateRegistry {
    texts: HashMap<String, HashMap<String, String>>,
    default_language: String,
    renew_url: Option<String>,
}

impl TemplateRegistry {
    pub fn builtin(default_language: &str, renew_url: Option<String>) -> Self {
        let english = BUILTIN_EN
            .iter()
            .map(|(key, text)| (key.to_string(), text.to_string()))
            .collect();
        let mut texts = HashMap::new();
        texts.insert("en".to_string(), english);
        Self {
            texts,
            default_language: normalize_language(default_language),
            renew_url,
        }
    }

    pub fn load(config: &NotificationConfig) -> Result<Self> {
        let registry = Self::builtin(&config.default_language, config.renew_url.clone());
        match config.templates_path.as_deref() {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read templates from {}", path))?;
                info!("Loading template overrides from {}", path);
                registry.with_overrides(&raw)
            }
            None => Ok(registry),
        }
    }

    /// Applies `[lang] key = "text"` overrides on top of the current texts.
    pub fn with_overrides(mut self, raw: &str) -> Result<Self> {
        let overrides: HashMap<String, HashMap<String, String>> =
            toml::from_str(raw).context("Failed to parse template overrides")?;
        for (language, entries) in overrides {
            let language = normalize_language(&language);
            let table = self.texts.entry(language.clone()).or_default();
            for (key, text) in entries {
                if !BUILTIN_EN.iter().any(|(known, _)| *known == key) {
                    warn!("Ignoring unknown template '{}' for language {}", key, language);
                    continue;
                }
                table.insert(key, text);
            }
        }
        Ok(self)
    }

    /// Returns `None` when no non-empty text exists for the template.
    pub fn render(&self, template: &Template, language: Option<&str>) -> Option<RenderedMessage> {
        let key = template.key();
        let text = self.lookup(key, language)?;
        if text.trim().is_empty() {
            return None;
        }

        let mut text = text.to_string();
        for (name, value) in template.params() {
            text = text.replace(&format!("{{{}}}", name), &value);
        }

        let buttons = match (&self.renew_url, template.offers_renewal()) {
            (Some(url), true) => vec![("Renew".to_string(), url.clone())],
            _ => Vec::new(),
        };

        Some(RenderedMessage {
            text,
            buttons,
            disable_link_preview: true,
        })
    }

    fn lookup(&self, key: &str, language: Option<&str>) -> Option<&str> {
        let requested = language.map(normalize_language);
        let candidates = requested
            .iter()
            .map(String::as_str)
            .chain([self.default_language.as_str(), "en"]);
        for candidate in candidates {
            if let Some(text) = self.texts.get(candidate).and_then(|t| t.get(key)) {
                return Some(text.as_str());
            }
        }
        None
    }
}

/// `"en-US"` and `"EN"` both map to `"en"`.
fn normalize_language(code: &str) -> String {
    code.split(['-', '_'])
        .next()
        .unwrap_or(code)
        .trim()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_parameters_and_renew_button() {
        let registry = TemplateRegistry::builtin("en", Some("https://t.me/shop_bot".to_string()));
        let message = registry
            .render(&Template::ExpiringSoon { days: 3 }, Some("en-US"))
            .unwrap();
        assert!(message.text.contains("expires in 3 day(s)"));
        assert_eq!(message.buttons.len(), 1);

        let admin = registry
            .render(
                &Template::AdminCheckFailed {
                    check: "autopay".into(),
                    error: "boom".into(),
                },
                None,
            )
            .unwrap();
        assert!(admin.buttons.is_empty());
        assert!(admin.text.contains("'autopay' failed: boom"));
    }

    #[test]
    fn overrides_fall_back_to_english_per_key() {
        let registry = TemplateRegistry::builtin("en", None)
            .with_overrides(
                r#"
                [ru]
                expired = "Подписка истекла"
                "#,
            )
            .unwrap();
        let expired = registry.render(&Template::Expired, Some("ru")).unwrap();
        assert_eq!(expired.text, "Подписка истекла");
        let warning = registry
            .render(&Template::TrafficWarning { percent: 80 }, Some("ru"))
            .unwrap();
        assert!(warning.text.contains("80%"));
    }

    #[test]
    fn empty_override_disables_template() {
        let registry = TemplateRegistry::builtin("en", None)
            .with_overrides("[en]\nexpired_reminder = \"\"\n")
            .unwrap();
        assert!(registry.render(&Template::ExpiredReminder, None).is_none());
    }

    #[test]
    fn money_is_rendered_in_major_units() {
        let registry = TemplateRegistry::builtin("en", None);
        let message = registry
            .render(
                &Template::AutopayFailed {
                    required: 29900,
                    available: 1050,
                },
                None,
            )
            .unwrap();
        assert!(message.text.contains("299.00"));
        assert!(message.text.contains("10.50"));
    }
}
