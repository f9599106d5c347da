use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::clients::NotificationGateway;
use crate::error::bounded;
use crate::templates::{Template, TemplateRegistry};

/// Suppression bucket. Identical alerts within the window are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AlertCategory {
    MaintenanceEnabled,
    MaintenanceCleared,
    CheckFailed(String),
    TicketSla(i64),
    LoopStopped(String),
}

impl AlertCategory {
    /// Ticket reminders are paced by the cooldown stored on the ticket.
    fn is_windowed(&self) -> bool {
        !matches!(self, Self::TicketSla(_))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub delivered: usize,
    pub failed: usize,
    pub suppressed: bool,
}

pub struct AdminNotifier {
    gateway: Arc<dyn NotificationGateway>,
    templates: Arc<TemplateRegistry>,
    recipients: Vec<i64>,
    window: Duration,
    send_timeout: Duration,
    last_sent: Mutex<HashMap<AlertCategory, Instant>>,
}

impl AdminNotifier {
    pub fn new(
        gateway: Arc<dyn NotificationGateway>,
        templates: Arc<TemplateRegistry>,
        recipients: Vec<i64>,
        window: Duration,
        send_timeout: Duration,
    ) -> Self {
        if recipients.is_empty() {
            warn!("No admin recipients configured, operator alerts are disabled");
        }
        Self {
            gateway,
            templates,
            recipients,
            window,
            send_timeout,
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    fn last_sent(&self) -> MutexGuard<'_, HashMap<AlertCategory, Instant>> {
        self.last_sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Marks the category as sent now unless it was sent within the window.
    /// Entries older than the window are dropped on the way.
    fn claim(&self, category: &AlertCategory) -> bool {
        let mut last_sent = self.last_sent();
        let now = Instant::now();
        last_sent.retain(|_, at| now.duration_since(*at) < self.window);
        if last_sent.contains_key(category) {
            return false;
        }
        last_sent.insert(category.clone(), now);
        true
    }

    /// Undoes a claim whose alert reached nobody.
    fn release(&self, category: &AlertCategory) {
        self.last_sent().remove(category);
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.last_sent().len()
    }

    /// Sends to every operator. A failing recipient never stops the rest.
    pub async fn alert(&self, category: AlertCategory, template: &Template) -> FanoutReport {
        let mut report = FanoutReport::default();
        if self.recipients.is_empty() {
            return report;
        }
        let windowed = category.is_windowed();
        if windowed && !self.claim(&category) {
            info!("Admin alert {:?} suppressed", category);
            report.suppressed = true;
            return report;
        }

        let Some(message) = self.templates.render(template, None) else {
            warn!("No text for admin template '{}'", template.key());
            if windowed {
                self.release(&category);
            }
            return report;
        };

        for recipient in &self.recipients {
            let sent = bounded(
                "telegram",
                self.send_timeout,
                self.gateway.send(*recipient, &message),
            )
            .await;
            match sent {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!("Failed to alert admin {}: {}", recipient, e);
                }
            }
        }
        if windowed && report.delivered == 0 {
            self.release(&category);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CoreError, CoreResult};
    use crate::templates::RenderedMessage;
    use async_trait::async_trait;

    struct Gateway {
        up: bool,
    }

    #[async_trait]
    impl NotificationGateway for Gateway {
        async fn send(&self, _recipient: i64, _message: &RenderedMessage) -> CoreResult<()> {
            if self.up {
                Ok(())
            } else {
                Err(CoreError::transient("telegram", "down"))
            }
        }
    }

    fn notifier(up: bool, window: Duration) -> AdminNotifier {
        AdminNotifier::new(
            Arc::new(Gateway { up }),
            Arc::new(TemplateRegistry::builtin("en", None)),
            vec![1],
            window,
            Duration::from_secs(1),
        )
    }

    fn check_failed(check: &str) -> (AlertCategory, Template) {
        (
            AlertCategory::CheckFailed(check.to_string()),
            Template::AdminCheckFailed {
                check: check.to_string(),
                error: "boom".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn stale_categories_are_pruned() {
        let admin = notifier(true, Duration::from_millis(20));
        let (category, template) = check_failed("lifecycle");
        admin.alert(category, &template).await;
        assert_eq!(admin.tracked(), 1);

        tokio::time::sleep(Duration::from_millis(30)).await;
        let (category, template) = check_failed("autopay");
        admin.alert(category, &template).await;
        assert_eq!(admin.tracked(), 1);
    }

    #[tokio::test]
    async fn undelivered_alert_releases_its_window() {
        let admin = notifier(false, Duration::from_secs(600));
        let (category, template) = check_failed("lifecycle");
        let first = admin.alert(category.clone(), &template).await;
        assert_eq!(first.failed, 1);
        assert_eq!(admin.tracked(), 0);

        let second = admin.alert(category, &template).await;
        assert!(!second.suppressed);
        assert_eq!(second.failed, 1);
    }

    #[tokio::test]
    async fn ticket_reminders_bypass_the_window() {
        let admin = notifier(true, Duration::from_secs(600));
        let template = Template::AdminTicketSla {
            ticket_id: 7,
            idle_minutes: 90,
            subject: "Cannot connect".to_string(),
        };
        let first = admin.alert(AlertCategory::TicketSla(7), &template).await;
        let second = admin.alert(AlertCategory::TicketSla(7), &template).await;
        assert_eq!(first.delivered, 1);
        assert_eq!(second.delivered, 1);
        assert_eq!(admin.tracked(), 0);
    }
}
