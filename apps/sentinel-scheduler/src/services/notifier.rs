use chrono::{DateTime, Utc};
use sentinel_db::UnitOfWork;
use sentinel_db::models::notification::NotificationKey;
use sentinel_db::models::user::UserAccount;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clients::NotificationGateway;
use crate::error::{CoreError, CoreResult, bounded};
use crate::services::notification_ledger::NotificationLedger;
use crate::templates::{Template, TemplateRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    AlreadySent,
    /// Recorded as handled; the recipient blocked the bot or is gone.
    Unreachable,
    /// No text for this template in any language; nothing sent or recorded.
    NoTemplate,
}

/// The single place user-facing messages leave the process.
pub struct UserNotifier {
    gateway: Arc<dyn NotificationGateway>,
    templates: Arc<TemplateRegistry>,
    ledger: Arc<NotificationLedger>,
    send_timeout: Duration,
}

impl UserNotifier {
    pub fn new(
        gateway: Arc<dyn NotificationGateway>,
        templates: Arc<TemplateRegistry>,
        ledger: Arc<NotificationLedger>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            templates,
            ledger,
            send_timeout,
        }
    }

    pub async fn already_sent(&self, uow: &mut dyn UnitOfWork, key: &NotificationKey) -> CoreResult<bool> {
        Ok(self.ledger.exists(uow, key).await?)
    }

    pub fn can_render(&self, template: &Template, user: &UserAccount) -> bool {
        self.templates
            .render(template, user.language_code.as_deref())
            .is_some()
    }

    /// Checks the ledger, sends, and records the key once the send is settled.
    pub async fn notify_once(
        &self,
        uow: &mut dyn UnitOfWork,
        user: &UserAccount,
        key: NotificationKey,
        template: &Template,
        now: DateTime<Utc>,
    ) -> CoreResult<Delivery> {
        if self.already_sent(uow, &key).await? {
            debug!("Skipping {}: already recorded", key);
            return Ok(Delivery::AlreadySent);
        }
        self.deliver_and_record(uow, user, key, template, now).await
    }

    /// Sends and records without the ledger check. Callers that need to run a
    /// side effect between the check and the send use this half.
    pub async fn deliver_and_record(
        &self,
        uow: &mut dyn UnitOfWork,
        user: &UserAccount,
        key: NotificationKey,
        template: &Template,
        now: DateTime<Utc>,
    ) -> CoreResult<Delivery> {
        let delivery = match self.send(user, template).await {
            Ok(()) => Delivery::Sent,
            Err(CoreError::RecipientUnreachable(recipient)) => {
                info!("Recipient {} unreachable, recording {} as handled", recipient, key);
                self.ledger.cache().mark_unreachable(recipient);
                Delivery::Unreachable
            }
            Err(CoreError::TemplateMissing(name)) => {
                warn!("No text for template '{}', {} not sent", name, key);
                return Ok(Delivery::NoTemplate);
            }
            Err(e) => return Err(e),
        };

        self.ledger.record(uow, key, now).await?;
        Ok(delivery)
    }

    async fn send(&self, user: &UserAccount, template: &Template) -> CoreResult<()> {
        if self.ledger.cache().is_unreachable(user.telegram_id) {
            return Err(CoreError::RecipientUnreachable(user.telegram_id));
        }
        let message = self
            .templates
            .render(template, user.language_code.as_deref())
            .ok_or_else(|| CoreError::TemplateMissing(template.key().to_string()))?;

        bounded(
            "telegram",
            self.send_timeout,
            self.gateway.send(user.telegram_id, &message),
        )
        .await
    }
}
