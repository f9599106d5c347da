use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sentinel_db::UnitOfWork;
use sentinel_db::models::notification::{NotificationKey, NotificationType};
use sentinel_db::models::subscription::{Subscription, SubscriptionStatus};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::clients::{PanelUserUpdate, Pricing, VpnPanel};
use crate::config::AutopayConfig;
use crate::error::{CoreError, CoreResult, bounded};
use crate::report::{BatchReport, ItemOutcome};
use crate::scheduler::CycleCheck;
use crate::services::notification_ledger::{NotificationLedger, ResetRule};
use crate::services::notifier::UserNotifier;
use crate::templates::Template;

const ITEM_SAVEPOINT: &str = "autopay_item";

/// Applies a promo percent, rounding half up in minor units.
pub fn discounted_price(price: i64, percent: Option<u8>) -> i64 {
    match percent {
        Some(p) => (price * (100 - p.min(100) as i64) + 50) / 100,
        None => price,
    }
}

fn epoch_day(at: DateTime<Utc>) -> i32 {
    at.timestamp().div_euclid(86_400) as i32
}

pub struct AutopayProcessor {
    config: AutopayConfig,
    pricing: Arc<dyn Pricing>,
    notifier: Arc<UserNotifier>,
    ledger: Arc<NotificationLedger>,
    panel: Arc<dyn VpnPanel>,
    call_timeout: std::time::Duration,
}

impl AutopayProcessor {
    pub fn new(
        config: AutopayConfig,
        pricing: Arc<dyn Pricing>,
        notifier: Arc<UserNotifier>,
        ledger: Arc<NotificationLedger>,
        panel: Arc<dyn VpnPanel>,
        call_timeout: std::time::Duration,
    ) -> Self {
        Self {
            config,
            pricing,
            notifier,
            ledger,
            panel,
            call_timeout,
        }
    }

    fn is_due(sub: &Subscription, now: DateTime<Utc>) -> bool {
        !sub.is_trial
            && sub.autopay_enabled
            && sub.end_date > now
            && sub.days_until_expiry(now) <= sub.autopay_days_before as i64
    }

    async fn renew(
        &self,
        uow: &mut dyn UnitOfWork,
        sub: &Subscription,
        now: DateTime<Utc>,
    ) -> CoreResult<ItemOutcome> {
        let user = uow.user(sub.user_id).await?.ok_or_else(|| {
            CoreError::DataIntegrity(format!(
                "subscription {} references missing user {}",
                sub.id, sub.user_id
            ))
        })?;

        let base_price = bounded("pricing", self.call_timeout, self.pricing.renewal_price(sub)).await?;
        let promo = user.valid_promo_percent(now);
        let amount = discounted_price(base_price, promo);

        let reason = format!("Autopay renewal of subscription #{}", sub.id);
        if !uow.debit(user.id, amount, &reason).await? {
            let shortfall = CoreError::InsufficientBalance {
                user_id: user.id,
                required: amount,
                available: user.balance,
            };
            warn!("Autopay for subscription {} declined: {}", sub.id, shortfall);
            let key = NotificationKey::new(
                user.id,
                sub.id,
                NotificationType::AutopayFailed,
                epoch_day(sub.end_date),
            );
            self.notifier
                .notify_once(
                    uow,
                    &user,
                    key,
                    &Template::AutopayFailed {
                        required: amount,
                        available: user.balance,
                    },
                    now,
                )
                .await?;
            return Ok(ItemOutcome::Declined);
        }

        let new_end = sub.end_date + Duration::days(self.config.renewal_days);
        if !uow.set_subscription_end_date(sub.id, new_end).await? {
            return Err(CoreError::DataIntegrity(format!(
                "subscription {} vanished during renewal",
                sub.id
            )));
        }
        if self.config.reset_traffic_on_renewal {
            uow.reset_subscription_traffic(sub.id).await?;
        }
        if promo.is_some() {
            uow.consume_promo_discount(user.id).await?;
        }

        // A failed push rolls the item back, debit included.
        if let Some(uuid) = sub.panel_uuid {
            let update = PanelUserUpdate {
                uuid,
                expire_at: new_end,
                traffic_limit_bytes: sub.traffic_limit_bytes,
                active_internal_squads: sub.squads.clone(),
                hwid_device_limit: sub.device_limit,
            };
            bounded("panel", self.call_timeout, self.panel.update(&update)).await?;
            if self.config.reset_traffic_on_renewal {
                bounded("panel", self.call_timeout, self.panel.reset_traffic(uuid)).await?;
            }
        }

        self.ledger
            .apply_reset(uow, ResetRule::Renewal, user.id, sub.id)
            .await?;
        info!(
            "Autopay renewed subscription {} for user {}: charged {}, new end {}",
            sub.id, user.id, amount, new_end
        );

        let key = NotificationKey::new(
            user.id,
            sub.id,
            NotificationType::AutopaySuccess,
            epoch_day(new_end),
        );
        let notice = self
            .notifier
            .notify_once(uow, &user, key, &Template::AutopaySuccess { amount, new_end }, now)
            .await;
        match notice {
            Ok(_) => {}
            Err(e @ CoreError::Storage(_)) => return Err(e),
            Err(e) => warn!("Renewal of subscription {} kept, success notice failed: {}", sub.id, e),
        }
        Ok(ItemOutcome::Acted)
    }
}

#[async_trait]
impl CycleCheck for AutopayProcessor {
    fn name(&self) -> &'static str {
        "autopay"
    }

    async fn run(&self, uow: &mut dyn UnitOfWork, now: DateTime<Utc>) -> CoreResult<BatchReport> {
        let mut report = BatchReport::new(self.name());
        if !self.config.enabled {
            return Ok(report);
        }

        let candidates: Vec<Subscription> = uow
            .current_subscriptions(SubscriptionStatus::Active)
            .await?
            .into_iter()
            .filter(|sub| Self::is_due(sub, now))
            .collect();

        let mut processed = HashSet::new();
        for sub in candidates {
            if !processed.insert(sub.id) {
                report.record(sub.id, Ok(ItemOutcome::Skipped));
                continue;
            }
            uow.savepoint(ITEM_SAVEPOINT).await?;
            let outcome = self.renew(uow, &sub, now).await;
            uow.settle_savepoint(ITEM_SAVEPOINT, outcome.is_ok()).await?;
            report.record(format!("subscription {}", sub.id), outcome);
        }
        report.log();
        Ok(report)
    }
}
