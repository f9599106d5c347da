//! Subscription lifecycle rules run once per main tick.
//!
//! Every rule follows the same shape: select candidates, check the ledger
//! for the exact key, act only if it is absent, record the key after the
//! side effect. Each candidate runs inside its own savepoint so one bad row
//! only rolls back itself.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sentinel_db::UnitOfWork;
use sentinel_db::models::discount::{EFFECT_RENEWAL_PERCENT, NewDiscountOffer};
use sentinel_db::models::notification::{NotificationKey, NotificationType};
use sentinel_db::models::subscription::{Subscription, SubscriptionStatus};
use sentinel_db::models::user::UserAccount;
use std::sync::Arc;
use tracing::{debug, info};

use crate::clients::{ChannelMembership, VpnPanel};
use crate::config::{FollowUpConfig, LifecycleConfig};
use crate::error::{CoreError, CoreResult, bounded};
use crate::report::{BatchReport, ItemOutcome};
use crate::scheduler::CycleCheck;
use crate::services::notification_ledger::{NotificationLedger, ResetRule};
use crate::services::notifier::{Delivery, UserNotifier};
use crate::templates::Template;

const ITEM_SAVEPOINT: &str = "lifecycle_item";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rule {
    Expire,
    ExpiredNotice,
    ExpiringSoon,
    TrialEnding,
    TrialInactivity,
    ChannelCompliance,
    TrafficWarning,
    FollowUp,
}

impl Rule {
    fn name(&self) -> &'static str {
        match self {
            Self::Expire => "expire",
            Self::ExpiredNotice => "expired_notice",
            Self::ExpiringSoon => "expiring_soon",
            Self::TrialEnding => "trial_ending",
            Self::TrialInactivity => "trial_inactivity",
            Self::ChannelCompliance => "channel_compliance",
            Self::TrafficWarning => "traffic_warning",
            Self::FollowUp => "followups",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUpStage {
    Reminder,
    Wave2,
    Wave3,
}

/// Stage for a subscription that expired `elapsed` ago. Windows never overlap.
pub fn followup_stage(config: &FollowUpConfig, elapsed: Duration) -> Option<FollowUpStage> {
    let day = |d: i64| Duration::days(d);
    if elapsed < day(config.reminder_day) || elapsed >= day(config.max_day) {
        None
    } else if elapsed >= day(config.wave3_day) {
        Some(FollowUpStage::Wave3)
    } else if elapsed >= day(config.wave2_start_day) && elapsed < day(config.wave2_end_day) {
        Some(FollowUpStage::Wave2)
    } else if elapsed < day(config.wave2_start_day) {
        Some(FollowUpStage::Reminder)
    } else {
        None
    }
}

/// Smallest configured day threshold that `remaining` is within.
pub fn expiring_threshold(thresholds: &[i32], remaining: Duration) -> Option<i32> {
    if remaining <= Duration::zero() {
        return None;
    }
    thresholds
        .iter()
        .copied()
        .filter(|days| remaining <= Duration::days(*days as i64))
        .min()
}

/// Largest configured threshold already reached.
fn highest_crossed(thresholds: &[i32], reached: impl Fn(i32) -> bool) -> Option<i32> {
    thresholds.iter().copied().filter(|t| reached(*t)).max()
}

/// A user gets at most one expiring-soon message within this many hours.
const EXPIRING_QUIET_HOURS: i64 = 24;

pub struct SubscriptionLifecycleChecker {
    config: LifecycleConfig,
    notifier: Arc<UserNotifier>,
    ledger: Arc<NotificationLedger>,
    panel: Arc<dyn VpnPanel>,
    membership: Option<Arc<dyn ChannelMembership>>,
    call_timeout: std::time::Duration,
}

impl SubscriptionLifecycleChecker {
    pub fn new(
        config: LifecycleConfig,
        notifier: Arc<UserNotifier>,
        ledger: Arc<NotificationLedger>,
        panel: Arc<dyn VpnPanel>,
        membership: Option<Arc<dyn ChannelMembership>>,
        call_timeout: std::time::Duration,
    ) -> Self {
        Self {
            config,
            notifier,
            ledger,
            panel,
            membership,
            call_timeout,
        }
    }

    async fn candidates(
        &self,
        uow: &mut dyn UnitOfWork,
        rule: Rule,
        now: DateTime<Utc>,
    ) -> CoreResult<Vec<Subscription>> {
        let subs = match rule {
            Rule::Expire => uow.active_subscriptions_ended_by(now).await?,
            Rule::ExpiredNotice => {
                // Once the reminder window opens, the reminder replaces a missed notice.
                let horizon = now - Duration::days(self.config.followups.reminder_day);
                uow.current_subscriptions(SubscriptionStatus::Expired)
                    .await?
                    .into_iter()
                    .filter(|s| s.end_date > horizon)
                    .collect()
            }
            Rule::ExpiringSoon => uow.current_subscriptions(SubscriptionStatus::Active)
                .await?
                .into_iter()
                .filter(|s| !s.is_trial && s.end_date > now)
                .collect(),
            Rule::TrialEnding => uow.current_subscriptions(SubscriptionStatus::Active)
                .await?
                .into_iter()
                .filter(|s| s.is_trial && s.end_date > now)
                .collect(),
            Rule::TrialInactivity => uow.current_subscriptions(SubscriptionStatus::Active)
                .await?
                .into_iter()
                .filter(|s| s.is_trial && s.traffic_used_bytes == 0)
                .collect(),
            Rule::ChannelCompliance => {
                if self.membership.is_none() {
                    return Ok(Vec::new());
                }
                let mut subs: Vec<Subscription> = uow
                    .current_subscriptions(SubscriptionStatus::Active)
                    .await?
                    .into_iter()
                    .filter(|s| s.is_trial)
                    .collect();
                subs.extend(
                    uow.current_subscriptions(SubscriptionStatus::Disabled)
                        .await?
                        .into_iter()
                        .filter(|s| s.is_trial),
                );
                subs
            }
            Rule::TrafficWarning => uow.current_subscriptions(SubscriptionStatus::Active)
                .await?
                .into_iter()
                .filter(|s| s.traffic_used_percent().is_some())
                .collect(),
            Rule::FollowUp => uow
                .current_subscriptions(SubscriptionStatus::Expired)
                .await?
                .into_iter()
                .filter(|s| !s.is_trial)
                .collect(),
        };
        Ok(subs)
    }

    async fn run_rule(
        &self,
        uow: &mut dyn UnitOfWork,
        rule: Rule,
        now: DateTime<Utc>,
    ) -> CoreResult<BatchReport> {
        let mut report = BatchReport::new(rule.name());
        for sub in self.candidates(uow, rule, now).await? {
            uow.savepoint(ITEM_SAVEPOINT).await?;
            let outcome = match rule {
                Rule::Expire => self.expire(uow, &sub).await,
                Rule::ExpiredNotice => self.notify_expired(uow, &sub, now).await,
                Rule::ExpiringSoon => self.warn_expiring(uow, &sub, now).await,
                Rule::TrialEnding => self.warn_trial_ending(uow, &sub, now).await,
                Rule::TrialInactivity => self.nudge_inactive_trial(uow, &sub, now).await,
                Rule::ChannelCompliance => self.enforce_channel(uow, &sub, now).await,
                Rule::TrafficWarning => self.warn_traffic(uow, &sub, now).await,
                Rule::FollowUp => self.follow_up(uow, &sub, now).await,
            };
            uow.settle_savepoint(ITEM_SAVEPOINT, outcome.is_ok()).await?;
            report.record(format!("subscription {}", sub.id), outcome);
        }
        report.log();
        Ok(report)
    }

    async fn load_user(&self, uow: &mut dyn UnitOfWork, sub: &Subscription) -> CoreResult<UserAccount> {
        uow.user(sub.user_id).await?.ok_or_else(|| {
            CoreError::DataIntegrity(format!(
                "subscription {} references missing user {}",
                sub.id, sub.user_id
            ))
        })
    }

    async fn notify(
        &self,
        uow: &mut dyn UnitOfWork,
        sub: &Subscription,
        kind: NotificationType,
        threshold: i32,
        template: Template,
        now: DateTime<Utc>,
    ) -> CoreResult<ItemOutcome> {
        let key = NotificationKey::new(sub.user_id, sub.id, kind, threshold);
        if self.notifier.already_sent(uow, &key).await? {
            return Ok(ItemOutcome::Skipped);
        }
        let user = self.load_user(uow, sub).await?;
        let delivery = self
            .notifier
            .deliver_and_record(uow, &user, key, &template, now)
            .await?;
        Ok(outcome_of(delivery))
    }

    /// The flip stands on its own; the notice is sent by `notify_expired`.
    async fn expire(&self, uow: &mut dyn UnitOfWork, sub: &Subscription) -> CoreResult<ItemOutcome> {
        let changed = uow
            .set_subscription_status(sub.id, SubscriptionStatus::Active, SubscriptionStatus::Expired)
            .await?;
        if !changed {
            return Ok(ItemOutcome::Skipped);
        }
        info!("Subscription {} of user {} expired", sub.id, sub.user_id);
        Ok(ItemOutcome::Acted)
    }

    /// Retried every tick until the `expired` key is recorded.
    async fn notify_expired(
        &self,
        uow: &mut dyn UnitOfWork,
        sub: &Subscription,
        now: DateTime<Utc>,
    ) -> CoreResult<ItemOutcome> {
        self.notify(uow, sub, NotificationType::Expired, 0, Template::Expired, now)
            .await
    }

    async fn warn_expiring(
        &self,
        uow: &mut dyn UnitOfWork,
        sub: &Subscription,
        now: DateTime<Utc>,
    ) -> CoreResult<ItemOutcome> {
        let Some(threshold) =
            expiring_threshold(&self.config.expiring_thresholds_days, sub.remaining(now))
        else {
            return Ok(ItemOutcome::Skipped);
        };
        if uow
            .notified_since(
                sub.user_id,
                NotificationType::ExpiringSoon,
                now - Duration::hours(EXPIRING_QUIET_HOURS),
            )
            .await?
        {
            debug!(
                "User {} was warned about expiry within the last day, deferring threshold {}",
                sub.user_id, threshold
            );
            return Ok(ItemOutcome::Skipped);
        }

        self.notify(
            uow,
            sub,
            NotificationType::ExpiringSoon,
            threshold,
            Template::ExpiringSoon {
                days: sub.days_until_expiry(now),
            },
            now,
        )
        .await
    }

    async fn warn_trial_ending(
        &self,
        uow: &mut dyn UnitOfWork,
        sub: &Subscription,
        now: DateTime<Utc>,
    ) -> CoreResult<ItemOutcome> {
        let window = self.config.trial_ending_window_hours;
        let remaining = sub.remaining(now);
        if remaining > Duration::hours(window as i64) {
            return Ok(ItemOutcome::Skipped);
        }
        let hours_left = (remaining.num_minutes() + 59) / 60;
        self.notify(
            uow,
            sub,
            NotificationType::TrialExpiringSoon,
            window,
            Template::TrialExpiringSoon {
                hours: hours_left.max(1),
            },
            now,
        )
        .await
    }

    async fn nudge_inactive_trial(
        &self,
        uow: &mut dyn UnitOfWork,
        sub: &Subscription,
        now: DateTime<Utc>,
    ) -> CoreResult<ItemOutcome> {
        let elapsed = now - sub.start_date;
        let Some(hours) = highest_crossed(&self.config.trial_inactivity_hours, |h| {
            elapsed >= Duration::hours(h as i64)
        }) else {
            return Ok(ItemOutcome::Skipped);
        };
        self.notify(
            uow,
            sub,
            NotificationType::TrialInactive,
            hours,
            Template::TrialInactive { hours },
            now,
        )
        .await
    }

    async fn enforce_channel(
        &self,
        uow: &mut dyn UnitOfWork,
        sub: &Subscription,
        now: DateTime<Utc>,
    ) -> CoreResult<ItemOutcome> {
        let Some(membership) = self.membership.as_ref() else {
            return Ok(ItemOutcome::Skipped);
        };
        let unsubscribed_key = NotificationKey::new(
            sub.user_id,
            sub.id,
            NotificationType::TrialChannelUnsubscribed,
            0,
        );

        match sub.status {
            SubscriptionStatus::Active => {
                let user = self.load_user(uow, sub).await?;
                let is_member = bounded(
                    "telegram",
                    self.call_timeout,
                    membership.is_member(user.telegram_id),
                )
                .await?;
                if is_member {
                    return Ok(ItemOutcome::Skipped);
                }

                let changed = uow
                    .set_subscription_status(
                        sub.id,
                        SubscriptionStatus::Active,
                        SubscriptionStatus::Disabled,
                    )
                    .await?;
                if !changed {
                    return Ok(ItemOutcome::Skipped);
                }
                if let Some(uuid) = sub.panel_uuid {
                    bounded("panel", self.call_timeout, self.panel.disable(uuid)).await?;
                }
                info!(
                    "Trial {} of user {} disabled: left the required channel",
                    sub.id, sub.user_id
                );
                let delivery = self
                    .notifier
                    .notify_once(
                        uow,
                        &user,
                        unsubscribed_key,
                        &Template::TrialChannelUnsubscribed,
                        now,
                    )
                    .await?;
                // The record marks the trial as disabled by this rule, text or not.
                if delivery == Delivery::NoTemplate {
                    self.ledger.record(uow, unsubscribed_key, now).await?;
                }
                Ok(ItemOutcome::Acted)
            }
            SubscriptionStatus::Disabled => {
                // Only trials this rule disabled are restored.
                if !self.ledger.exists(uow, &unsubscribed_key).await? {
                    return Ok(ItemOutcome::Skipped);
                }
                if sub.end_date <= now {
                    return Ok(ItemOutcome::Skipped);
                }
                let user = self.load_user(uow, sub).await?;
                let is_member = bounded(
                    "telegram",
                    self.call_timeout,
                    membership.is_member(user.telegram_id),
                )
                .await?;
                if !is_member {
                    return Ok(ItemOutcome::Skipped);
                }

                let changed = uow
                    .set_subscription_status(
                        sub.id,
                        SubscriptionStatus::Disabled,
                        SubscriptionStatus::Active,
                    )
                    .await?;
                if !changed {
                    return Ok(ItemOutcome::Skipped);
                }
                if let Some(uuid) = sub.panel_uuid {
                    bounded("panel", self.call_timeout, self.panel.enable(uuid)).await?;
                }
                self.ledger
                    .apply_reset(uow, ResetRule::ChannelRejoin, sub.user_id, sub.id)
                    .await?;
                info!(
                    "Trial {} of user {} restored: rejoined the required channel",
                    sub.id, sub.user_id
                );
                Ok(ItemOutcome::Acted)
            }
            _ => Ok(ItemOutcome::Skipped),
        }
    }

    async fn warn_traffic(
        &self,
        uow: &mut dyn UnitOfWork,
        sub: &Subscription,
        now: DateTime<Utc>,
    ) -> CoreResult<ItemOutcome> {
        let Some(used) = sub.traffic_used_percent() else {
            return Ok(ItemOutcome::Skipped);
        };
        let Some(percent) =
            highest_crossed(&self.config.traffic_warning_percents, |p| used as i32 >= p)
        else {
            return Ok(ItemOutcome::Skipped);
        };
        self.notify(
            uow,
            sub,
            NotificationType::TrafficWarning,
            percent,
            Template::TrafficWarning { percent },
            now,
        )
        .await
    }

    async fn follow_up(
        &self,
        uow: &mut dyn UnitOfWork,
        sub: &Subscription,
        now: DateTime<Utc>,
    ) -> CoreResult<ItemOutcome> {
        let config = &self.config.followups;
        let Some(stage) = followup_stage(config, now - sub.end_date) else {
            return Ok(ItemOutcome::Skipped);
        };

        let (kind, threshold, offer) = match stage {
            FollowUpStage::Reminder => (NotificationType::ExpiredReminder, config.reminder_day, None),
            FollowUpStage::Wave2 => (
                NotificationType::ExpiredDiscountWave2,
                config.wave2_start_day,
                Some((2, config.wave2_percent, config.wave2_ttl_hours)),
            ),
            FollowUpStage::Wave3 => (
                NotificationType::ExpiredDiscountWave3,
                config.wave3_day,
                Some((3, config.wave3_percent, config.wave3_ttl_hours)),
            ),
        };
        let key = NotificationKey::new(sub.user_id, sub.id, kind, threshold as i32);
        if self.notifier.already_sent(uow, &key).await? {
            return Ok(ItemOutcome::Skipped);
        }

        let user = self.load_user(uow, sub).await?;
        let template = match offer {
            None => Template::ExpiredReminder,
            Some((wave, percent, ttl_hours)) => Template::ExpiredDiscount {
                wave,
                percent,
                valid_hours: ttl_hours,
            },
        };
        if !self.notifier.can_render(&template, &user) {
            debug!("Follow-up {} has no text, skipping", key);
            return Ok(ItemOutcome::Skipped);
        }

        if let Some((_, percent, ttl_hours)) = offer {
            let offer_id = uow
                .insert_discount_offer(&NewDiscountOffer {
                    user_id: sub.user_id,
                    subscription_id: sub.id,
                    notification_type: kind,
                    discount_percent: percent,
                    effect_type: EFFECT_RENEWAL_PERCENT.to_string(),
                    expires_at: now + Duration::hours(ttl_hours),
                })
                .await?;
            debug!("Created discount offer {} ({}%) for user {}", offer_id, percent, sub.user_id);
        }

        let delivery = self
            .notifier
            .deliver_and_record(uow, &user, key, &template, now)
            .await?;
        Ok(outcome_of(delivery))
    }
}

fn outcome_of(delivery: Delivery) -> ItemOutcome {
    match delivery {
        Delivery::Sent | Delivery::Unreachable => ItemOutcome::Acted,
        Delivery::AlreadySent | Delivery::NoTemplate => ItemOutcome::Skipped,
    }
}

#[async_trait]
impl CycleCheck for SubscriptionLifecycleChecker {
    fn name(&self) -> &'static str {
        "lifecycle"
    }

    async fn run(&self, uow: &mut dyn UnitOfWork, now: DateTime<Utc>) -> CoreResult<BatchReport> {
        let mut report = BatchReport::new(self.name());
        for rule in [
            Rule::Expire,
            Rule::ExpiredNotice,
            Rule::ExpiringSoon,
            Rule::TrialEnding,
            Rule::TrialInactivity,
            Rule::ChannelCompliance,
            Rule::TrafficWarning,
            Rule::FollowUp,
        ] {
            report.merge(self.run_rule(uow, rule, now).await?);
        }
        Ok(report)
    }
}
