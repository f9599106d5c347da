//! Transactional repository seam.
//!
//! A [`UnitOfWork`] is one database transaction. Dropping it without calling
//! [`UnitOfWork::commit`] rolls everything back. Savepoints let callers
//! isolate one check or one item so a failure does not poison the rest of
//! the transaction.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::discount::NewDiscountOffer;
use crate::models::monitoring::{LogFilter, MonitoringLogEntry, NewLogEntry, Page};
use crate::models::notification::{NotificationKey, NotificationType};
use crate::models::subscription::{Subscription, SubscriptionStatus};
use crate::models::ticket::Ticket;
use crate::models::user::UserAccount;

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>>;
}

#[async_trait]
pub trait UnitOfWork: Send {
    async fn commit(&mut self) -> Result<()>;
    async fn rollback(&mut self) -> Result<()>;

    async fn savepoint(&mut self, name: &str) -> Result<()>;
    async fn release_savepoint(&mut self, name: &str) -> Result<()>;
    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<()>;

    /// Releases the savepoint when `keep` is true, otherwise rolls back to it.
    async fn settle_savepoint(&mut self, name: &str, keep: bool) -> Result<()> {
        if keep {
            self.release_savepoint(name).await
        } else {
            self.rollback_to_savepoint(name).await
        }
    }

    // --- subscriptions ---

    /// Every ACTIVE row whose `end_date <= now`, current or not.
    async fn active_subscriptions_ended_by(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Subscription>>;

    /// The current (latest by `created_at`) subscription of each user, filtered by status.
    async fn current_subscriptions(
        &mut self,
        status: SubscriptionStatus,
    ) -> Result<Vec<Subscription>>;

    async fn subscription(&mut self, id: i64) -> Result<Option<Subscription>>;

    /// Returns false when the row vanished.
    async fn set_subscription_status(
        &mut self,
        id: i64,
        from: SubscriptionStatus,
        to: SubscriptionStatus,
    ) -> Result<bool>;

    async fn set_subscription_end_date(&mut self, id: i64, end_date: DateTime<Utc>)
    -> Result<bool>;

    async fn reset_subscription_traffic(&mut self, id: i64) -> Result<bool>;

    // --- users & balance ledger ---

    async fn user(&mut self, id: i64) -> Result<Option<UserAccount>>;

    /// Atomic conditional debit: succeeds only when the balance covers `amount`,
    /// and writes the balance transaction in the same statement batch.
    async fn debit(&mut self, user_id: i64, amount: i64, reason: &str) -> Result<bool>;

    async fn credit(&mut self, user_id: i64, amount: i64, reason: &str) -> Result<bool>;

    async fn consume_promo_discount(&mut self, user_id: i64) -> Result<()>;

    // --- notification ledger ---

    async fn notification_exists(&mut self, key: &NotificationKey) -> Result<bool>;

    /// Whether any record of `kind` for this user was sent at or after `since`,
    /// whatever its subscription or threshold.
    async fn notified_since(
        &mut self,
        user_id: i64,
        kind: NotificationType,
        since: DateTime<Utc>,
    ) -> Result<bool>;

    /// Inserts the record; returns false if the key already existed.
    async fn insert_notification(&mut self, key: &NotificationKey, sent_at: DateTime<Utc>)
    -> Result<bool>;

    async fn delete_notifications(
        &mut self,
        user_id: i64,
        subscription_id: i64,
        kind: NotificationType,
    ) -> Result<u64>;

    // --- discount offers ---

    async fn insert_discount_offer(&mut self, offer: &NewDiscountOffer) -> Result<i64>;

    async fn deactivate_expired_offers(&mut self, now: DateTime<Utc>) -> Result<u64>;

    // --- tickets ---

    /// OPEN tickets idle since `stale_before` whose last reminder is unset or
    /// older than `reminder_before`.
    async fn stale_open_tickets(
        &mut self,
        stale_before: DateTime<Utc>,
        reminder_before: DateTime<Utc>,
    ) -> Result<Vec<Ticket>>;

    async fn mark_sla_reminder(&mut self, ticket_id: i64, at: DateTime<Utc>) -> Result<bool>;

    // --- monitoring log ---

    async fn append_log(&mut self, entry: &NewLogEntry) -> Result<()>;

    async fn logs(&mut self, filter: &LogFilter, page: Page) -> Result<Vec<MonitoringLogEntry>>;

    async fn prune_logs(&mut self, older_than: DateTime<Utc>) -> Result<u64>;
}
