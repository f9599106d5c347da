use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};

use super::discount_repo::DiscountRepository;
use super::monitoring_repo::MonitoringRepository;
use super::notification_repo::NotificationRepository;
use super::subscription_repo::SubscriptionRepository;
use super::ticket_repo::TicketRepository;
use super::user_repo::UserRepository;
use crate::models::discount::NewDiscountOffer;
use crate::models::monitoring::{LogFilter, MonitoringLogEntry, NewLogEntry, Page};
use crate::models::notification::{NotificationKey, NotificationType};
use crate::models::subscription::{Subscription, SubscriptionStatus};
use crate::models::ticket::Ticket;
use crate::models::user::UserAccount;
use crate::store::{Store, UnitOfWork};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let tx = self
            .pool
            .begin()
            .await
            .context("Failed to open transaction")?;
        Ok(Box::new(PgUnitOfWork { tx: Some(tx) }))
    }
}

/// Postgres transaction. Rolled back by sqlx on drop unless committed.
pub struct PgUnitOfWork {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgUnitOfWork {
    fn conn(&mut self) -> Result<&mut PgConnection> {
        self.tx
            .as_mut()
            .map(|tx| &mut **tx)
            .ok_or_else(|| anyhow!("unit of work already finished"))
    }

    async fn exec_savepoint_sql(&mut self, verb: &str, name: &str) -> Result<()> {
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(anyhow!("invalid savepoint name '{}'", name));
        }
        let sql = format!("{} {}", verb, name);
        sqlx::query(&sql)
            .execute(self.conn()?)
            .await
            .with_context(|| format!("Failed to {} {}", verb.to_lowercase(), name))?;
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn commit(&mut self) -> Result<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| anyhow!("unit of work already finished"))?;
        tx.commit().await.context("Failed to commit transaction")
    }

    async fn rollback(&mut self) -> Result<()> {
        match self.tx.take() {
            Some(tx) => tx.rollback().await.context("Failed to roll back transaction"),
            None => Ok(()),
        }
    }

    async fn savepoint(&mut self, name: &str) -> Result<()> {
        self.exec_savepoint_sql("SAVEPOINT", name).await
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<()> {
        self.exec_savepoint_sql("RELEASE SAVEPOINT", name).await
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<()> {
        self.exec_savepoint_sql("ROLLBACK TO SAVEPOINT", name).await
    }

    async fn active_subscriptions_ended_by(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Subscription>> {
        SubscriptionRepository::active_ended_by(self.conn()?, now).await
    }

    async fn current_subscriptions(
        &mut self,
        status: SubscriptionStatus,
    ) -> Result<Vec<Subscription>> {
        SubscriptionRepository::current_with_status(self.conn()?, status).await
    }

    async fn subscription(&mut self, id: i64) -> Result<Option<Subscription>> {
        SubscriptionRepository::get_by_id(self.conn()?, id).await
    }

    async fn set_subscription_status(
        &mut self,
        id: i64,
        from: SubscriptionStatus,
        to: SubscriptionStatus,
    ) -> Result<bool> {
        SubscriptionRepository::transition_status(self.conn()?, id, from, to).await
    }

    async fn set_subscription_end_date(
        &mut self,
        id: i64,
        end_date: DateTime<Utc>,
    ) -> Result<bool> {
        SubscriptionRepository::update_end_date(self.conn()?, id, end_date).await
    }

    async fn reset_subscription_traffic(&mut self, id: i64) -> Result<bool> {
        SubscriptionRepository::reset_traffic(self.conn()?, id).await
    }

    async fn user(&mut self, id: i64) -> Result<Option<UserAccount>> {
        UserRepository::get_by_id(self.conn()?, id).await
    }

    async fn debit(&mut self, user_id: i64, amount: i64, reason: &str) -> Result<bool> {
        UserRepository::debit(self.conn()?, user_id, amount, reason).await
    }

    async fn credit(&mut self, user_id: i64, amount: i64, reason: &str) -> Result<bool> {
        UserRepository::credit(self.conn()?, user_id, amount, reason).await
    }

    async fn consume_promo_discount(&mut self, user_id: i64) -> Result<()> {
        UserRepository::consume_promo_discount(self.conn()?, user_id).await
    }

    async fn notification_exists(&mut self, key: &NotificationKey) -> Result<bool> {
        NotificationRepository::exists(self.conn()?, key).await
    }

    async fn notified_since(
        &mut self,
        user_id: i64,
        kind: NotificationType,
        since: DateTime<Utc>,
    ) -> Result<bool> {
        NotificationRepository::sent_since(self.conn()?, user_id, kind, since).await
    }

    async fn insert_notification(
        &mut self,
        key: &NotificationKey,
        sent_at: DateTime<Utc>,
    ) -> Result<bool> {
        NotificationRepository::insert(self.conn()?, key, sent_at).await
    }

    async fn delete_notifications(
        &mut self,
        user_id: i64,
        subscription_id: i64,
        kind: NotificationType,
    ) -> Result<u64> {
        NotificationRepository::delete_for(self.conn()?, user_id, subscription_id, kind).await
    }

    async fn insert_discount_offer(&mut self, offer: &NewDiscountOffer) -> Result<i64> {
        DiscountRepository::create(self.conn()?, offer).await
    }

    async fn deactivate_expired_offers(&mut self, now: DateTime<Utc>) -> Result<u64> {
        DiscountRepository::deactivate_expired(self.conn()?, now).await
    }

    async fn stale_open_tickets(
        &mut self,
        stale_before: DateTime<Utc>,
        reminder_before: DateTime<Utc>,
    ) -> Result<Vec<Ticket>> {
        TicketRepository::stale_open(self.conn()?, stale_before, reminder_before).await
    }

    async fn mark_sla_reminder(&mut self, ticket_id: i64, at: DateTime<Utc>) -> Result<bool> {
        TicketRepository::mark_sla_reminder(self.conn()?, ticket_id, at).await
    }

    async fn append_log(&mut self, entry: &NewLogEntry) -> Result<()> {
        MonitoringRepository::append(self.conn()?, entry).await
    }

    async fn logs(&mut self, filter: &LogFilter, page: Page) -> Result<Vec<MonitoringLogEntry>> {
        MonitoringRepository::list(self.conn()?, filter, page).await
    }

    async fn prune_logs(&mut self, older_than: DateTime<Utc>) -> Result<u64> {
        MonitoringRepository::prune(self.conn()?, older_than).await
    }
}
