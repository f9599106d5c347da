//! In-memory `Store`. A unit of work edits a private copy of the state and
//! publishes it on commit; savepoints are stacked copies.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sentinel_db::models::discount::{DiscountOffer, NewDiscountOffer};
use sentinel_db::models::monitoring::{LogFilter, MonitoringLogEntry, NewLogEntry, Page};
use sentinel_db::models::notification::{NotificationKey, NotificationRecord, NotificationType};
use sentinel_db::models::subscription::{Subscription, SubscriptionStatus};
use sentinel_db::models::ticket::{Ticket, TicketStatus};
use sentinel_db::models::user::{BalanceTransaction, UserAccount};
use sentinel_db::{Store, UnitOfWork};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
pub struct State {
    pub users: BTreeMap<i64, UserAccount>,
    pub subscriptions: BTreeMap<i64, Subscription>,
    pub notifications: Vec<NotificationRecord>,
    pub offers: Vec<DiscountOffer>,
    pub transactions: Vec<BalanceTransaction>,
    pub tickets: BTreeMap<i64, Ticket>,
    pub logs: Vec<MonitoringLogEntry>,
    next_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn records_of(&self, kind: NotificationType) -> Vec<&NotificationRecord> {
        self.notifications
            .iter()
            .filter(|r| r.notification_type == kind)
            .collect()
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    failing_begins: AtomicU32,
    pub begins: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> State {
        self.state.lock().unwrap().clone()
    }

    pub fn edit(&self, f: impl FnOnce(&mut State)) {
        f(&mut self.state.lock().unwrap());
    }

    pub fn insert_user(&self, user: UserAccount) {
        self.edit(|s| {
            s.users.insert(user.id, user);
        });
    }

    pub fn insert_subscription(&self, sub: Subscription) {
        self.edit(|s| {
            s.subscriptions.insert(sub.id, sub);
        });
    }

    pub fn insert_ticket(&self, ticket: Ticket) {
        self.edit(|s| {
            s.tickets.insert(ticket.id, ticket);
        });
    }

    pub fn subscription(&self, id: i64) -> Subscription {
        self.snapshot().subscriptions[&id].clone()
    }

    pub fn user(&self, id: i64) -> UserAccount {
        self.snapshot().users[&id].clone()
    }

    /// The next `n` calls to `begin` fail.
    pub fn fail_next_begins(&self, n: u32) {
        self.failing_begins.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_begins.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_begins.store(failing - 1, Ordering::SeqCst);
            return Err(anyhow!("connection refused"));
        }
        let working = self.state.lock().unwrap().clone();
        Ok(Box::new(MemoryUow {
            shared: self.state.clone(),
            working,
            savepoints: Vec::new(),
            finished: false,
        }))
    }
}

pub struct MemoryUow {
    shared: Arc<Mutex<State>>,
    working: State,
    savepoints: Vec<(String, State)>,
    finished: bool,
}

impl MemoryUow {
    fn state(&mut self) -> Result<&mut State> {
        if self.finished {
            return Err(anyhow!("unit of work already finished"));
        }
        Ok(&mut self.working)
    }

    fn position(&self, name: &str) -> Result<usize> {
        self.savepoints
            .iter()
            .rposition(|(n, _)| n == name)
            .ok_or_else(|| anyhow!("savepoint {} does not exist", name))
    }
}

fn current_of(state: &State) -> Vec<Subscription> {
    let mut latest: BTreeMap<i64, &Subscription> = BTreeMap::new();
    for sub in state.subscriptions.values() {
        let newer = match latest.get(&sub.user_id) {
            Some(existing) => (sub.created_at, sub.id) > (existing.created_at, existing.id),
            None => true,
        };
        if newer {
            latest.insert(sub.user_id, sub);
        }
    }
    let mut subs: Vec<Subscription> = latest.into_values().cloned().collect();
    subs.sort_by_key(|s| s.id);
    subs
}

#[async_trait]
impl UnitOfWork for MemoryUow {
    async fn commit(&mut self) -> Result<()> {
        let state = self.state()?.clone();
        *self.shared.lock().unwrap() = state;
        self.finished = true;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }

    async fn savepoint(&mut self, name: &str) -> Result<()> {
        let state = self.state()?.clone();
        self.savepoints.push((name.to_string(), state));
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<()> {
        let pos = self.position(name)?;
        self.savepoints.truncate(pos);
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<()> {
        let pos = self.position(name)?;
        self.savepoints.truncate(pos + 1);
        self.working = self.savepoints[pos].1.clone();
        Ok(())
    }

    async fn active_subscriptions_ended_by(&mut self, now: DateTime<Utc>) -> Result<Vec<Subscription>> {
        Ok(self
            .state()?
            .subscriptions
            .values()
            .filter(|s| s.status == SubscriptionStatus::Active && s.end_date <= now)
            .cloned()
            .collect())
    }

    async fn current_subscriptions(&mut self, status: SubscriptionStatus) -> Result<Vec<Subscription>> {
        Ok(current_of(self.state()?)
            .into_iter()
            .filter(|s| s.status == status)
            .collect())
    }

    async fn subscription(&mut self, id: i64) -> Result<Option<Subscription>> {
        Ok(self.state()?.subscriptions.get(&id).cloned())
    }

    async fn set_subscription_status(
        &mut self,
        id: i64,
        from: SubscriptionStatus,
        to: SubscriptionStatus,
    ) -> Result<bool> {
        match self.state()?.subscriptions.get_mut(&id) {
            Some(sub) if sub.status == from => {
                sub.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_subscription_end_date(&mut self, id: i64, end_date: DateTime<Utc>) -> Result<bool> {
        match self.state()?.subscriptions.get_mut(&id) {
            Some(sub) => {
                sub.end_date = end_date;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn reset_subscription_traffic(&mut self, id: i64) -> Result<bool> {
        match self.state()?.subscriptions.get_mut(&id) {
            Some(sub) => {
                sub.traffic_used_bytes = 0;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn user(&mut self, id: i64) -> Result<Option<UserAccount>> {
        Ok(self.state()?.users.get(&id).cloned())
    }

    async fn debit(&mut self, user_id: i64, amount: i64, reason: &str) -> Result<bool> {
        let state = self.state()?;
        let Some(user) = state.users.get_mut(&user_id) else {
            return Ok(false);
        };
        if user.balance < amount {
            return Ok(false);
        }
        user.balance -= amount;
        let id = state.next_id();
        state.transactions.push(BalanceTransaction {
            id,
            user_id,
            amount: -amount,
            reason: reason.to_string(),
            created_at: Utc::now(),
        });
        Ok(true)
    }

    async fn credit(&mut self, user_id: i64, amount: i64, reason: &str) -> Result<bool> {
        let state = self.state()?;
        let Some(user) = state.users.get_mut(&user_id) else {
            return Ok(false);
        };
        user.balance += amount;
        let id = state.next_id();
        state.transactions.push(BalanceTransaction {
            id,
            user_id,
            amount,
            reason: reason.to_string(),
            created_at: Utc::now(),
        });
        Ok(true)
    }

    async fn consume_promo_discount(&mut self, user_id: i64) -> Result<()> {
        if let Some(user) = self.state()?.users.get_mut(&user_id) {
            user.promo_discount_percent = 0;
            user.promo_discount_expires_at = None;
        }
        Ok(())
    }

    async fn notification_exists(&mut self, key: &NotificationKey) -> Result<bool> {
        Ok(self.state()?.notifications.iter().any(|r| r.key() == *key))
    }

    async fn notified_since(
        &mut self,
        user_id: i64,
        kind: NotificationType,
        since: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self
            .state()?
            .notifications
            .iter()
            .any(|r| r.user_id == user_id && r.notification_type == kind && r.sent_at >= since))
    }

    async fn insert_notification(&mut self, key: &NotificationKey, sent_at: DateTime<Utc>) -> Result<bool> {
        let state = self.state()?;
        if state.notifications.iter().any(|r| r.key() == *key) {
            return Ok(false);
        }
        let id = state.next_id();
        state.notifications.push(NotificationRecord {
            id,
            user_id: key.user_id,
            subscription_id: key.subscription_id,
            notification_type: key.kind,
            threshold: key.threshold,
            sent_at,
        });
        Ok(true)
    }

    async fn delete_notifications(
        &mut self,
        user_id: i64,
        subscription_id: i64,
        kind: NotificationType,
    ) -> Result<u64> {
        let state = self.state()?;
        let before = state.notifications.len();
        state.notifications.retain(|r| {
            !(r.user_id == user_id && r.subscription_id == subscription_id && r.notification_type == kind)
        });
        Ok((before - state.notifications.len()) as u64)
    }

    async fn insert_discount_offer(&mut self, offer: &NewDiscountOffer) -> Result<i64> {
        let state = self.state()?;
        let id = state.next_id();
        state.offers.push(DiscountOffer {
            id,
            user_id: offer.user_id,
            subscription_id: offer.subscription_id,
            notification_type: offer.notification_type,
            discount_percent: offer.discount_percent,
            effect_type: offer.effect_type.clone(),
            expires_at: offer.expires_at,
            is_active: true,
            claimed_at: None,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn deactivate_expired_offers(&mut self, now: DateTime<Utc>) -> Result<u64> {
        let mut count = 0;
        for offer in self.state()?.offers.iter_mut() {
            if offer.is_active && offer.claimed_at.is_none() && offer.expires_at <= now {
                offer.is_active = false;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn stale_open_tickets(
        &mut self,
        stale_before: DateTime<Utc>,
        reminder_before: DateTime<Utc>,
    ) -> Result<Vec<Ticket>> {
        Ok(self
            .state()?
            .tickets
            .values()
            .filter(|t| {
                t.status == TicketStatus::Open
                    && t.updated_at <= stale_before
                    && t.last_sla_reminder_at.is_none_or(|at| at <= reminder_before)
            })
            .cloned()
            .collect())
    }

    async fn mark_sla_reminder(&mut self, ticket_id: i64, at: DateTime<Utc>) -> Result<bool> {
        match self.state()?.tickets.get_mut(&ticket_id) {
            Some(ticket) => {
                ticket.last_sla_reminder_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn append_log(&mut self, entry: &NewLogEntry) -> Result<()> {
        let state = self.state()?;
        let id = state.next_id();
        state.logs.push(MonitoringLogEntry {
            id,
            event_type: entry.event_type.clone(),
            message: entry.message.clone(),
            payload: entry.payload.clone(),
            success: entry.success,
            created_at: entry.created_at,
        });
        Ok(())
    }

    async fn logs(&mut self, filter: &LogFilter, page: Page) -> Result<Vec<MonitoringLogEntry>> {
        let mut logs: Vec<MonitoringLogEntry> = self
            .state()?
            .logs
            .iter()
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect();
        logs.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(logs
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .collect())
    }

    async fn prune_logs(&mut self, older_than: DateTime<Utc>) -> Result<u64> {
        let state = self.state()?;
        let before = state.logs.len();
        state.logs.retain(|entry| entry.created_at >= older_than);
        Ok((before - state.logs.len()) as u64)
    }
}
