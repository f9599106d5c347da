//! Persisted "already notified" records plus their in-process cache.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sentinel_db::UnitOfWork;
use sentinel_db::models::notification::{NotificationKey, NotificationType};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use crate::config::ResetPolicyConfig;

/// Keys known to be recorded and recipients known to be unreachable.
/// Cleared by the main loop once per hour; the database stays authoritative.
#[derive(Default)]
pub struct NotifiedCache {
    keys: Mutex<HashSet<NotificationKey>>,
    unreachable: Mutex<HashSet<i64>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl NotifiedCache {
    pub fn contains(&self, key: &NotificationKey) -> bool {
        locked(&self.keys).contains(key)
    }

    pub fn insert(&self, key: NotificationKey) {
        locked(&self.keys).insert(key);
    }

    pub fn forget(&self, user_id: i64, subscription_id: i64, kind: NotificationType) {
        locked(&self.keys).retain(|key| {
            !(key.user_id == user_id && key.subscription_id == subscription_id && key.kind == kind)
        });
    }

    pub fn mark_unreachable(&self, telegram_id: i64) {
        locked(&self.unreachable).insert(telegram_id);
    }

    pub fn is_unreachable(&self, telegram_id: i64) -> bool {
        locked(&self.unreachable).contains(&telegram_id)
    }

    pub fn clear(&self) {
        let keys = {
            let mut keys = locked(&self.keys);
            let len = keys.len();
            keys.clear();
            len
        };
        let unreachable = {
            let mut set = locked(&self.unreachable);
            let len = set.len();
            set.clear();
            len
        };
        debug!(keys, unreachable, "Notified cache cleared");
    }
}

/// Named rule that clears previously recorded keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetRule {
    ChannelRejoin,
    Renewal,
}

pub struct NotificationLedger {
    cache: Arc<NotifiedCache>,
    policy: ResetPolicyConfig,
}

impl NotificationLedger {
    pub fn new(cache: Arc<NotifiedCache>, policy: ResetPolicyConfig) -> Self {
        Self { cache, policy }
    }

    pub fn cache(&self) -> &Arc<NotifiedCache> {
        &self.cache
    }

    pub async fn exists(&self, uow: &mut dyn UnitOfWork, key: &NotificationKey) -> Result<bool> {
        if self.cache.contains(key) {
            return Ok(true);
        }
        let exists = uow.notification_exists(key).await?;
        if exists {
            self.cache.insert(*key);
        }
        Ok(exists)
    }

    /// Returns false when the key was already recorded.
    pub async fn record(
        &self,
        uow: &mut dyn UnitOfWork,
        key: NotificationKey,
        sent_at: DateTime<Utc>,
    ) -> Result<bool> {
        let inserted = uow.insert_notification(&key, sent_at).await?;
        self.cache.insert(key);
        Ok(inserted)
    }

    pub fn kinds_cleared_by(&self, rule: ResetRule) -> &[NotificationType] {
        match rule {
            ResetRule::ChannelRejoin => &self.policy.channel_rejoin,
            ResetRule::Renewal => &self.policy.renewal,
        }
    }

    /// Deletes every key of the kinds named by `rule` for this subscription.
    pub async fn apply_reset(
        &self,
        uow: &mut dyn UnitOfWork,
        rule: ResetRule,
        user_id: i64,
        subscription_id: i64,
    ) -> Result<u64> {
        let mut removed = 0;
        for kind in self.kinds_cleared_by(rule) {
            removed += uow
                .delete_notifications(user_id, subscription_id, *kind)
                .await?;
            self.cache.forget(user_id, subscription_id, *kind);
        }
        debug!(?rule, user_id, subscription_id, removed, "Notification reset applied");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forget_only_touches_matching_kind() {
        let cache = NotifiedCache::default();
        let warned = NotificationKey::new(1, 10, NotificationType::ExpiringSoon, 3);
        let traffic = NotificationKey::new(1, 10, NotificationType::TrafficWarning, 80);
        cache.insert(warned);
        cache.insert(traffic);
        cache.forget(1, 10, NotificationType::ExpiringSoon);
        assert!(!cache.contains(&warned));
        assert!(cache.contains(&traffic));
    }

    #[test]
    fn clear_drops_unreachable_recipients() {
        let cache = NotifiedCache::default();
        cache.mark_unreachable(555);
        assert!(cache.is_unreachable(555));
        cache.clear();
        assert!(!cache.is_unreachable(555));
    }
}
