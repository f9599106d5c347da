//! Global maintenance switch.
//!
//! Writers serialize on an async mutex, re-read the persisted blob, and
//! persist the result while holding it, so a toggle written by another
//! process is applied on top of instead of being overwritten. Readers use the
//! atomic mirror and never wait.

use chrono::{DateTime, Utc};
use sentinel_shared::MaintenanceSnapshot;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::clients::MaintenanceStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    Enabled { reason: String },
    Cleared { downtime_minutes: i64 },
}

pub fn apply_success(state: &mut MaintenanceSnapshot, now: DateTime<Utc>) -> Transition {
    state.consecutive_failures = 0;
    state.last_check = Some(now);
    if !(state.is_active && state.auto_enabled) {
        return Transition::Unchanged;
    }

    let downtime_minutes = state
        .enabled_at
        .map(|at| (now - at).num_minutes().max(0))
        .unwrap_or(0);
    state.is_active = false;
    state.auto_enabled = false;
    state.enabled_at = None;
    state.reason = None;
    Transition::Cleared { downtime_minutes }
}

/// Auto-enables only on the failure that reaches `threshold`, never on later ones.
pub fn apply_failure(
    state: &mut MaintenanceSnapshot,
    now: DateTime<Utc>,
    threshold: u32,
    auto_enable: bool,
    detail: &str,
) -> Transition {
    let before = state.consecutive_failures;
    state.consecutive_failures = before.saturating_add(1);
    state.last_check = Some(now);

    let just_reached = before < threshold && state.consecutive_failures == threshold;
    if !(just_reached && !state.is_active && auto_enable) {
        return Transition::Unchanged;
    }

    let reason = format!(
        "Panel API unreachable after {} consecutive failed checks: {}",
        state.consecutive_failures, detail
    );
    state.is_active = true;
    state.auto_enabled = true;
    state.enabled_at = Some(now);
    state.reason = Some(reason.clone());
    Transition::Enabled { reason }
}

pub fn apply_manual(
    state: &mut MaintenanceSnapshot,
    active: bool,
    reason: Option<String>,
    now: DateTime<Utc>,
) {
    state.is_active = active;
    state.auto_enabled = false;
    state.consecutive_failures = 0;
    if active {
        state.enabled_at = Some(now);
        state.reason = Some(reason.unwrap_or_else(|| "Manual maintenance".to_string()));
    } else {
        state.enabled_at = None;
        state.reason = None;
    }
}

pub struct MaintenanceState {
    inner: Mutex<MaintenanceSnapshot>,
    active: AtomicBool,
    store: Arc<dyn MaintenanceStore>,
    message: String,
}

impl MaintenanceState {
    /// Loads the persisted blob; starts inactive when it is missing or unreadable.
    pub async fn restore(store: Arc<dyn MaintenanceStore>, message: String) -> Self {
        let snapshot = match store.load().await {
            Ok(Some(snapshot)) => {
                if snapshot.is_active {
                    warn!(
                        "Maintenance mode restored as ACTIVE: {}",
                        snapshot.reason.as_deref().unwrap_or("no reason")
                    );
                }
                snapshot
            }
            Ok(None) => MaintenanceSnapshot::default(),
            Err(e) => {
                error!("Failed to load maintenance state, starting inactive: {:#}", e);
                MaintenanceSnapshot::default()
            }
        };

        Self {
            active: AtomicBool::new(snapshot.is_active),
            inner: Mutex::new(snapshot),
            store,
            message,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Message to show instead of serving the request, if any.
    pub fn gate(&self, is_operator: bool) -> Option<&str> {
        if self.is_active() && !is_operator {
            Some(self.message())
        } else {
            None
        }
    }

    pub async fn snapshot(&self) -> MaintenanceSnapshot {
        let mut guard = self.inner.lock().await;
        self.refresh(&mut guard).await;
        guard.clone()
    }

    pub async fn record_success(&self, now: DateTime<Utc>) -> Transition {
        self.update(|state| apply_success(state, now)).await
    }

    pub async fn record_failure(
        &self,
        now: DateTime<Utc>,
        threshold: u32,
        auto_enable: bool,
        detail: &str,
    ) -> Transition {
        self.update(|state| apply_failure(state, now, threshold, auto_enable, detail))
            .await
    }

    pub async fn set_manual(
        &self,
        active: bool,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> MaintenanceSnapshot {
        let mut guard = self.inner.lock().await;
        self.refresh(&mut guard).await;
        apply_manual(&mut guard, active, reason, now);
        info!(active, "Maintenance mode set manually");
        self.publish(&guard).await;
        guard.clone()
    }

    async fn update<F>(&self, apply: F) -> Transition
    where
        F: FnOnce(&mut MaintenanceSnapshot) -> Transition,
    {
        let mut guard = self.inner.lock().await;
        self.refresh(&mut guard).await;
        let transition = apply(&mut guard);
        self.publish(&guard).await;
        transition
    }

    /// Adopts the persisted blob. A missing or unreadable blob keeps the local copy.
    async fn refresh(&self, local: &mut MaintenanceSnapshot) {
        match self.store.load().await {
            Ok(Some(stored)) => {
                if stored.is_active != local.is_active {
                    info!(
                        active = stored.is_active,
                        "Maintenance mode changed by another process"
                    );
                }
                self.active.store(stored.is_active, Ordering::Release);
                *local = stored;
            }
            Ok(None) => {}
            Err(e) => warn!("Failed to reload maintenance state, using local copy: {:#}", e),
        }
    }

    async fn publish(&self, snapshot: &MaintenanceSnapshot) {
        self.active.store(snapshot.is_active, Ordering::Release);
        if let Err(e) = self.store.save(snapshot).await {
            error!("Failed to persist maintenance state: {:#}", e);
        }
    }
}
