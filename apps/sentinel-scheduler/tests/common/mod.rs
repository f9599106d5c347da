#![allow(dead_code)]

pub mod fakes;
pub mod memory_store;

use chrono::{DateTime, Duration, TimeZone, Utc};
use sentinel_db::Store;
use sentinel_db::models::subscription::{Subscription, SubscriptionStatus};
use sentinel_db::models::ticket::{Ticket, TicketStatus};
use sentinel_db::models::user::UserAccount;
use sentinel_scheduler::clients::{ChannelMembership, VolatileMaintenanceStore};
use sentinel_scheduler::config::SchedulerConfig;
use sentinel_scheduler::report::BatchReport;
use sentinel_scheduler::services::admin_notifier::AdminNotifier;
use sentinel_scheduler::services::autopay::AutopayProcessor;
use sentinel_scheduler::services::event_log::EventLog;
use sentinel_scheduler::services::health_monitor::HealthMonitor;
use sentinel_scheduler::services::housekeeping::Housekeeping;
use sentinel_scheduler::services::lifecycle::SubscriptionLifecycleChecker;
use sentinel_scheduler::services::maintenance::MaintenanceState;
use sentinel_scheduler::services::notification_ledger::{NotificationLedger, NotifiedCache};
use sentinel_scheduler::services::notifier::UserNotifier;
use sentinel_scheduler::services::ticket_sla::TicketSlaWatcher;
use sentinel_scheduler::templates::TemplateRegistry;
use sentinel_scheduler::{CycleCheck, CycleScheduler, SchedulerDeps};
use std::sync::Arc;
use uuid::Uuid;

pub use fakes::{FakeGateway, FakeMembership, FakePanel, FixedPricing, PanelCall};
pub use memory_store::MemoryStore;

pub const ADMIN: i64 = 900_001;
pub const CHANNEL: i64 = -100_123;

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

pub fn user(id: i64, balance: i64) -> UserAccount {
    UserAccount {
        id,
        telegram_id: 10_000 + id,
        username: Some(format!("user{}", id)),
        language_code: Some("en".to_string()),
        balance,
        promo_discount_percent: 0,
        promo_discount_expires_at: None,
    }
}

/// Paid, active, panel-provisioned, ending at `end_date`.
pub fn subscription(id: i64, user_id: i64, end_date: DateTime<Utc>) -> Subscription {
    Subscription {
        id,
        user_id,
        plan_id: Some(1),
        panel_uuid: Some(Uuid::from_u128(id as u128)),
        status: SubscriptionStatus::Active,
        is_trial: false,
        start_date: end_date - Duration::days(30),
        end_date,
        traffic_limit_bytes: 100 * 1024 * 1024 * 1024,
        traffic_used_bytes: 1024,
        device_limit: 3,
        squads: vec!["default".to_string()],
        autopay_enabled: false,
        autopay_days_before: 1,
        created_at: end_date - Duration::days(30),
    }
}

pub fn trial(id: i64, user_id: i64, start_date: DateTime<Utc>) -> Subscription {
    Subscription {
        is_trial: true,
        start_date,
        created_at: start_date,
        end_date: start_date + Duration::days(3),
        traffic_used_bytes: 4096,
        ..subscription(id, user_id, start_date + Duration::days(3))
    }
}

pub fn ticket(id: i64, updated_at: DateTime<Utc>) -> Ticket {
    Ticket {
        id,
        user_id: 1,
        subject: Some("Cannot connect".to_string()),
        status: TicketStatus::Open,
        updated_at,
        last_sla_reminder_at: None,
    }
}

pub fn test_config() -> SchedulerConfig {
    let mut config = SchedulerConfig::default();
    config.bot_token = "test-token".to_string();
    config.admin.recipients = vec![ADMIN];
    config.health.attempts = 1;
    config.health.retry_pause_secs = 0;
    config.health.timeout_secs = 1;
    config.lifecycle.required_channel_id = Some(CHANNEL);
    config.autopay.fallback_price = Some(50_000);
    config
}

/// Every collaborator of the scheduler, wired against in-memory fakes.
pub struct World {
    pub config: SchedulerConfig,
    pub store: Arc<MemoryStore>,
    pub panel: Arc<FakePanel>,
    pub gateway: Arc<FakeGateway>,
    pub membership: Arc<FakeMembership>,
    pub cache: Arc<NotifiedCache>,
    pub ledger: Arc<NotificationLedger>,
    pub notifier: Arc<UserNotifier>,
    pub templates: Arc<TemplateRegistry>,
    pub event_log: Arc<EventLog>,
    pub admin: Arc<AdminNotifier>,
    pub maintenance: Arc<MaintenanceState>,
}

impl World {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: SchedulerConfig) -> Self {
        Self::with_templates(config, TemplateRegistry::builtin("en", None)).await
    }

    pub async fn with_templates(config: SchedulerConfig, templates: TemplateRegistry) -> Self {
        let store = Arc::new(MemoryStore::new());
        let panel = Arc::new(FakePanel::default());
        let gateway = Arc::new(FakeGateway::default());
        let membership = Arc::new(FakeMembership::default());
        let templates = Arc::new(templates);

        let cache = Arc::new(NotifiedCache::default());
        let ledger = Arc::new(NotificationLedger::new(
            cache.clone(),
            config.reset_policy.clone(),
        ));
        let send_timeout = config.notifications.send_timeout();
        let notifier = Arc::new(UserNotifier::new(
            gateway.clone(),
            templates.clone(),
            ledger.clone(),
            send_timeout,
        ));
        let event_log = Arc::new(EventLog::new(store.clone()));
        let admin = Arc::new(AdminNotifier::new(
            gateway.clone(),
            templates.clone(),
            config.admin.recipients.clone(),
            std::time::Duration::from_secs(config.admin.suppression_minutes * 60),
            send_timeout,
        ));
        let maintenance = Arc::new(
            MaintenanceState::restore(
                Arc::new(VolatileMaintenanceStore::default()),
                config.health.maintenance_message.clone(),
            )
            .await,
        );

        Self {
            config,
            store,
            panel,
            gateway,
            membership,
            cache,
            ledger,
            notifier,
            templates,
            event_log,
            admin,
            maintenance,
        }
    }

    pub fn lifecycle(&self) -> SubscriptionLifecycleChecker {
        let membership: Option<Arc<dyn ChannelMembership>> =
            match self.config.lifecycle.required_channel_id {
                Some(_) => Some(self.membership.clone()),
                None => None,
            };
        SubscriptionLifecycleChecker::new(
            self.config.lifecycle.clone(),
            self.notifier.clone(),
            self.ledger.clone(),
            self.panel.clone(),
            membership,
            std::time::Duration::from_secs(1),
        )
    }

    pub fn autopay(&self, price: i64) -> AutopayProcessor {
        AutopayProcessor::new(
            self.config.autopay.clone(),
            Arc::new(FixedPricing(price)),
            self.notifier.clone(),
            self.ledger.clone(),
            self.panel.clone(),
            std::time::Duration::from_secs(1),
        )
    }

    pub fn health(&self) -> HealthMonitor {
        HealthMonitor::new(
            self.panel.clone(),
            self.maintenance.clone(),
            self.admin.clone(),
            self.event_log.clone(),
            self.config.health.clone(),
        )
    }

    pub fn sla(&self) -> TicketSlaWatcher {
        TicketSlaWatcher::new(
            self.store.clone(),
            self.admin.clone(),
            self.event_log.clone(),
            self.config.sla.clone(),
        )
    }

    /// Runs one check in its own committed unit of work.
    pub async fn run_check(&self, check: &dyn CycleCheck, now: DateTime<Utc>) -> BatchReport {
        let mut uow = self.store.begin().await.unwrap();
        let report = check.run(uow.as_mut(), now).await.unwrap();
        uow.commit().await.unwrap();
        report
    }

    pub fn deps(&self, checks: Vec<Arc<dyn CycleCheck>>) -> SchedulerDeps {
        let store: Arc<dyn Store> = self.store.clone();
        SchedulerDeps {
            config: self.config.cycle.clone(),
            store,
            checks,
            cache: self.cache.clone(),
            event_log: self.event_log.clone(),
            admin: self.admin.clone(),
            maintenance: self.maintenance.clone(),
            sla: Some(Arc::new(self.sla())),
            health: Some(Arc::new(self.health())),
        }
    }

    pub fn scheduler_with(&self, checks: Vec<Arc<dyn CycleCheck>>) -> Arc<CycleScheduler> {
        Arc::new(CycleScheduler::new(self.deps(checks)))
    }

    pub fn scheduler(&self) -> Arc<CycleScheduler> {
        self.scheduler_with(vec![
            Arc::new(self.lifecycle()),
            Arc::new(self.autopay(50_000)),
            Arc::new(Housekeeping::new(self.config.event_log.retention_days)),
        ])
    }
}
