//! Wires production collaborators into a [`CycleScheduler`].

use anyhow::{Context, Result};
use sentinel_db::Store;
use sentinel_db::db::init_db;
use sentinel_db::repositories::PgStore;
use std::sync::Arc;
use std::time::Duration;
use teloxide::Bot;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::{ApiState, router};
use crate::clients::{
    ChannelMembership, MaintenanceStore, NoopPanel, NotificationGateway, PanelClient, PlanPricing,
    RedisMaintenanceStore, TelegramGateway, TelegramMembership, VolatileMaintenanceStore, VpnPanel,
};
use crate::config::SchedulerConfig;
use crate::scheduler::{CycleCheck, CycleScheduler, SchedulerDeps};
use crate::services::admin_notifier::AdminNotifier;
use crate::services::autopay::AutopayProcessor;
use crate::services::event_log::EventLog;
use crate::services::health_monitor::HealthMonitor;
use crate::services::housekeeping::Housekeeping;
use crate::services::lifecycle::SubscriptionLifecycleChecker;
use crate::services::maintenance::MaintenanceState;
use crate::services::notification_ledger::{NotificationLedger, NotifiedCache};
use crate::services::notifier::UserNotifier;
use crate::services::ticket_sla::TicketSlaWatcher;
use crate::templates::TemplateRegistry;

async fn maintenance_store(config: &SchedulerConfig) -> Arc<dyn MaintenanceStore> {
    let Some(url) = config.redis_url.as_deref() else {
        warn!("REDIS_URL not set: maintenance state is kept in memory and lost on restart");
        return Arc::new(VolatileMaintenanceStore::default());
    };
    match RedisMaintenanceStore::connect(url, config.health.state_ttl_secs).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!("{:#}: maintenance state is kept in memory and lost on restart", e);
            Arc::new(VolatileMaintenanceStore::default())
        }
    }
}

pub async fn build_scheduler(config: &SchedulerConfig) -> Result<Arc<CycleScheduler>> {
    let pool = init_db(&config.database_url, config.database_max_connections).await?;
    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool.clone()));

    let templates = Arc::new(TemplateRegistry::load(&config.notifications)?);
    let bot = Bot::new(&config.bot_token);
    let gateway: Arc<dyn NotificationGateway> = Arc::new(TelegramGateway::new(bot.clone()));

    let panel: Arc<dyn VpnPanel> = match (&config.panel.base_url, &config.panel.api_token) {
        (Some(url), Some(token)) if config.panel.is_configured() => Arc::new(
            PanelClient::new(url, token, config.panel.timeout())
                .context("Failed to build panel client")?,
        ),
        _ => {
            warn!("PANEL_URL/PANEL_TOKEN not set: panel sync and health monitoring are disabled");
            Arc::new(NoopPanel)
        }
    };

    let membership: Option<Arc<dyn ChannelMembership>> = match config.lifecycle.required_channel_id {
        Some(channel_id) => Some(Arc::new(TelegramMembership::new(bot.clone(), channel_id))),
        None => {
            info!("REQUIRED_CHANNEL_ID not set: channel compliance check disabled");
            None
        }
    };

    let maintenance = Arc::new(
        MaintenanceState::restore(
            maintenance_store(config).await,
            config.health.maintenance_message.clone(),
        )
        .await,
    );

    let cache = Arc::new(NotifiedCache::default());
    let ledger = Arc::new(NotificationLedger::new(cache.clone(), config.reset_policy.clone()));
    let send_timeout = config.notifications.send_timeout();
    let notifier = Arc::new(UserNotifier::new(
        gateway.clone(),
        templates.clone(),
        ledger.clone(),
        send_timeout,
    ));
    let event_log = Arc::new(EventLog::new(store.clone()));
    let admin = Arc::new(AdminNotifier::new(
        gateway,
        templates,
        config.admin.recipients.clone(),
        Duration::from_secs(config.admin.suppression_minutes * 60),
        send_timeout,
    ));

    let pricing = Arc::new(PlanPricing::new(
        pool,
        config.autopay.renewal_days,
        config.autopay.fallback_price,
    ));
    let checks: Vec<Arc<dyn CycleCheck>> = vec![
        Arc::new(SubscriptionLifecycleChecker::new(
            config.lifecycle.clone(),
            notifier.clone(),
            ledger.clone(),
            panel.clone(),
            membership,
            config.panel.timeout(),
        )),
        Arc::new(AutopayProcessor::new(
            config.autopay.clone(),
            pricing,
            notifier,
            ledger,
            panel.clone(),
            config.panel.timeout(),
        )),
        Arc::new(Housekeeping::new(config.event_log.retention_days)),
    ];

    let sla = config.sla.enabled.then(|| {
        Arc::new(TicketSlaWatcher::new(
            store.clone(),
            admin.clone(),
            event_log.clone(),
            config.sla.clone(),
        ))
    });
    let health = (config.health.enabled && config.panel.is_configured()).then(|| {
        Arc::new(HealthMonitor::new(
            panel,
            maintenance.clone(),
            admin.clone(),
            event_log.clone(),
            config.health.clone(),
        ))
    });

    Ok(Arc::new(CycleScheduler::new(SchedulerDeps {
        config: config.cycle.clone(),
        store,
        checks,
        cache,
        event_log,
        admin,
        maintenance,
        sla,
        health,
    })))
}

/// Serves the operator API until `shutdown` fires.
pub async fn serve_api(
    scheduler: Arc<CycleScheduler>,
    listen: &str,
    token: &str,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind operator API on {}", listen))?;
    info!("Operator API listening on {}", listen);

    let app = router(ApiState {
        scheduler,
        token: Arc::from(token),
    });
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("Operator API server failed")
}
