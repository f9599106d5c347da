use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use sentinel_shared::MaintenanceSnapshot;
use std::sync::Mutex;
use tracing::info;

pub const MAINTENANCE_KEY: &str = "sentinel:maintenance_state";

/// TTL-cached persistence for the maintenance blob.
#[async_trait]
pub trait MaintenanceStore: Send + Sync {
    async fn load(&self) -> Result<Option<MaintenanceSnapshot>>;
    async fn save(&self, snapshot: &MaintenanceSnapshot) -> Result<()>;
}

#[derive(Clone)]
pub struct RedisMaintenanceStore {
    conn: ConnectionManager,
    key: String,
    ttl_secs: u64,
}

impl RedisMaintenanceStore {
    pub async fn connect(redis_url: &str, ttl_secs: u64) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Invalid REDIS_URL")?;
        let conn = client
            .get_connection_manager()
            .await
            .context("Failed to connect to Redis")?;
        info!("Redis connected, maintenance state key {}", MAINTENANCE_KEY);
        Ok(Self {
            conn,
            key: MAINTENANCE_KEY.to_string(),
            ttl_secs,
        })
    }
}

#[async_trait]
impl MaintenanceStore for RedisMaintenanceStore {
    async fn load(&self) -> Result<Option<MaintenanceSnapshot>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(&self.key)
            .query_async(&mut conn)
            .await
            .context("Redis GET failed")?;
        raw.map(|raw| MaintenanceSnapshot::from_json(&raw).context("Corrupt maintenance blob"))
            .transpose()
    }

    async fn save(&self, snapshot: &MaintenanceSnapshot) -> Result<()> {
        let raw = snapshot.to_json().context("Failed to encode maintenance blob")?;
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SETEX")
            .arg(&self.key)
            .arg(self.ttl_secs)
            .arg(raw)
            .query_async(&mut conn)
            .await
            .context("Redis SETEX failed")?;
        Ok(())
    }
}

/// Process-local store used when Redis is not configured. State does not
/// survive a restart.
#[derive(Default)]
pub struct VolatileMaintenanceStore {
    snapshot: Mutex<Option<MaintenanceSnapshot>>,
}

#[async_trait]
impl MaintenanceStore for VolatileMaintenanceStore {
    async fn load(&self) -> Result<Option<MaintenanceSnapshot>> {
        let guard = self
            .snapshot
            .lock()
            .map_err(|_| anyhow::anyhow!("maintenance store lock poisoned"))?;
        Ok(guard.clone())
    }

    async fn save(&self, snapshot: &MaintenanceSnapshot) -> Result<()> {
        let mut guard = self
            .snapshot
            .lock()
            .map_err(|_| anyhow::anyhow!("maintenance store lock poisoned"))?;
        *guard = Some(snapshot.clone());
        Ok(())
    }
}
