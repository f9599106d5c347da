use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, Response, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

const SERVICE: &str = "panel";

/// Full user state pushed to the panel after a renewal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelUserUpdate {
    pub uuid: Uuid,
    pub expire_at: DateTime<Utc>,
    pub traffic_limit_bytes: i64,
    pub active_internal_squads: Vec<String>,
    pub hwid_device_limit: i32,
}

/// Upstream VPN panel that owns the actual client accounts.
#[async_trait]
pub trait VpnPanel: Send + Sync {
    async fn disable(&self, uuid: Uuid) -> CoreResult<()>;
    async fn enable(&self, uuid: Uuid) -> CoreResult<()>;
    async fn update(&self, update: &PanelUserUpdate) -> CoreResult<()>;
    async fn reset_traffic(&self, uuid: Uuid) -> CoreResult<()>;
    /// `Ok(false)` when the panel answered but reported itself unhealthy.
    async fn health_probe(&self) -> CoreResult<bool>;
}

#[derive(Clone)]
pub struct PanelClient {
    client: Client,
    base_url: String,
    auth_token: String,
}

impl PanelClient {
    pub fn new(base_url: &str, auth_token: &str, timeout: Duration) -> CoreResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| CoreError::Configuration(format!("panel http client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token: auth_token.to_string(),
        })
    }

    async fn send(&self, method: Method, path: &str, body: Option<&PanelUserUpdate>) -> CoreResult<Response> {
        let url = format!("{}{}", self.base_url, path);
        debug!("Panel request {} {}", method, url);

        let mut request = self
            .client
            .request(method, &url)
            .bearer_auth(&self.auth_token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CoreError::transient(SERVICE, e.to_string()))?;
        classify_status(response)
    }

    async fn user_action(&self, uuid: Uuid, action: &str) -> CoreResult<()> {
        self.send(
            Method::POST,
            &format!("/api/users/{}/actions/{}", uuid, action),
            None,
        )
        .await
        .map(|_| ())
    }
}

fn classify_status(response: Response) -> CoreResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(CoreError::Configuration(
            format!("panel rejected the API token ({})", status),
        )),
        StatusCode::NOT_FOUND => Err(CoreError::DataIntegrity(format!(
            "panel does not know {}",
            response.url().path()
        ))),
        _ => Err(CoreError::transient(SERVICE, format!("HTTP {}", status))),
    }
}

#[async_trait]
impl VpnPanel for PanelClient {
    async fn disable(&self, uuid: Uuid) -> CoreResult<()> {
        self.user_action(uuid, "disable").await
    }

    async fn enable(&self, uuid: Uuid) -> CoreResult<()> {
        self.user_action(uuid, "enable").await
    }

    async fn update(&self, update: &PanelUserUpdate) -> CoreResult<()> {
        self.send(Method::PATCH, "/api/users", Some(update))
            .await
            .map(|_| ())
    }

    async fn reset_traffic(&self, uuid: Uuid) -> CoreResult<()> {
        self.user_action(uuid, "reset-traffic").await
    }

    async fn health_probe(&self) -> CoreResult<bool> {
        let url = format!("{}/api/system/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.auth_token)
            .send()
            .await
            .map_err(|e| CoreError::transient(SERVICE, e.to_string()))?;
        Ok(response.status().is_success())
    }
}

/// Stand-in used when no panel credentials are configured: mutations succeed
/// locally and the panel is never contacted.
pub struct NoopPanel;

#[async_trait]
impl VpnPanel for NoopPanel {
    async fn disable(&self, uuid: Uuid) -> CoreResult<()> {
        debug!("Panel not configured, skipping disable of {}", uuid);
        Ok(())
    }

    async fn enable(&self, uuid: Uuid) -> CoreResult<()> {
        debug!("Panel not configured, skipping enable of {}", uuid);
        Ok(())
    }

    async fn update(&self, update: &PanelUserUpdate) -> CoreResult<()> {
        debug!("Panel not configured, skipping update of {}", update.uuid);
        Ok(())
    }

    async fn reset_traffic(&self, uuid: Uuid) -> CoreResult<()> {
        debug!("Panel not configured, skipping traffic reset of {}", uuid);
        Ok(())
    }

    async fn health_probe(&self) -> CoreResult<bool> {
        Err(CoreError::Configuration("panel credentials are not configured".to_string()))
    }
}
