//! # Platform HTTP Client
//!
//! JSON-over-HTTPS implementation of [`PlatformApi`]. Every request
//! carries the wire organization id and device id; every failure is
//! classified into the core error taxonomy before it leaves this module,
//! so callers never see a raw transport error.

use crate::config::PlatformConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kiosk_core::{
    AuthStatus, AuthorizationGrantRequest, ConnectionGrant, CreatedOrder, KioskError,
    KioskResult, OrderRequest, PlatformApi, PollOutcome,
};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// HTTP client for the payment platform backend.
pub struct PlatformClient {
    config: PlatformConfig,
    client: Client,
}

impl PlatformClient {
    /// Create a new platform client.
    pub fn new(config: PlatformConfig) -> KioskResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| KioskError::Configuration(format!("HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    /// Create from environment variables.
    pub fn from_env() -> KioskResult<Self> {
        Self::new(PlatformConfig::from_env()?)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn device_params(&self) -> [(&'static str, String); 2] {
        [
            ("organization_id", self.config.wire_organization_id()),
            ("device_id", self.config.device_id.clone()),
        ]
    }

    fn device_body(&self) -> DeviceIdentity {
        DeviceIdentity {
            organization_id: self.config.wire_organization_id(),
            device_id: self.config.device_id.clone(),
        }
    }
}

/// Map a non-success response into the error taxonomy:
/// 401/403 → `Unauthorized`, 5xx → `Server`, other 4xx → `Client`.
async fn classify_failure(response: reqwest::Response) -> KioskError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    classify_parts(status, &body)
}

fn classify_parts(status: StatusCode, body: &str) -> KioskError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message.or(b.error))
        .unwrap_or_else(|| format!("HTTP {}", status));

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => KioskError::Unauthorized(message),
        s if s.is_server_error() => KioskError::Server {
            status: s.as_u16(),
            message,
        },
        s => KioskError::Client {
            status: s.as_u16(),
            message,
        },
    }
}

fn network_error(e: reqwest::Error) -> KioskError {
    KioskError::Network(e.to_string())
}

#[async_trait]
impl PlatformApi for PlatformClient {
    #[instrument(skip(self))]
    async fn request_authorization(&self) -> KioskResult<AuthorizationGrantRequest> {
        let response = self
            .client
            .post(self.url("/v1/connect/authorize"))
            .json(&self.device_body())
            .send()
            .await
            .map_err(network_error)?;

        if !response.status().is_success() {
            return Err(classify_failure(response).await);
        }

        let body: AuthorizeBody = response.json().await.map_err(|e| {
            KioskError::Serialization(format!("authorize response: {}", e))
        })?;
        info!("Issued authorization URL");
        Ok(AuthorizationGrantRequest {
            authorization_url: body.authorization_url,
            correlation_state: body.state,
        })
    }

    #[instrument(skip(self, correlation_state))]
    async fn poll_authorization(&self, correlation_state: &str) -> KioskResult<PollOutcome> {
        let mut params = self.device_params().to_vec();
        params.push(("state", correlation_state.to_string()));

        let response = self
            .client
            .get(self.url("/v1/connect/poll"))
            .query(&params)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        let text = response.text().await.map_err(network_error)?;
        let body: PollBody = serde_json::from_str(&text).unwrap_or_default();

        // The backend rejects stale correlation state with a 4xx carrying
        // an invalid_state discriminant.
        if body.error.as_deref() == Some("invalid_state") {
            return Err(KioskError::InvalidCorrelationState);
        }
        if !status.is_success() {
            return Err(classify_parts(status, &text));
        }

        if let Some(grant) = body.grant() {
            debug!("Authorization poll complete");
            return Ok(PollOutcome::Complete(grant));
        }
        match body.status.as_deref() {
            Some("location_selection_required") => Ok(PollOutcome::LocationSelectionPending),
            // "authorization_in_progress" and any unrecognized shape both
            // mean keep polling.
            _ => Ok(PollOutcome::InProgress),
        }
    }

    #[instrument(skip(self))]
    async fn check_status(&self) -> KioskResult<AuthStatus> {
        let response = self
            .client
            .get(self.url("/v1/connect/status"))
            .query(&self.device_params())
            .send()
            .await
            .map_err(network_error)?;

        if !response.status().is_success() {
            return Err(classify_failure(response).await);
        }

        let body: StatusBody = response
            .json()
            .await
            .map_err(|e| KioskError::Serialization(format!("status response: {}", e)))?;

        if !body.connected {
            debug!("Backend reports device not connected");
            return Ok(AuthStatus::NotConnected);
        }
        match body.grant() {
            Some(grant) => Ok(AuthStatus::Connected(grant)),
            None => Err(KioskError::Serialization(
                "connected status without token bundle".to_string(),
            )),
        }
    }

    #[instrument(skip(self, refresh_token))]
    async fn refresh(&self, refresh_token: &str) -> KioskResult<ConnectionGrant> {
        let response = self
            .client
            .post(self.url("/v1/connect/refresh"))
            .json(&RefreshBody {
                identity: self.device_body(),
                refresh_token: refresh_token.to_string(),
            })
            .send()
            .await
            .map_err(network_error)?;

        if !response.status().is_success() {
            return Err(classify_failure(response).await);
        }

        let body: StatusBody = response
            .json()
            .await
            .map_err(|e| KioskError::Serialization(format!("refresh response: {}", e)))?;
        body.grant().ok_or_else(|| {
            KioskError::Serialization("refresh response without token bundle".to_string())
        })
    }

    #[instrument(skip(self))]
    async fn disconnect(&self) -> KioskResult<()> {
        let response = self
            .client
            .post(self.url("/v1/connect/disconnect"))
            .json(&self.device_body())
            .send()
            .await
            .map_err(network_error)?;

        if !response.status().is_success() {
            return Err(classify_failure(response).await);
        }
        info!("Disconnected device from platform");
        Ok(())
    }

    async fn probe_health(&self) -> bool {
        let result = self
            .client
            .get(self.url("/health"))
            .timeout(Duration::from_secs(self.config.health_timeout_secs))
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!("Health probe answered HTTP {}", response.status());
                false
            }
            Err(e) => {
                warn!("Health probe failed: {}", e);
                false
            }
        }
    }

    #[instrument(skip(self, request), fields(amount_minor = request.amount_minor))]
    async fn create_order(&self, request: OrderRequest) -> KioskResult<CreatedOrder> {
        let response = self
            .client
            .post(self.url("/v1/orders"))
            .timeout(Duration::from_secs(self.config.order_timeout_secs))
            .json(&CreateOrderBody {
                identity: self.device_body(),
                order: request,
            })
            .send()
            .await
            .map_err(network_error)?;

        if !response.status().is_success() {
            return Err(classify_failure(response).await);
        }

        let order: CreatedOrder = response
            .json()
            .await
            .map_err(|e| KioskError::Serialization(format!("order response: {}", e)))?;
        info!(order_id = %order.order_id, "Created backend order");
        Ok(order)
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Serialize)]
struct DeviceIdentity {
    organization_id: String,
    device_id: String,
}

#[derive(Debug, Serialize)]
struct RefreshBody {
    #[serde(flatten)]
    identity: DeviceIdentity,
    refresh_token: String,
}

#[derive(Debug, Serialize)]
struct CreateOrderBody {
    #[serde(flatten)]
    identity: DeviceIdentity,
    #[serde(flatten)]
    order: OrderRequest,
}

#[derive(Debug, Deserialize)]
struct AuthorizeBody {
    authorization_url: String,
    state: String,
}

#[derive(Debug, Default, Deserialize)]
struct PollBody {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    bundle: TokenBundle,
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    #[serde(default)]
    connected: bool,
    #[serde(flatten)]
    bundle: TokenBundle,
}

/// Token fields shared by poll/status/refresh responses; all optional so
/// a partial body parses and is judged by [`TokenBundle::grant`].
#[derive(Debug, Default, Deserialize)]
struct TokenBundle {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    merchant_id: Option<String>,
    #[serde(default)]
    location_id: Option<String>,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

impl TokenBundle {
    /// A grant exists only when token, refresh token, merchant, and
    /// expiry are all present. `location_id` may legitimately be absent.
    fn grant(&self) -> Option<ConnectionGrant> {
        Some(ConnectionGrant {
            access_token: self.access_token.clone()?,
            refresh_token: self.refresh_token.clone()?,
            merchant_id: self.merchant_id.clone()?,
            location_id: self.location_id.clone(),
            expires_at: self.expires_at?,
        })
    }
}

impl PollBody {
    fn grant(&self) -> Option<ConnectionGrant> {
        self.bundle.grant()
    }
}

impl StatusBody {
    fn grant(&self) -> Option<ConnectionGrant> {
        self.bundle.grant()
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}
