//! # Platform API Trait
//!
//! Trait seam over the payment platform backend. The HTTP implementation
//! lives in `kiosk-platform`; tests substitute call-counting mocks.

use crate::error::KioskResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Authorization URL plus the correlation state used to poll for its
/// out-of-band completion.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizationGrantRequest {
    /// URL the operator opens to approve the connection
    pub authorization_url: String,
    /// Opaque correlation state for status polling
    pub correlation_state: String,
}

/// Token bundle issued when a device connection completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionGrant {
    pub access_token: String,
    pub refresh_token: String,
    pub merchant_id: String,
    #[serde(default)]
    pub location_id: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// One poll of the authorization-status endpoint.
#[derive(Debug, Clone)]
pub enum PollOutcome {
    /// The connection completed; credentials are ready.
    Complete(ConnectionGrant),
    /// A human is still choosing among locations out-of-band.
    LocationSelectionPending,
    /// Not done yet (also used for unrecognized response shapes).
    InProgress,
}

/// Result of a device status check.
#[derive(Debug, Clone)]
pub enum AuthStatus {
    /// Device is connected; a fresh token bundle accompanies the answer.
    Connected(ConnectionGrant),
    /// Backend says this device is not connected. Definitive; no retry.
    NotConnected,
}

/// Parameters for backend order creation.
#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    /// Amount in minor units (cents)
    pub amount_minor: i64,
    /// Whether this is a freeform amount rather than a preset line item
    pub custom_amount: bool,
    /// Processing-fee basis points applied by the backend, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee_basis_points: Option<u32>,
}

/// A backend-created order awaiting payment.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedOrder {
    pub order_id: String,
}

/// Backend operations the kiosk core depends on.
///
/// All requests are keyed by the configured `organization_id` and
/// `device_id`; implementations own that plumbing.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    /// Request an authorization URL and correlation state to begin a
    /// device connection.
    async fn request_authorization(&self) -> KioskResult<AuthorizationGrantRequest>;

    /// Poll the completion status of an in-flight authorization.
    ///
    /// A rejected correlation state surfaces as
    /// [`crate::KioskError::InvalidCorrelationState`].
    async fn poll_authorization(&self, correlation_state: &str) -> KioskResult<PollOutcome>;

    /// Check whether this device's delegated authorization is still valid.
    async fn check_status(&self) -> KioskResult<AuthStatus>;

    /// Exchange a refresh token for a new token bundle.
    async fn refresh(&self, refresh_token: &str) -> KioskResult<ConnectionGrant>;

    /// Tell the backend this device is disconnecting (best effort).
    async fn disconnect(&self) -> KioskResult<()>;

    /// Lightweight liveness probe, used to distinguish "backend is down"
    /// from "credentials are bad". `true` means the backend is reachable
    /// and serving.
    async fn probe_health(&self) -> bool;

    /// Create an order to attach the payment to.
    async fn create_order(&self, request: OrderRequest) -> KioskResult<CreatedOrder>;
}
