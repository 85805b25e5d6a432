//! # Credential Types
//!
//! Persisted authorization state for a merchant/device pair.
//! A [`Credential`] is owned exclusively by the auth session; storage
//! backends only persist and retrieve it.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Tenant identifier, optionally scoped to a single device.
///
/// The base id identifies the merchant organization on the platform.
/// When device scoping is enabled (to resolve conflicts between multiple
/// kiosks sharing one organization), the device id is appended when
/// talking to the backend, but the suffix must never be written back
/// into the persisted base id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationId {
    base: String,
}

impl OrganizationId {
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }

    /// The persisted base tenant id, never device-suffixed.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// The id used on the wire: `base` or `base:device` when scoping
    /// is enabled.
    pub fn scoped(&self, device_id: &str, device_scoped: bool) -> String {
        if device_scoped {
            format!("{}:{}", self.base, device_id)
        } else {
            self.base.clone()
        }
    }
}

/// Delegated authorization issued by the payment platform.
///
/// Invariant: `access_token` and `expires_at` are set together; a
/// credential is never constructed with one but not the other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    /// Bearer token for platform API calls
    pub access_token: String,

    /// Token used to mint a replacement access token
    pub refresh_token: String,

    /// Platform merchant identifier
    pub merchant_id: String,

    /// Active location, if one has been selected for this device
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_id: Option<String>,

    /// Base tenant id (never device-suffixed, see [`OrganizationId`])
    pub organization_id: OrganizationId,

    /// Stable identifier of this kiosk device
    pub device_id: String,

    /// Access-token expiry
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// True if the access token is already expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// True if the token's remaining lifetime is below the given window.
    /// Used to trigger proactive refresh (window is 7 days in practice).
    pub fn expires_within(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.expires_at <= now + window
    }
}

/// Correlation state for an in-flight OAuth authorization attempt.
///
/// Exactly one may be active per session. Its presence gates whether the
/// completion-polling task may run; it is cleared on success, explicit
/// failure, or the 5-minute timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAuthorization {
    /// Opaque token binding this attempt to its backend-side completion
    pub correlation_state: String,

    /// When the attempt began (wall clock; drives the single-flight
    /// guard and the hard timeout)
    pub started_at: DateTime<Utc>,
}

/// Hard timeout on an authorization attempt, in seconds.
pub const AUTHORIZATION_TIMEOUT_SECS: u64 = 300;

impl PendingAuthorization {
    pub fn new(correlation_state: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            correlation_state: correlation_state.into(),
            started_at,
        }
    }

    /// True once the attempt has outlived its 5-minute window.
    pub fn is_timed_out(&self, now: DateTime<Utc>) -> bool {
        now - self.started_at >= Duration::seconds(AUTHORIZATION_TIMEOUT_SECS as i64)
    }
}
