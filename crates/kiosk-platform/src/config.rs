//! # Platform Configuration
//!
//! Configuration for the payment platform backend client.
//! Loaded from environment variables or a TOML file; secrets never live
//! in source.

use kiosk_core::{KioskError, OrganizationId};
use serde::Deserialize;
use std::env;

/// Platform backend configuration
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    /// Backend base URL (no trailing slash)
    pub base_url: String,

    /// Base tenant id for this merchant
    pub organization_id: OrganizationId,

    /// Stable identifier of this kiosk device
    pub device_id: String,

    /// Append the device id to the organization id on the wire
    /// (conflict-detection opt-in; the suffix is never persisted)
    pub device_scoped: bool,

    /// Default per-request timeout, seconds
    pub request_timeout_secs: u64,

    /// Order-creation timeout, seconds (slowest call the backend serves)
    pub order_timeout_secs: u64,

    /// Health-probe timeout, seconds (must answer fast or count as down)
    pub health_timeout_secs: u64,
}

/// TOML shape for file-based configuration
#[derive(Debug, Deserialize)]
struct PlatformConfigFile {
    base_url: String,
    organization_id: String,
    device_id: String,
    #[serde(default)]
    device_scoped: bool,
    #[serde(default)]
    request_timeout_secs: Option<u64>,
    #[serde(default)]
    order_timeout_secs: Option<u64>,
    #[serde(default)]
    health_timeout_secs: Option<u64>,
}

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_ORDER_TIMEOUT_SECS: u64 = 15;
const DEFAULT_HEALTH_TIMEOUT_SECS: u64 = 3;

impl PlatformConfig {
    /// Load configuration from environment variables.
    ///
    /// Required env vars:
    /// - `KIOSK_PLATFORM_URL`
    /// - `KIOSK_ORGANIZATION_ID`
    /// - `KIOSK_DEVICE_ID`
    pub fn from_env() -> Result<Self, KioskError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let base_url = env::var("KIOSK_PLATFORM_URL")
            .map_err(|_| KioskError::Configuration("KIOSK_PLATFORM_URL not set".to_string()))?;
        let organization_id = env::var("KIOSK_ORGANIZATION_ID").map_err(|_| {
            KioskError::Configuration("KIOSK_ORGANIZATION_ID not set".to_string())
        })?;
        let device_id = env::var("KIOSK_DEVICE_ID")
            .map_err(|_| KioskError::Configuration("KIOSK_DEVICE_ID not set".to_string()))?;
        let device_scoped = env::var("KIOSK_DEVICE_SCOPED")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Ok(Self::new(base_url, organization_id, device_id).with_device_scoped(device_scoped))
    }

    /// Load configuration from a TOML file (e.g. `config/kiosk.toml`).
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, KioskError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| KioskError::Configuration(e.to_string()))?;
        let file: PlatformConfigFile = toml::from_str(&content)
            .map_err(|e| KioskError::Configuration(format!("invalid config file: {}", e)))?;

        let mut config = Self::new(file.base_url, file.organization_id, file.device_id)
            .with_device_scoped(file.device_scoped);
        if let Some(secs) = file.request_timeout_secs {
            config.request_timeout_secs = secs;
        }
        if let Some(secs) = file.order_timeout_secs {
            config.order_timeout_secs = secs;
        }
        if let Some(secs) = file.health_timeout_secs {
            config.health_timeout_secs = secs;
        }
        Ok(config)
    }

    /// Create config with explicit values (for testing)
    pub fn new(
        base_url: impl Into<String>,
        organization_id: impl Into<String>,
        device_id: impl Into<String>,
    ) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            organization_id: OrganizationId::new(organization_id),
            device_id: device_id.into(),
            device_scoped: false,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            order_timeout_secs: DEFAULT_ORDER_TIMEOUT_SECS,
            health_timeout_secs: DEFAULT_HEALTH_TIMEOUT_SECS,
        }
    }

    /// Builder: toggle device scoping
    pub fn with_device_scoped(mut self, scoped: bool) -> Self {
        self.device_scoped = scoped;
        self
    }

    /// Organization id as sent on the wire
    pub fn wire_organization_id(&self) -> String {
        self.organization_id.scoped(&self.device_id, self.device_scoped)
    }
}
