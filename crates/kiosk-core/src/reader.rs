//! # Hardware SDK Seams
//!
//! Trait boundaries over the vendor payment SDK: authorization manager,
//! reader manager, and payment manager. The kiosk core never talks to
//! hardware directly; it observes and drives these traits, which makes
//! the reconciliation and exactly-once logic testable without a reader
//! on the desk.

use crate::error::KioskResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Authorization state reported by the hardware SDK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SdkAuthorizationState {
    NotAuthorized,
    Authorizing,
    Authorized,
}

/// The SDK's internal authorization: access token + active location.
///
/// Not owned by this system; observed and reconciled against the
/// credential's location id.
#[async_trait]
pub trait AuthorizationManager: Send + Sync {
    /// Current SDK authorization state.
    fn authorization_state(&self) -> SdkAuthorizationState;

    /// Location the SDK is currently authorized for, if any.
    fn authorized_location_id(&self) -> Option<String>;

    /// Authorize the SDK with a platform access token and location.
    async fn authorize(&self, access_token: &str, location_id: &str) -> KioskResult<()>;

    /// Drop the SDK's authorization.
    async fn deauthorize(&self) -> KioskResult<()>;
}

/// Connection state of a physical reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReaderState {
    Ready,
    Connecting,
    Updating,
    Disconnected,
}

/// A reader known to the SDK.
#[derive(Debug, Clone)]
pub struct ReaderInfo {
    pub serial: String,
    pub state: ReaderState,
}

impl ReaderInfo {
    pub fn is_ready(&self) -> bool {
        self.state == ReaderState::Ready
    }
}

/// Enumerates attached readers and their capabilities.
pub trait ReaderManager: Send + Sync {
    fn readers(&self) -> Vec<ReaderInfo>;

    /// Whether the current reader/SDK combination can queue payments
    /// locally while offline.
    fn supports_offline_payments(&self) -> bool;
}

/// Online-only vs. auto-detect (allows offline-queued) submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    OnlineOnly,
    AutoDetect,
}

/// Payment submission handed to the hardware SDK.
#[derive(Debug, Clone)]
pub struct SdkPaymentRequest {
    /// Amount in minor units (cents)
    pub amount_minor: i64,
    /// Idempotency key deduplicated by the payment platform
    pub idempotency_key: String,
    /// Backend order the payment settles against
    pub order_id: String,
    /// Caller-visible reference id for receipts and logs
    pub reference_id: String,
    pub processing_mode: ProcessingMode,
}

/// Lifecycle callbacks fired by the SDK during a payment. The SDK may
/// misbehave and fire a terminal callback twice; the orchestrator is
/// responsible for delivering exactly one outcome regardless.
pub trait PaymentDelegate: Send + Sync {
    /// The SDK's payment UI is up and the attempt is in progress.
    fn payment_started(&self);

    /// Payment settled; `transaction_id` is the platform's id.
    fn payment_finished(&self, transaction_id: String);

    /// Customer abandoned the payment. Not an error.
    fn payment_canceled(&self);

    /// Payment failed or was declined.
    fn payment_failed(&self, message: String);
}

/// Submits payments to the hardware and drives its card-present UI.
/// There is no manual card entry path; tap/dip/swipe only.
#[async_trait]
pub trait PaymentManager: Send + Sync {
    async fn submit_payment(
        &self,
        request: SdkPaymentRequest,
        delegate: std::sync::Arc<dyn PaymentDelegate>,
    ) -> KioskResult<()>;
}
