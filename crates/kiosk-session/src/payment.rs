//! # Payment Orchestrator
//!
//! Validates preconditions, resolves a backend order, attaches a
//! ledger-backed idempotency key, and submits the payment to the
//! hardware SDK, resolving exactly one outcome per attempt no matter
//! how the SDK's delegate callbacks behave.

use crate::auth::AuthSession;
use chrono::Utc;
use kiosk_core::{
    AuthorizationManager, IdempotencyLedger, KioskError, KioskResult, OrderRequest,
    PaymentDelegate, PaymentManager, PlatformApi, ProcessingMode, ReaderManager,
    SdkAuthorizationState, SdkPaymentRequest,
};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Cadence of the session/SDK consistency check.
pub const HEALTH_CHECK_INTERVAL_SECS: u64 = 30;

/// A card-present payment to submit.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    /// Amount in minor units (cents)
    pub amount_minor: i64,
    /// Existing backend order; one is created when absent
    pub order_id: Option<String>,
    /// Retry identity: reusing the same transaction id reuses the same
    /// idempotency key. Derived from the order id and wall clock when
    /// absent.
    pub transaction_id: Option<String>,
    /// Freeform amount rather than a preset line item
    pub custom_amount: bool,
    /// Allow offline queuing when the reader supports it
    pub allow_offline: bool,
    /// Processing-fee basis points forwarded to order creation
    pub fee_basis_points: Option<u32>,
}

impl PaymentRequest {
    pub fn new(amount_minor: i64) -> Self {
        Self {
            amount_minor,
            order_id: None,
            transaction_id: None,
            custom_amount: false,
            allow_offline: false,
            fee_basis_points: None,
        }
    }
}

/// Terminal result of a payment attempt. Cancellation is a non-error
/// outcome: the customer walked away, nothing to show but a reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Succeeded { transaction_id: String },
    Canceled,
    Failed { message: String },
}

/// Delegate bridging SDK callbacks onto a oneshot outcome channel.
///
/// The sender is taken on the first terminal callback; a duplicate
/// terminal callback from a misbehaving SDK finds the slot empty and is
/// dropped, which is what guarantees exactly-once delivery.
struct OutcomeDelegate {
    slot: Mutex<Option<oneshot::Sender<PaymentOutcome>>>,
}

impl OutcomeDelegate {
    fn new(sender: oneshot::Sender<PaymentOutcome>) -> Self {
        Self {
            slot: Mutex::new(Some(sender)),
        }
    }

    fn resolve(&self, outcome: PaymentOutcome) {
        let sender = self.slot.lock().expect("delegate lock poisoned").take();
        match sender {
            Some(sender) => {
                let _ = sender.send(outcome);
            }
            None => warn!("Duplicate terminal payment callback dropped"),
        }
    }
}

impl PaymentDelegate for OutcomeDelegate {
    fn payment_started(&self) {
        debug!("Payment in progress at reader");
    }

    fn payment_finished(&self, transaction_id: String) {
        self.resolve(PaymentOutcome::Succeeded { transaction_id });
    }

    fn payment_canceled(&self) {
        self.resolve(PaymentOutcome::Canceled);
    }

    fn payment_failed(&self, message: String) {
        self.resolve(PaymentOutcome::Failed { message });
    }
}

/// Submits card-present payments with at-most-once semantics.
pub struct PaymentOrchestrator {
    session: Arc<AuthSession>,
    platform: Arc<dyn PlatformApi>,
    authorization: Arc<dyn AuthorizationManager>,
    readers: Arc<dyn ReaderManager>,
    payments: Arc<dyn PaymentManager>,
    ledger: Arc<IdempotencyLedger>,
}

impl PaymentOrchestrator {
    pub fn new(
        session: Arc<AuthSession>,
        platform: Arc<dyn PlatformApi>,
        authorization: Arc<dyn AuthorizationManager>,
        readers: Arc<dyn ReaderManager>,
        payments: Arc<dyn PaymentManager>,
        ledger: Arc<IdempotencyLedger>,
    ) -> Self {
        Self {
            session,
            platform,
            authorization,
            readers,
            payments,
            ledger,
        }
    }

    /// Submit one payment attempt and resolve its outcome.
    ///
    /// Precondition failures are specific, non-retryable errors surfaced
    /// before any network or hardware call. User cancellation and
    /// declines come back as outcomes, not errors, and are never retried
    /// here; a caller re-invoking with the same transaction id reuses
    /// the same idempotency key.
    #[instrument(skip(self, request), fields(amount_minor = request.amount_minor))]
    pub async fn submit_payment(&self, request: PaymentRequest) -> KioskResult<PaymentOutcome> {
        // 1. Preconditions, checked before anything leaves the device.
        if !self.session.is_authenticated().await {
            return Err(KioskError::NotAuthenticated);
        }
        if self.authorization.authorization_state() != SdkAuthorizationState::Authorized {
            return Err(KioskError::ReaderNotAuthorized);
        }
        if !self.readers.readers().iter().any(|r| r.is_ready()) {
            return Err(KioskError::NoReaderReady);
        }

        // 2. Resolve the order. Collaborator failures abort the attempt
        //    unretried.
        let order_id = match request.order_id.clone() {
            Some(id) => id,
            None => {
                let order = self
                    .platform
                    .create_order(OrderRequest {
                        amount_minor: request.amount_minor,
                        custom_amount: request.custom_amount,
                        fee_basis_points: request.fee_basis_points,
                    })
                    .await
                    .map_err(|e| KioskError::OrderCreation(e.to_string()))?;
                order.order_id
            }
        };

        // 3. Idempotency key, stable across retries of the same
        //    transaction id even across restarts.
        let transaction_id = request
            .transaction_id
            .clone()
            .unwrap_or_else(|| format!("{}-{}", order_id, Utc::now().timestamp()));
        let idempotency_key = self.ledger.get_or_create_key(&transaction_id)?;

        // 4. Processing mode: offline queuing requires both the caller's
        //    consent and reader support.
        let processing_mode = if request.allow_offline && self.readers.supports_offline_payments()
        {
            ProcessingMode::AutoDetect
        } else {
            ProcessingMode::OnlineOnly
        };

        // 5. Submit; the SDK presents its own card-present UI.
        let (sender, receiver) = oneshot::channel();
        let delegate = Arc::new(OutcomeDelegate::new(sender));
        let sdk_request = SdkPaymentRequest {
            amount_minor: request.amount_minor,
            idempotency_key,
            order_id: order_id.clone(),
            reference_id: Uuid::new_v4().to_string(),
            processing_mode,
        };
        info!(order_id = %order_id, ?processing_mode, "Submitting payment to reader");
        self.payments.submit_payment(sdk_request, delegate).await?;

        // 6. Exactly one terminal outcome reaches us.
        let outcome = receiver
            .await
            .map_err(|_| KioskError::Internal("payment outcome never delivered".to_string()))?;
        match &outcome {
            PaymentOutcome::Succeeded { transaction_id } => {
                info!(platform_transaction_id = %transaction_id, "Payment succeeded");
            }
            PaymentOutcome::Canceled => info!("Payment canceled by customer"),
            PaymentOutcome::Failed { message } => warn!("Payment failed: {}", message),
        }
        Ok(outcome)
    }

    /// Consistency check between the session and the hardware SDK. If
    /// the session believes it is authenticated while the SDK holds no
    /// authorization or no location, accepting taps risks payments the
    /// backend cannot settle, so force a full logout instead of silently
    /// retrying.
    pub async fn run_health_check(&self) {
        if !self.session.is_authenticated().await {
            return;
        }
        let sdk_consistent = self.authorization.authorization_state()
            == SdkAuthorizationState::Authorized
            && self.authorization.authorized_location_id().is_some();
        if !sdk_consistent {
            warn!("Session authenticated but SDK authorization is gone; forcing logout");
            if let Err(e) = self.session.logout().await {
                warn!("Forced logout failed: {}", e);
            }
        }
    }

    /// Spawn the periodic health check. The returned handle owns the
    /// task; abort it on shutdown.
    pub fn start_health_monitor(self: &Arc<Self>) -> JoinHandle<()> {
        let orchestrator = self.clone();
        info!(
            "Starting payment health monitor (interval: {}s)",
            HEALTH_CHECK_INTERVAL_SECS
        );
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(
                HEALTH_CHECK_INTERVAL_SECS,
            ));
            interval.tick().await; // the first tick is immediate
            loop {
                interval.tick().await;
                orchestrator.run_health_check().await;
            }
        })
    }
}
