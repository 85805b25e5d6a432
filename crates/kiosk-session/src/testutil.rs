//! Shared mocks and fixtures for session tests.
//!
//! `MockPlatform` queues scripted responses per endpoint and counts
//! every call, so tests can assert both behavior and exactly how much
//! network traffic an operation generated.

use crate::auth::AuthSession;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use kiosk_core::{
    AuthStatus, AuthorizationGrantRequest, AuthorizationManager, ConnectionGrant, CreatedOrder,
    Credential, KioskError, KioskResult, MemoryStore, OrderRequest, OrganizationId,
    PaymentDelegate, PaymentManager, PlatformApi, PollOutcome, ReaderInfo, ReaderManager,
    ReaderState, SdkAuthorizationState, SdkPaymentRequest,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A token bundle as the backend would issue it, expiring well outside
/// the proactive-refresh window.
pub fn grant(location: Option<&str>) -> ConnectionGrant {
    ConnectionGrant {
        access_token: "at_new".into(),
        refresh_token: "rt_new".into(),
        merchant_id: "M1".into(),
        location_id: location.map(String::from),
        expires_at: Utc::now() + ChronoDuration::days(30),
    }
}

/// A session with no stored state.
pub fn fresh_session(platform: Arc<MockPlatform>) -> Arc<AuthSession> {
    AuthSession::new(
        platform,
        Arc::new(MemoryStore::new()),
        OrganizationId::new("org_1"),
        "dev_9",
    )
    .unwrap()
}

/// A session already authenticated with a long-lived credential at the
/// given location. Makes no platform calls.
pub async fn session_with_credential(
    platform: Arc<MockPlatform>,
    location: Option<&str>,
) -> Arc<AuthSession> {
    let session = fresh_session(platform);
    session
        .install_credential(Credential {
            access_token: "at_1".into(),
            refresh_token: "rt_1".into(),
            merchant_id: "M1".into(),
            location_id: location.map(String::from),
            organization_id: OrganizationId::new("org_1"),
            device_id: "dev_9".into(),
            expires_at: Utc::now() + ChronoDuration::days(30),
        })
        .await;
    session
}

/// Scripted, call-counting stand-in for the platform backend.
#[derive(Default)]
pub struct MockPlatform {
    status_queue: Mutex<VecDeque<KioskResult<AuthStatus>>>,
    fallback_status: Mutex<Option<KioskResult<AuthStatus>>>,
    poll_queue: Mutex<VecDeque<KioskResult<PollOutcome>>>,
    refresh_queue: Mutex<VecDeque<KioskResult<ConnectionGrant>>>,
    order_response: Mutex<Option<KioskResult<CreatedOrder>>>,
    healthy: AtomicBool,

    authorize_count: AtomicUsize,
    poll_count: AtomicUsize,
    status_count: AtomicUsize,
    refresh_count: AtomicUsize,
    disconnect_count: AtomicUsize,
    health_count: AtomicUsize,
    order_count: AtomicUsize,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_status(&self, response: KioskResult<AuthStatus>) {
        self.status_queue.lock().unwrap().push_back(response);
    }

    /// Response served once the status queue is drained. Defaults to
    /// `NotConnected`.
    pub fn set_fallback_status(&self, response: KioskResult<AuthStatus>) {
        *self.fallback_status.lock().unwrap() = Some(response);
    }

    pub fn queue_poll(&self, response: KioskResult<PollOutcome>) {
        self.poll_queue.lock().unwrap().push_back(response);
    }

    pub fn queue_refresh(&self, response: KioskResult<ConnectionGrant>) {
        self.refresh_queue.lock().unwrap().push_back(response);
    }

    pub fn set_order_response(&self, response: KioskResult<CreatedOrder>) {
        *self.order_response.lock().unwrap() = Some(response);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn authorize_calls(&self) -> usize {
        self.authorize_count.load(Ordering::SeqCst)
    }

    pub fn poll_calls(&self) -> usize {
        self.poll_count.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_count.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_count.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_count.load(Ordering::SeqCst)
    }

    pub fn health_calls(&self) -> usize {
        self.health_count.load(Ordering::SeqCst)
    }

    pub fn order_calls(&self) -> usize {
        self.order_count.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.authorize_calls()
            + self.poll_calls()
            + self.status_calls()
            + self.refresh_calls()
            + self.disconnect_calls()
            + self.health_calls()
            + self.order_calls()
    }
}

#[async_trait]
impl PlatformApi for MockPlatform {
    async fn request_authorization(&self) -> KioskResult<AuthorizationGrantRequest> {
        self.authorize_count.fetch_add(1, Ordering::SeqCst);
        Ok(AuthorizationGrantRequest {
            authorization_url: "https://pay.example.com/approve".into(),
            correlation_state: "abc".into(),
        })
    }

    async fn poll_authorization(&self, _correlation_state: &str) -> KioskResult<PollOutcome> {
        self.poll_count.fetch_add(1, Ordering::SeqCst);
        self.poll_queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(PollOutcome::InProgress))
    }

    async fn check_status(&self) -> KioskResult<AuthStatus> {
        self.status_count.fetch_add(1, Ordering::SeqCst);
        if let Some(response) = self.status_queue.lock().unwrap().pop_front() {
            return response;
        }
        self.fallback_status
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(Ok(AuthStatus::NotConnected))
    }

    async fn refresh(&self, _refresh_token: &str) -> KioskResult<ConnectionGrant> {
        self.refresh_count.fetch_add(1, Ordering::SeqCst);
        self.refresh_queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(KioskError::RefreshFailed("no refresh scripted".into())))
    }

    async fn disconnect(&self) -> KioskResult<()> {
        self.disconnect_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn probe_health(&self) -> bool {
        self.health_count.fetch_add(1, Ordering::SeqCst);
        self.healthy.load(Ordering::SeqCst)
    }

    async fn create_order(&self, _request: OrderRequest) -> KioskResult<CreatedOrder> {
        self.order_count.fetch_add(1, Ordering::SeqCst);
        self.order_response
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(Err(KioskError::Internal("no order scripted".into())))
    }
}

/// In-memory stand-in for the hardware SDK's authorization, recording
/// the order of authorize/deauthorize calls.
pub struct MockAuthorizationManager {
    state: Mutex<(SdkAuthorizationState, Option<String>)>,
    calls: Mutex<Vec<String>>,
    fail_next: Mutex<Option<String>>,
    authorize_count: AtomicUsize,
    deauthorize_count: AtomicUsize,
}

impl MockAuthorizationManager {
    pub fn authorized(location_id: &str) -> Self {
        Self::with_state(
            SdkAuthorizationState::Authorized,
            Some(location_id.to_string()),
        )
    }

    pub fn not_authorized() -> Self {
        Self::with_state(SdkAuthorizationState::NotAuthorized, None)
    }

    fn with_state(state: SdkAuthorizationState, location: Option<String>) -> Self {
        Self {
            state: Mutex::new((state, location)),
            calls: Mutex::new(Vec::new()),
            fail_next: Mutex::new(None),
            authorize_count: AtomicUsize::new(0),
            deauthorize_count: AtomicUsize::new(0),
        }
    }

    /// Simulate the SDK losing its authorization out from under us.
    pub fn reset_to_not_authorized(&self) {
        *self.state.lock().unwrap() = (SdkAuthorizationState::NotAuthorized, None);
    }

    pub fn fail_next_authorize(&self, message: &str) {
        *self.fail_next.lock().unwrap() = Some(message.to_string());
    }

    pub fn call_order(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn authorize_calls(&self) -> usize {
        self.authorize_count.load(Ordering::SeqCst)
    }

    pub fn deauthorize_calls(&self) -> usize {
        self.deauthorize_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthorizationManager for MockAuthorizationManager {
    fn authorization_state(&self) -> SdkAuthorizationState {
        self.state.lock().unwrap().0
    }

    fn authorized_location_id(&self) -> Option<String> {
        self.state.lock().unwrap().1.clone()
    }

    async fn authorize(&self, _access_token: &str, location_id: &str) -> KioskResult<()> {
        self.authorize_count.fetch_add(1, Ordering::SeqCst);
        self.calls
            .lock()
            .unwrap()
            .push(format!("authorize:{}", location_id));
        if let Some(message) = self.fail_next.lock().unwrap().take() {
            return Err(KioskError::Internal(message));
        }
        *self.state.lock().unwrap() = (
            SdkAuthorizationState::Authorized,
            Some(location_id.to_string()),
        );
        Ok(())
    }

    async fn deauthorize(&self) -> KioskResult<()> {
        self.deauthorize_count.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push("deauthorize".to_string());
        *self.state.lock().unwrap() = (SdkAuthorizationState::NotAuthorized, None);
        Ok(())
    }
}

/// One reader whose readiness and offline capability tests can toggle.
pub struct MockReaderManager {
    ready: AtomicBool,
    offline_supported: AtomicBool,
}

impl MockReaderManager {
    pub fn ready() -> Self {
        Self {
            ready: AtomicBool::new(true),
            offline_supported: AtomicBool::new(false),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn set_offline_supported(&self, supported: bool) {
        self.offline_supported.store(supported, Ordering::SeqCst);
    }
}

impl ReaderManager for MockReaderManager {
    fn readers(&self) -> Vec<ReaderInfo> {
        let state = if self.ready.load(Ordering::SeqCst) {
            ReaderState::Ready
        } else {
            ReaderState::Disconnected
        };
        vec![ReaderInfo {
            serial: "R1".into(),
            state,
        }]
    }

    fn supports_offline_payments(&self) -> bool {
        self.offline_supported.load(Ordering::SeqCst)
    }
}

/// How the scripted SDK resolves a submitted payment. `FinishTwice`
/// models a misbehaving SDK firing its terminal callback twice.
#[derive(Debug, Clone)]
pub enum SdkScript {
    Finish(String),
    FinishTwice(String),
    Cancel,
    Fail(String),
}

/// Payment manager that resolves each submission per its script and
/// records the last request it saw.
pub struct MockPaymentManager {
    script: Mutex<SdkScript>,
    last_request: Mutex<Option<SdkPaymentRequest>>,
    submit_count: AtomicUsize,
}

impl MockPaymentManager {
    pub fn new(script: SdkScript) -> Self {
        Self {
            script: Mutex::new(script),
            last_request: Mutex::new(None),
            submit_count: AtomicUsize::new(0),
        }
    }

    pub fn set_script(&self, script: SdkScript) {
        *self.script.lock().unwrap() = script;
    }

    pub fn submit_calls(&self) -> usize {
        self.submit_count.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<SdkPaymentRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentManager for MockPaymentManager {
    async fn submit_payment(
        &self,
        request: SdkPaymentRequest,
        delegate: Arc<dyn PaymentDelegate>,
    ) -> KioskResult<()> {
        self.submit_count.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request);
        let script = self.script.lock().unwrap().clone();

        delegate.payment_started();
        match script {
            SdkScript::Finish(transaction_id) => delegate.payment_finished(transaction_id),
            SdkScript::FinishTwice(transaction_id) => {
                delegate.payment_finished(transaction_id.clone());
                delegate.payment_finished(transaction_id);
            }
            SdkScript::Cancel => delegate.payment_canceled(),
            SdkScript::Fail(message) => delegate.payment_failed(message),
        }
        Ok(())
    }
}
