//! # Auth Session
//!
//! Owns the device-pairing OAuth lifecycle: initiate, poll for
//! out-of-band completion, verify, refresh, and log out. The session is
//! the single writer of the persisted [`Credential`]; everything else
//! observes it.
//!
//! The central design decision lives in the auth-check path: when the
//! status endpoint fails repeatedly, the session probes a lightweight
//! health endpoint to distinguish "backend is down" from "credentials
//! are bad". A backend deploy must never eject a kiosk.

use chrono::{Duration as ChronoDuration, Utc};
use kiosk_core::{
    AuthStatus, ConnectionGrant, Credential, CredentialStore, KioskError, KioskResult,
    OrganizationId, PendingAuthorization, PlatformApi, PollOutcome, SessionEvent, SessionEvents,
    store::keys,
};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Cadence of the authorization completion poll.
pub const POLL_INTERVAL_SECS: u64 = 3;

/// Fixed delays between auth-check retries.
pub const AUTH_CHECK_RETRY_DELAYS_SECS: [u64; 2] = [2, 3];

/// Retry cadence while the backend is judged to be in an outage.
pub const OUTAGE_RETRY_INTERVAL_SECS: u64 = 10;

/// Minimum interval between completed status checks; calls inside the
/// window are coalesced into one deferred check.
pub const STATUS_DEBOUNCE_SECS: u64 = 2;

/// Refresh proactively once less than this much lifetime remains.
pub const PROACTIVE_REFRESH_WINDOW_DAYS: i64 = 7;

/// Wall-clock single-flight window on authorization initiation.
pub const INITIATE_COOLDOWN_SECS: i64 = 300;

/// Observable session phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPhase {
    Unauthenticated,
    Authenticating,
    PollingForCompletion,
    Authenticated,
    Refreshing,
    LoggingOut,
}

/// How a guarded auth check was entered.
enum CheckEntry {
    /// Ordinary status verification (may fall into refresh on 401/403).
    Status,
    /// Proactive refresh of a soon-to-expire token.
    ProactiveRefresh(String),
}

struct SessionState {
    phase: AuthPhase,
    credential: Option<Credential>,
    pending: Option<PendingAuthorization>,
    /// Wall-clock start of the most recent initiation attempt; drives
    /// the 5-minute single-flight guard.
    last_attempt_started_at: Option<chrono::DateTime<Utc>>,
    /// Set before any logout cleanup begins, cleared only after all
    /// synchronous cleanup completes. While set, every asynchronous
    /// callback must drop its result instead of re-asserting state.
    logout_in_progress: bool,
    poll_task: Option<JoinHandle<()>>,
    check_in_flight: bool,
    last_check_completed: Option<Instant>,
    deferred_check_scheduled: bool,
    last_error: Option<KioskError>,
}

/// Device-scoped authorization state machine.
pub struct AuthSession {
    platform: Arc<dyn PlatformApi>,
    store: Arc<dyn CredentialStore>,
    events: SessionEvents,
    organization_id: OrganizationId,
    device_id: String,
    state: Mutex<SessionState>,
}

impl AuthSession {
    /// Create a session, loading any persisted credential and pending
    /// authorization. Does not touch the network.
    pub fn new(
        platform: Arc<dyn PlatformApi>,
        store: Arc<dyn CredentialStore>,
        organization_id: OrganizationId,
        device_id: impl Into<String>,
    ) -> KioskResult<Arc<Self>> {
        let credential: Option<Credential> = store
            .get(keys::CREDENTIAL)?
            .and_then(|json| serde_json::from_str(&json).ok());
        let pending: Option<PendingAuthorization> = store
            .get(keys::PENDING_AUTHORIZATION)?
            .and_then(|json| serde_json::from_str(&json).ok())
            .filter(|p: &PendingAuthorization| !p.is_timed_out(Utc::now()));

        Ok(Arc::new(Self {
            platform,
            store,
            events: SessionEvents::default(),
            organization_id,
            device_id: device_id.into(),
            state: Mutex::new(SessionState {
                phase: AuthPhase::Unauthenticated,
                credential,
                pending,
                last_attempt_started_at: None,
                logout_in_progress: false,
                poll_task: None,
                check_in_flight: false,
                last_check_completed: None,
                deferred_check_scheduled: false,
                last_error: None,
            }),
        }))
    }

    /// Resume polling for a persisted, still-fresh pending authorization
    /// after a restart. No-op when nothing is pending.
    pub async fn resume(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        if let Some(pending) = &state.pending {
            let correlation = pending.correlation_state.clone();
            let started_at = pending.started_at;
            info!("Resuming authorization polling after restart");
            state.phase = AuthPhase::PollingForCompletion;
            state.last_attempt_started_at = Some(started_at);
            state.poll_task = Some(self.spawn_poll_task(correlation));
        }
    }

    /// Current phase.
    pub async fn phase(&self) -> AuthPhase {
        self.state.lock().await.phase
    }

    pub async fn is_authenticated(&self) -> bool {
        self.phase().await == AuthPhase::Authenticated
    }

    /// Snapshot of the current credential, if any.
    pub async fn current_credential(&self) -> Option<Credential> {
        self.state.lock().await.credential.clone()
    }

    /// Most recent surfaced error (polling timeouts and background check
    /// failures land here).
    pub async fn last_error(&self) -> Option<KioskError> {
        self.state.lock().await.last_error.clone()
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    // =========================================================================
    // Initiation & polling
    // =========================================================================

    /// Begin a device authorization flow. Returns the URL the operator
    /// must open, or `None` when the call was a single-flight no-op
    /// (a flow is already in progress or one started under 5 minutes ago).
    #[instrument(skip(self))]
    pub async fn initiate_authorization(self: &Arc<Self>) -> KioskResult<Option<String>> {
        {
            let mut state = self.state.lock().await;
            if state.logout_in_progress {
                return Ok(None);
            }
            if matches!(
                state.phase,
                AuthPhase::Authenticating | AuthPhase::PollingForCompletion
            ) {
                debug!("Authorization already in progress; ignoring");
                return Ok(None);
            }
            if let Some(started) = state.last_attempt_started_at {
                if Utc::now() - started < ChronoDuration::seconds(INITIATE_COOLDOWN_SECS) {
                    debug!("Authorization attempted under 5 minutes ago; ignoring");
                    return Ok(None);
                }
            }
            state.phase = AuthPhase::Authenticating;
            state.last_attempt_started_at = Some(Utc::now());
        }

        match self.platform.request_authorization().await {
            Ok(grant_request) => {
                let pending =
                    PendingAuthorization::new(grant_request.correlation_state.clone(), Utc::now());
                let json = serde_json::to_string(&pending)
                    .map_err(|e| KioskError::Serialization(e.to_string()))?;

                let mut state = self.state.lock().await;
                if state.logout_in_progress {
                    return Ok(None);
                }
                self.store.put(keys::PENDING_AUTHORIZATION, &json)?;
                state.pending = Some(pending);
                state.phase = AuthPhase::PollingForCompletion;
                if let Some(stale) = state.poll_task.take() {
                    stale.abort();
                }
                state.poll_task =
                    Some(self.spawn_poll_task(grant_request.correlation_state.clone()));
                info!("Authorization flow started; polling for completion");
                Ok(Some(grant_request.authorization_url))
            }
            Err(e) => {
                let mut state = self.state.lock().await;
                if !state.logout_in_progress {
                    state.phase = AuthPhase::Unauthenticated;
                    // The attempt never produced a pending authorization,
                    // so the operator may retry immediately.
                    state.last_attempt_started_at = None;
                }
                Err(e)
            }
        }
    }

    /// Poll the backend every 3 seconds until the correlation state
    /// resolves, is rejected, or the 5-minute window closes. The task is
    /// bound to its correlation state: the instant the state changes or
    /// logout begins, the task stands down.
    fn spawn_poll_task(self: &Arc<Self>, correlation_state: String) -> JoinHandle<()> {
        let session = self.clone();
        tokio::spawn(async move {
            // Deadline honors time already burned before a restart: the
            // persisted wall-clock start seeds a monotonic deadline.
            let deadline = {
                let state = session.state.lock().await;
                let elapsed = state
                    .pending
                    .as_ref()
                    .filter(|p| p.correlation_state == correlation_state)
                    .map(|p| (Utc::now() - p.started_at).num_seconds().max(0) as u64)
                    .unwrap_or(0);
                Instant::now()
                    + Duration::from_secs(
                        kiosk_core::AUTHORIZATION_TIMEOUT_SECS.saturating_sub(elapsed),
                    )
            };
            loop {
                sleep(Duration::from_secs(POLL_INTERVAL_SECS)).await;

                {
                    let state = session.state.lock().await;
                    match &state.pending {
                        Some(p)
                            if p.correlation_state == correlation_state
                                && !state.logout_in_progress => {}
                        _ => return,
                    }
                }
                if Instant::now() >= deadline {
                    warn!("Authorization polling timed out");
                    session
                        .abandon_pending(
                            &correlation_state,
                            KioskError::AuthorizationTimeout(
                                kiosk_core::AUTHORIZATION_TIMEOUT_SECS,
                            ),
                        )
                        .await;
                    return;
                }

                match session.platform.poll_authorization(&correlation_state).await {
                    Ok(PollOutcome::Complete(grant)) => {
                        if let Err(e) = session.apply_grant(grant).await {
                            warn!("Failed to persist completed authorization: {}", e);
                        }
                        return;
                    }
                    Ok(PollOutcome::LocationSelectionPending) => {
                        debug!("Waiting on out-of-band location selection");
                    }
                    Ok(PollOutcome::InProgress) => {}
                    Err(KioskError::InvalidCorrelationState) => {
                        warn!("Backend rejected correlation state; abandoning attempt");
                        session
                            .abandon_pending(&correlation_state, KioskError::InvalidCorrelationState)
                            .await;
                        return;
                    }
                    Err(e) => {
                        // Transient poll failures ride out the 5-minute window.
                        debug!("Authorization poll failed, will retry: {}", e);
                    }
                }
            }
        })
    }

    /// Clear a pending authorization that ended without credentials and
    /// surface the reason.
    async fn abandon_pending(&self, correlation_state: &str, error: KioskError) {
        let mut state = self.state.lock().await;
        let matches_current = state
            .pending
            .as_ref()
            .is_some_and(|p| p.correlation_state == correlation_state);
        if state.logout_in_progress || !matches_current {
            return;
        }
        if let Err(e) = self.store.remove(keys::PENDING_AUTHORIZATION) {
            warn!("Failed to clear pending authorization: {}", e);
        }
        state.pending = None;
        state.phase = AuthPhase::Unauthenticated;
        state.last_error = Some(error);
    }

    // =========================================================================
    // Verification
    // =========================================================================

    /// Cold-start entry point. With no local token, or an expired one,
    /// the session goes straight to `Unauthenticated` without a network
    /// call; otherwise the credential is verified with the backend.
    #[instrument(skip(self))]
    pub async fn check_authentication(self: &Arc<Self>) -> KioskResult<()> {
        let credential = {
            let state = self.state.lock().await;
            if state.logout_in_progress {
                return Ok(());
            }
            state.credential.clone()
        };

        let now = Utc::now();
        match credential {
            None => {
                debug!("No local credential; unauthenticated without network call");
                self.set_unauthenticated("no local credential", false).await;
                Ok(())
            }
            Some(c) if c.is_expired(now) => {
                debug!("Local credential expired; unauthenticated without network call");
                self.set_unauthenticated("credential expired", false).await;
                Ok(())
            }
            Some(c) if c.expires_within(now, ChronoDuration::days(PROACTIVE_REFRESH_WINDOW_DAYS)) => {
                info!("Credential nearing expiry; refreshing proactively");
                self.guarded_check(CheckEntry::ProactiveRefresh(c.refresh_token.clone()))
                    .await
            }
            Some(_) => self.perform_auth_check().await,
        }
    }

    /// Verify the delegated authorization with the backend, retrying
    /// transient failures and disambiguating persistent ones with a
    /// health probe. Single-flight: a concurrent call is a no-op.
    pub async fn perform_auth_check(self: &Arc<Self>) -> KioskResult<()> {
        self.guarded_check(CheckEntry::Status).await
    }

    async fn guarded_check(self: &Arc<Self>, entry: CheckEntry) -> KioskResult<()> {
        {
            let mut state = self.state.lock().await;
            if state.logout_in_progress || state.check_in_flight {
                return Ok(());
            }
            state.check_in_flight = true;
            if state.phase != AuthPhase::Authenticated {
                state.phase = AuthPhase::Authenticating;
            }
        }

        let result = match entry {
            CheckEntry::Status => self.auth_check_loop(true).await,
            CheckEntry::ProactiveRefresh(token) => self.refresh_credentials(token).await,
        };

        {
            let mut state = self.state.lock().await;
            state.check_in_flight = false;
            state.last_check_completed = Some(Instant::now());
        }
        result
    }

    async fn auth_check_loop(self: &Arc<Self>, allow_refresh: bool) -> KioskResult<()> {
        let mut attempt = 0usize;
        loop {
            if self.state.lock().await.logout_in_progress {
                return Ok(());
            }

            match self.platform.check_status().await {
                Ok(AuthStatus::Connected(grant)) => {
                    self.apply_grant(grant).await?;
                    return Ok(());
                }
                Ok(AuthStatus::NotConnected) => {
                    info!("Backend reports device not connected");
                    self.set_unauthenticated("not connected", true).await;
                    return Ok(());
                }
                Err(e) if e.is_authorization_failure() => {
                    if !allow_refresh {
                        warn!("Credentials rejected after refresh; signing out");
                        self.set_unauthenticated("rejected after refresh", true).await;
                        return Ok(());
                    }
                    let refresh_token = self
                        .state
                        .lock()
                        .await
                        .credential
                        .as_ref()
                        .map(|c| c.refresh_token.clone());
                    return match refresh_token {
                        Some(token) => {
                            info!("Credentials rejected; attempting token refresh");
                            self.refresh_credentials(token).await
                        }
                        None => {
                            self.set_unauthenticated("rejected with no refresh token", true)
                                .await;
                            Ok(())
                        }
                    };
                }
                Err(e) if e.is_retryable() => {
                    if attempt < AUTH_CHECK_RETRY_DELAYS_SECS.len() {
                        let delay = AUTH_CHECK_RETRY_DELAYS_SECS[attempt];
                        attempt += 1;
                        debug!("Auth check failed ({}); retry in {}s", e, delay);
                        sleep(Duration::from_secs(delay)).await;
                        continue;
                    }
                    // Retries exhausted. Is the backend down, or are our
                    // credentials bad? Only the health probe can tell.
                    if self.platform.probe_health().await {
                        warn!("Status endpoint failing while backend is healthy; signing out");
                        self.record_error(e).await;
                        self.set_unauthenticated("status failing, backend healthy", true)
                            .await;
                        return Ok(());
                    }
                    warn!(
                        "Backend appears to be down; holding session and retrying in {}s",
                        OUTAGE_RETRY_INTERVAL_SECS
                    );
                    sleep(Duration::from_secs(OUTAGE_RETRY_INTERVAL_SECS)).await;
                    // Attempts stay exhausted so each subsequent failure
                    // re-probes before any logout decision.
                }
                Err(e) => {
                    // Non-auth 4xx: definitive, never retried.
                    self.record_error(e.clone()).await;
                    self.restore_phase().await;
                    return Err(e);
                }
            }
        }
    }

    // =========================================================================
    // Refresh
    // =========================================================================

    /// Exchange the refresh token once. Success rewrites the credential
    /// and re-verifies it; failure means the delegation is gone and the
    /// full authorization flow is required. A failed refresh is never
    /// retried here.
    async fn refresh_credentials(self: &Arc<Self>, refresh_token: String) -> KioskResult<()> {
        {
            let mut state = self.state.lock().await;
            if state.logout_in_progress {
                return Ok(());
            }
            state.phase = AuthPhase::Refreshing;
        }

        match self.platform.refresh(&refresh_token).await {
            Ok(grant) => {
                self.apply_grant(grant).await?;
                // Verify the rewritten credential; a second rejection here
                // must not loop back into another refresh.
                Box::pin(self.auth_check_loop(false)).await
            }
            Err(e) => {
                let err = KioskError::RefreshFailed(e.to_string());
                warn!("Token refresh failed: {}", e);
                self.record_error(err.clone()).await;
                self.set_unauthenticated("refresh failed", true).await;
                Err(err)
            }
        }
    }

    /// Debounced status re-check: calls landing within 2 seconds of the
    /// last completed check are coalesced into one deferred check.
    pub async fn request_status_refresh(self: &Arc<Self>) -> KioskResult<()> {
        let defer = {
            let mut state = self.state.lock().await;
            if state.logout_in_progress {
                return Ok(());
            }
            match state.last_check_completed {
                Some(last) if last.elapsed() < Duration::from_secs(STATUS_DEBOUNCE_SECS) => {
                    if state.deferred_check_scheduled {
                        debug!("Status refresh already deferred; coalescing");
                        return Ok(());
                    }
                    state.deferred_check_scheduled = true;
                    Some(Duration::from_secs(STATUS_DEBOUNCE_SECS) - last.elapsed())
                }
                _ => None,
            }
        };

        match defer {
            Some(delay) => {
                let session = self.clone();
                tokio::spawn(async move {
                    sleep(delay).await;
                    session.state.lock().await.deferred_check_scheduled = false;
                    if let Err(e) = session.perform_auth_check().await {
                        debug!("Deferred status refresh failed: {}", e);
                    }
                });
                Ok(())
            }
            None => self.perform_auth_check().await,
        }
    }

    // =========================================================================
    // Logout
    // =========================================================================

    /// Tear the session down. The explicit-logout flag is raised before
    /// any state is touched so concurrent network callbacks cannot
    /// re-assert authentication mid-teardown, and lowered only after all
    /// synchronous cleanup completes.
    #[instrument(skip(self))]
    pub async fn logout(&self) -> KioskResult<()> {
        {
            let mut state = self.state.lock().await;
            if state.logout_in_progress {
                return Ok(());
            }
            state.logout_in_progress = true;
            state.phase = AuthPhase::LoggingOut;
            if let Some(task) = state.poll_task.take() {
                task.abort();
            }
        }

        if let Err(e) = self.platform.disconnect().await {
            // Best effort; local teardown proceeds regardless.
            warn!("Disconnect call failed during logout: {}", e);
        }

        for key in [keys::PENDING_AUTHORIZATION, keys::CREDENTIAL] {
            if let Err(e) = self.store.remove(key) {
                warn!("Failed to clear {} during logout: {}", key, e);
            }
        }

        self.events.emit(SessionEvent::ForcedLogout);
        self.events.emit(SessionEvent::ClearCachedState);

        let mut state = self.state.lock().await;
        state.credential = None;
        state.pending = None;
        state.last_attempt_started_at = None;
        state.last_error = None;
        state.phase = AuthPhase::Unauthenticated;
        state.logout_in_progress = false;
        info!("Logout complete");
        Ok(())
    }

    // =========================================================================
    // Shared state transitions
    // =========================================================================

    /// Install a fresh token bundle as the authenticated credential,
    /// clearing any pending authorization and its polling task.
    async fn apply_grant(&self, grant: ConnectionGrant) -> KioskResult<()> {
        let mut state = self.state.lock().await;
        if state.logout_in_progress {
            return Ok(());
        }

        let credential = Credential {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            merchant_id: grant.merchant_id,
            location_id: grant.location_id,
            organization_id: self.organization_id.clone(),
            device_id: self.device_id.clone(),
            expires_at: grant.expires_at,
        };
        let json = serde_json::to_string(&credential)
            .map_err(|e| KioskError::Serialization(e.to_string()))?;
        self.store.put(keys::CREDENTIAL, &json)?;
        self.store.remove(keys::PENDING_AUTHORIZATION)?;

        state.credential = Some(credential);
        state.pending = None;
        if let Some(task) = state.poll_task.take() {
            task.abort();
        }
        state.phase = AuthPhase::Authenticated;
        state.last_error = None;
        drop(state);

        info!("Session authenticated");
        self.events.emit(SessionEvent::Authenticated);
        Ok(())
    }

    /// Drop to `Unauthenticated`, optionally notifying dependents (cold
    /// starts stay quiet since nothing downstream holds state yet).
    async fn set_unauthenticated(&self, reason: &str, notify: bool) {
        let mut state = self.state.lock().await;
        if state.logout_in_progress {
            return;
        }
        debug!("Session unauthenticated: {}", reason);
        if state.credential.is_some() {
            if let Err(e) = self.store.remove(keys::CREDENTIAL) {
                warn!("Failed to clear credential: {}", e);
            }
        }
        state.credential = None;
        state.phase = AuthPhase::Unauthenticated;
        drop(state);

        if notify {
            self.events.emit(SessionEvent::ForcedLogout);
            self.events.emit(SessionEvent::ClearCachedState);
        }
    }

    /// After a definitive-but-nonfatal check error, settle the phase back
    /// to whatever the local credential justifies.
    async fn restore_phase(&self) {
        let mut state = self.state.lock().await;
        if state.logout_in_progress {
            return;
        }
        state.phase = match &state.credential {
            Some(c) if !c.is_expired(Utc::now()) => AuthPhase::Authenticated,
            _ => AuthPhase::Unauthenticated,
        };
    }

    async fn record_error(&self, error: KioskError) {
        self.state.lock().await.last_error = Some(error);
    }

    /// Install a credential and mark the session authenticated, as if a
    /// status check had just completed.
    #[cfg(test)]
    pub(crate) async fn install_credential(&self, credential: Credential) {
        let json = serde_json::to_string(&credential).unwrap();
        self.store.put(keys::CREDENTIAL, &json).unwrap();
        let mut state = self.state.lock().await;
        state.credential = Some(credential);
        state.phase = AuthPhase::Authenticated;
    }
}
