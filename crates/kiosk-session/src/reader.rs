//! # Reader Authorization Coordinator
//!
//! Keeps the hardware SDK's internal authorization (access token plus
//! active location) in step with the session's current credential. The
//! SDK's state is not ours; it is observed and reconciled, and a
//! location mismatch is repaired by deauthorizing and reauthorizing
//! rather than surfaced to the operator.

use crate::auth::AuthSession;
use kiosk_core::{AuthorizationManager, KioskError, KioskResult, SdkAuthorizationState};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, instrument, warn};

/// Delay before the single retry after a missing-location recovery.
pub const MISSING_LOCATION_RETRY_DELAY_SECS: u64 = 2;

/// Reconciles SDK authorization with the session credential.
pub struct ReaderAuthorizationCoordinator {
    session: Arc<AuthSession>,
    authorization: Arc<dyn AuthorizationManager>,
    /// Single-flight guard: a second caller while reconciliation is in
    /// progress is a no-op, not an error.
    guard: Mutex<()>,
}

impl ReaderAuthorizationCoordinator {
    pub fn new(
        session: Arc<AuthSession>,
        authorization: Arc<dyn AuthorizationManager>,
    ) -> Self {
        Self {
            session,
            authorization,
            guard: Mutex::new(()),
        }
    }

    /// Bring the SDK's authorization in line with the current credential.
    ///
    /// - already authorized at the credential's location: no-op
    /// - authorized at a different location: deauthorize, then reauthorize
    /// - not authorized: authorize directly
    /// - credential missing its location id: one-shot auth re-check (the
    ///   backend may return the missing location), then a single delayed
    ///   retry, never a blind authorize
    #[instrument(skip(self))]
    pub async fn ensure_authorized(&self) -> KioskResult<()> {
        let Ok(_guard) = self.guard.try_lock() else {
            debug!("Reader authorization already in progress; ignoring");
            return Ok(());
        };

        let mut allow_recheck = true;
        loop {
            let credential = self
                .session
                .current_credential()
                .await
                .ok_or(KioskError::NotAuthenticated)?;

            let Some(location_id) = credential.location_id.clone() else {
                // Known inconsistent state: tokens without a location.
                if !allow_recheck {
                    warn!("Credential still has no location after re-check");
                    return Err(KioskError::MissingLocation);
                }
                warn!("Credential has tokens but no location; re-checking authentication");
                allow_recheck = false;
                self.session.check_authentication().await?;
                sleep(Duration::from_secs(MISSING_LOCATION_RETRY_DELAY_SECS)).await;
                continue;
            };

            return match self.authorization.authorization_state() {
                SdkAuthorizationState::Authorized => {
                    match self.authorization.authorized_location_id() {
                        Some(active) if active == location_id => {
                            debug!("SDK already authorized at current location");
                            Ok(())
                        }
                        active => {
                            info!(
                                expected = %location_id,
                                actual = active.as_deref().unwrap_or("<none>"),
                                "SDK location mismatch; repairing"
                            );
                            self.authorization.deauthorize().await?;
                            self.authorize(&credential.access_token, &location_id).await
                        }
                    }
                }
                SdkAuthorizationState::Authorizing => {
                    debug!("SDK authorization already underway");
                    Ok(())
                }
                SdkAuthorizationState::NotAuthorized => {
                    self.authorize(&credential.access_token, &location_id).await
                }
            };
        }
    }

    async fn authorize(&self, access_token: &str, location_id: &str) -> KioskResult<()> {
        self.authorization
            .authorize(access_token, location_id)
            .await
            .map_err(map_location_error)?;
        info!(location_id, "SDK authorized");
        Ok(())
    }
}

/// Authorization failures that look location-shaped are the dominant
/// real-world failure mode; name them so the operator is told to
/// reconnect and re-select a location instead of seeing a generic error.
fn map_location_error(error: KioskError) -> KioskError {
    let text = error.to_string().to_ascii_lowercase();
    if text.contains("location") {
        KioskError::Location("Reconnect and re-select a location for this device".to_string())
    } else {
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthPhase;
    use crate::testutil::{grant, session_with_credential, MockAuthorizationManager, MockPlatform};
    use kiosk_core::AuthStatus;

    #[tokio::test]
    async fn test_noop_when_already_authorized_at_current_location() {
        let platform = Arc::new(MockPlatform::new());
        let session = session_with_credential(platform, Some("L1")).await;
        let sdk = Arc::new(MockAuthorizationManager::authorized("L1"));
        let coordinator = ReaderAuthorizationCoordinator::new(session, sdk.clone());

        coordinator.ensure_authorized().await.unwrap();

        assert_eq!(sdk.authorize_calls(), 0);
        assert_eq!(sdk.deauthorize_calls(), 0);
    }

    #[tokio::test]
    async fn test_location_mismatch_repairs_in_order() {
        let platform = Arc::new(MockPlatform::new());
        let session = session_with_credential(platform, Some("L2")).await;
        let sdk = Arc::new(MockAuthorizationManager::authorized("L1"));
        let coordinator = ReaderAuthorizationCoordinator::new(session, sdk.clone());

        coordinator.ensure_authorized().await.unwrap();

        assert_eq!(
            sdk.call_order(),
            vec!["deauthorize".to_string(), "authorize:L2".to_string()]
        );
        assert_eq!(sdk.authorized_location_id().as_deref(), Some("L2"));
    }

    #[tokio::test]
    async fn test_not_authorized_authorizes_directly() {
        let platform = Arc::new(MockPlatform::new());
        let session = session_with_credential(platform, Some("L1")).await;
        let sdk = Arc::new(MockAuthorizationManager::not_authorized());
        let coordinator = ReaderAuthorizationCoordinator::new(session, sdk.clone());

        coordinator.ensure_authorized().await.unwrap();

        assert_eq!(sdk.call_order(), vec!["authorize:L1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_location_rechecks_then_retries_once() {
        let platform = Arc::new(MockPlatform::new());
        // The re-check recovers the missing location from the backend.
        platform.queue_status(Ok(AuthStatus::Connected(grant(Some("L3")))));
        let session = session_with_credential(platform.clone(), None).await;
        let sdk = Arc::new(MockAuthorizationManager::not_authorized());
        let coordinator = ReaderAuthorizationCoordinator::new(session.clone(), sdk.clone());

        coordinator.ensure_authorized().await.unwrap();

        assert_eq!(platform.status_calls(), 1);
        assert_eq!(sdk.call_order(), vec!["authorize:L3".to_string()]);
        assert_eq!(session.phase().await, AuthPhase::Authenticated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_location_fails_after_single_retry() {
        let platform = Arc::new(MockPlatform::new());
        // Backend still returns no location.
        platform.queue_status(Ok(AuthStatus::Connected(grant(None))));
        let session = session_with_credential(platform.clone(), None).await;
        let sdk = Arc::new(MockAuthorizationManager::not_authorized());
        let coordinator = ReaderAuthorizationCoordinator::new(session, sdk.clone());

        let err = coordinator.ensure_authorized().await.unwrap_err();

        assert!(matches!(err, KioskError::MissingLocation));
        assert_eq!(sdk.authorize_calls(), 0);
    }

    #[tokio::test]
    async fn test_location_shaped_failure_is_named() {
        let platform = Arc::new(MockPlatform::new());
        let session = session_with_credential(platform, Some("L1")).await;
        let sdk = Arc::new(MockAuthorizationManager::not_authorized());
        sdk.fail_next_authorize("location not found for merchant");
        let coordinator = ReaderAuthorizationCoordinator::new(session, sdk);

        let err = coordinator.ensure_authorized().await.unwrap_err();

        assert!(matches!(err, KioskError::Location(_)));
        assert_eq!(err.user_message(), "Reconnect to the payment platform");
    }

    #[tokio::test]
    async fn test_unauthenticated_session_is_an_error() {
        let platform = Arc::new(MockPlatform::new());
        let session = crate::testutil::fresh_session(platform);
        let sdk = Arc::new(MockAuthorizationManager::not_authorized());
        let coordinator = ReaderAuthorizationCoordinator::new(session, sdk.clone());

        let err = coordinator.ensure_authorized().await.unwrap_err();

        assert!(matches!(err, KioskError::NotAuthenticated));
        assert_eq!(sdk.authorize_calls(), 0);
    }
}
