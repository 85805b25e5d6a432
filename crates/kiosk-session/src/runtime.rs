//! # Kiosk Runtime
//!
//! Composition root. Wires the platform client, credential store, and
//! hardware SDK seams into the session, coordinator, and orchestrator,
//! and owns the background tasks (health monitor, daily ledger prune,
//! resumed authorization polling).

use crate::auth::AuthSession;
use crate::payment::PaymentOrchestrator;
use crate::reader::ReaderAuthorizationCoordinator;
use anyhow::Context;
use chrono::Utc;
use kiosk_core::{
    AuthorizationManager, CredentialStore, IdempotencyLedger, PaymentManager, PlatformApi,
    ReaderManager,
};
use kiosk_platform::{PlatformClient, PlatformConfig};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Cadence of the idempotency-ledger prune.
pub const LEDGER_PRUNE_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Hardware SDK seams handed to the runtime by the host application.
pub struct SdkHandles {
    pub authorization: Arc<dyn AuthorizationManager>,
    pub readers: Arc<dyn ReaderManager>,
    pub payments: Arc<dyn PaymentManager>,
}

/// Everything a kiosk host needs, fully wired.
pub struct KioskRuntime {
    pub session: Arc<AuthSession>,
    pub reader_authorization: Arc<ReaderAuthorizationCoordinator>,
    pub payments: Arc<PaymentOrchestrator>,
    pub ledger: Arc<IdempotencyLedger>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl KioskRuntime {
    /// Build the runtime from configuration, a credential store, and the
    /// hardware SDK handles. Does not touch the network.
    pub fn new(
        config: PlatformConfig,
        store: Arc<dyn CredentialStore>,
        sdk: SdkHandles,
    ) -> anyhow::Result<Arc<Self>> {
        let organization_id = config.organization_id.clone();
        let device_id = config.device_id.clone();
        let platform: Arc<dyn PlatformApi> =
            Arc::new(PlatformClient::new(config).context("platform client")?);

        let session = AuthSession::new(
            platform.clone(),
            store.clone(),
            organization_id,
            device_id,
        )
        .context("auth session")?;
        let ledger =
            Arc::new(IdempotencyLedger::load(store).context("idempotency ledger")?);
        let reader_authorization = Arc::new(ReaderAuthorizationCoordinator::new(
            session.clone(),
            sdk.authorization.clone(),
        ));
        let payments = Arc::new(PaymentOrchestrator::new(
            session.clone(),
            platform,
            sdk.authorization,
            sdk.readers,
            sdk.payments,
            ledger.clone(),
        ));

        Ok(Arc::new(Self {
            session,
            reader_authorization,
            payments,
            ledger,
            tasks: std::sync::Mutex::new(Vec::new()),
        }))
    }

    /// Start background work: resume any persisted authorization flow,
    /// run the session/SDK health monitor, and prune the ledger now and
    /// daily thereafter.
    pub async fn start(self: &Arc<Self>) {
        self.session.resume().await;

        let health = self.payments.start_health_monitor();
        let prune = self.spawn_ledger_prune();

        let mut tasks = self.tasks.lock().expect("task list lock poisoned");
        tasks.push(health);
        tasks.push(prune);
        info!("Kiosk runtime started");
    }

    /// Stop background tasks. Safe to call more than once.
    pub fn shutdown(&self) {
        let mut tasks = self.tasks.lock().expect("task list lock poisoned");
        for task in tasks.drain(..) {
            task.abort();
        }
        info!("Kiosk runtime stopped");
    }

    fn spawn_ledger_prune(&self) -> JoinHandle<()> {
        let ledger = self.ledger.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(
                LEDGER_PRUNE_INTERVAL_SECS,
            ));
            // The first tick fires immediately: prune on startup.
            loop {
                interval.tick().await;
                if let Err(e) = ledger.prune(Utc::now()) {
                    warn!("Ledger prune failed: {}", e);
                }
            }
        })
    }
}

impl Drop for KioskRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}
