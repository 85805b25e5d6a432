//! # Idempotency Ledger
//!
//! Persistent map from transaction id to idempotency key. A transaction
//! retried after a crash must reuse the same key, or at-most-once payment
//! delivery is violated. Every mutation is written through to the
//! backing store before the key is handed out.

use crate::error::KioskResult;
use crate::store::{keys, CredentialStore};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

/// How long a key is retained after creation.
pub const RETENTION_HOURS: i64 = 24;

/// Extra margin beyond retention before a record is pruned, so a key is
/// never dropped while a same-day retry could still legitimately need it.
pub const PRUNE_MARGIN_HOURS: i64 = 1;

/// One ledger entry. The creation time is a first-class field; it is
/// never encoded into (or parsed out of) the transaction id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
}

/// Persistent transaction-id → idempotency-key map with time-based expiry.
pub struct IdempotencyLedger {
    store: Arc<dyn CredentialStore>,
    records: Mutex<HashMap<String, IdempotencyRecord>>,
}

impl IdempotencyLedger {
    /// Load the ledger from the backing store; absence means empty.
    pub fn load(store: Arc<dyn CredentialStore>) -> KioskResult<Self> {
        let records = match store.get(keys::IDEMPOTENCY_LEDGER)? {
            Some(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                // A corrupt ledger is not worth bricking the kiosk over;
                // fresh keys are still idempotent per transaction.
                tracing::warn!("Discarding unreadable idempotency ledger: {}", e);
                HashMap::new()
            }),
            None => HashMap::new(),
        };
        Ok(Self {
            store,
            records: Mutex::new(records),
        })
    }

    /// Return the key for `transaction_id`, minting and persisting a fresh
    /// one on first sight. Repeated calls always return the identical key.
    pub fn get_or_create_key(&self, transaction_id: &str) -> KioskResult<String> {
        let mut records = self.records.lock().expect("ledger lock poisoned");
        if let Some(record) = records.get(transaction_id) {
            debug!(transaction_id, "Reusing existing idempotency key");
            return Ok(record.idempotency_key.clone());
        }

        let record = IdempotencyRecord {
            idempotency_key: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
        };
        let key = record.idempotency_key.clone();
        records.insert(transaction_id.to_string(), record);
        self.persist(&records)?;
        debug!(transaction_id, "Minted new idempotency key");
        Ok(key)
    }

    /// Remove the record for a finally-settled transaction.
    pub fn remove(&self, transaction_id: &str) -> KioskResult<()> {
        let mut records = self.records.lock().expect("ledger lock poisoned");
        if records.remove(transaction_id).is_some() {
            self.persist(&records)?;
        }
        Ok(())
    }

    /// Drop records older than the retention window plus margin.
    /// Run on startup and on a daily cadence thereafter.
    pub fn prune(&self, now: DateTime<Utc>) -> KioskResult<usize> {
        let cutoff = now - Duration::hours(RETENTION_HOURS + PRUNE_MARGIN_HOURS);
        let mut records = self.records.lock().expect("ledger lock poisoned");
        let before = records.len();
        records.retain(|_, record| record.created_at > cutoff);
        let pruned = before - records.len();
        if pruned > 0 {
            self.persist(&records)?;
            info!(pruned, "Pruned expired idempotency records");
        }
        Ok(pruned)
    }

    /// Number of live records (for diagnostics and tests).
    pub fn len(&self) -> usize {
        self.records.lock().expect("ledger lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn persist(&self, records: &HashMap<String, IdempotencyRecord>) -> KioskResult<()> {
        let json = serde_json::to_string(records)
            .map_err(|e| crate::error::KioskError::Serialization(e.to_string()))?;
        self.store.put(keys::IDEMPOTENCY_LEDGER, &json)
    }
}
