//! # kiosk-core
//!
//! Core types and traits for the tap-kiosk payment core.
//!
//! This crate provides:
//! - `KioskError` for typed error handling across the core
//! - `Credential`, `OrganizationId`, and `PendingAuthorization` models
//! - `CredentialStore` trait with in-memory and file-backed impls
//! - `IdempotencyLedger` for at-most-once payment submission
//! - `PlatformApi` trait over the payment platform backend
//! - Hardware SDK seams (`AuthorizationManager`, `ReaderManager`,
//!   `PaymentManager`) and the `SessionEvents` bus
//!
//! The stateful orchestration (auth session, reader coordinator, payment
//! orchestrator) lives in `kiosk-session`; the HTTP backend client lives
//! in `kiosk-platform`.

pub mod credential;
pub mod error;
pub mod events;
pub mod ledger;
pub mod platform;
pub mod reader;
pub mod store;

// Re-exports for convenience
pub use credential::{
    Credential, OrganizationId, PendingAuthorization, AUTHORIZATION_TIMEOUT_SECS,
};
pub use error::{KioskError, KioskResult};
pub use events::{SessionEvent, SessionEvents};
pub use ledger::{IdempotencyLedger, IdempotencyRecord};
pub use platform::{
    AuthStatus, AuthorizationGrantRequest, ConnectionGrant, CreatedOrder, OrderRequest,
    PlatformApi, PollOutcome,
};
pub use reader::{
    AuthorizationManager, PaymentDelegate, PaymentManager, ProcessingMode, ReaderInfo,
    ReaderManager, ReaderState, SdkAuthorizationState, SdkPaymentRequest,
};
pub use store::{CredentialStore, JsonFileStore, MemoryStore};
