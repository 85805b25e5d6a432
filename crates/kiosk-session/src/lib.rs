//! # kiosk-session
//!
//! Stateful orchestration for the tap-kiosk payment core:
//!
//! - [`AuthSession`]: the device-pairing OAuth lifecycle and the single
//!   writer of the persisted credential
//! - [`ReaderAuthorizationCoordinator`]: keeps the hardware SDK's
//!   authorization in step with the credential
//! - [`PaymentOrchestrator`]: precondition checks, order resolution,
//!   idempotency keys, and exactly-once payment outcomes
//! - [`KioskRuntime`]: the composition root and background tasks
//!
//! Types and trait seams live in `kiosk-core`; the HTTP backend client
//! lives in `kiosk-platform`.

pub mod auth;
pub mod payment;
pub mod reader;
pub mod runtime;

#[cfg(test)]
mod testutil;

pub use auth::{AuthPhase, AuthSession};
pub use payment::{PaymentOrchestrator, PaymentOutcome, PaymentRequest};
pub use reader::ReaderAuthorizationCoordinator;
pub use runtime::{KioskRuntime, SdkHandles};
