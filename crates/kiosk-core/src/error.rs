//! # Kiosk Error Types
//!
//! Typed error handling for the tap-kiosk payment core.
//! All fallible operations return `Result<T, KioskError>`.

use thiserror::Error;

/// Core error type for authentication and payment operations
#[derive(Debug, Clone, Error)]
pub enum KioskError {
    /// Configuration errors (missing env vars, invalid config)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Network/transport failure talking to the platform backend
    #[error("Network error: {0}")]
    Network(String),

    /// Backend returned a 5xx status
    #[error("Server error [{status}]: {message}")]
    Server { status: u16, message: String },

    /// Backend returned a 4xx status other than 401/403
    #[error("Client error [{status}]: {message}")]
    Client { status: u16, message: String },

    /// Backend rejected the credentials (401/403)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The device is not connected to the payment platform
    #[error("Device is not connected to the payment platform")]
    NotConnected,

    /// Token refresh was rejected; a full re-authorization is required
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// An authorization flow is already in progress
    #[error("An authorization attempt is already in progress")]
    AuthorizationInProgress,

    /// The backend rejected the polling correlation state
    #[error("Authorization state was rejected by the platform")]
    InvalidCorrelationState,

    /// The OAuth polling loop exceeded its hard timeout
    #[error("Authorization timed out after {0} seconds")]
    AuthorizationTimeout(u64),

    /// A payment was requested while unauthenticated
    #[error("Not signed in to the payment platform")]
    NotAuthenticated,

    /// The hardware SDK is not authorized
    #[error("Card reader is not authorized")]
    ReaderNotAuthorized,

    /// No reader is connected and ready
    #[error("No card reader is ready")]
    NoReaderReady,

    /// Credential has merchant/tokens but no location id
    #[error("No location is assigned to this device")]
    MissingLocation,

    /// Reader authorization failed in a location-shaped way
    #[error("Location error: {0}")]
    Location(String),

    /// Order creation collaborator failed
    #[error("Order creation failed: {0}")]
    OrderCreation(String),

    /// Payment was declined or failed at the reader
    #[error("Payment failed: {0}")]
    PaymentFailed(String),

    /// Customer abandoned the payment at the reader
    #[error("Payment canceled")]
    PaymentCanceled,

    /// Local storage failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not happen)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl KioskError {
    /// Returns true if this error is worth retrying with backoff.
    ///
    /// Transient network failures and 5xx responses are retryable;
    /// everything else is definitive and must be surfaced.
    pub fn is_retryable(&self) -> bool {
        matches!(self, KioskError::Network(_) | KioskError::Server { .. })
    }

    /// Returns true if this error means the credentials themselves are bad
    /// and a refresh (or full re-authorization) is required.
    pub fn is_authorization_failure(&self) -> bool {
        matches!(
            self,
            KioskError::Unauthorized(_) | KioskError::RefreshFailed(_)
        )
    }

    /// Short operator-facing message, never a raw transport error.
    pub fn user_message(&self) -> &'static str {
        match self {
            KioskError::Network(_) | KioskError::Server { .. } => "Check your connection",
            KioskError::Unauthorized(_)
            | KioskError::RefreshFailed(_)
            | KioskError::NotConnected
            | KioskError::NotAuthenticated
            | KioskError::InvalidCorrelationState
            | KioskError::AuthorizationTimeout(_)
            | KioskError::MissingLocation
            | KioskError::Location(_)
            | KioskError::ReaderNotAuthorized => "Reconnect to the payment platform",
            KioskError::PaymentFailed(_) => "Payment declined",
            KioskError::PaymentCanceled => "Payment canceled",
            KioskError::NoReaderReady => "Connect a card reader",
            _ => "Something went wrong",
        }
    }
}

/// Result type alias for kiosk operations
pub type KioskResult<T> = Result<T, KioskError>;
