//! # kiosk-platform
//!
//! HTTP implementation of the `PlatformApi` trait from `kiosk-core`.
//!
//! Talks JSON over HTTPS to the payment platform backend: device
//! authorization, completion polling, status checks, token refresh,
//! disconnect, health probing, and order creation. Configuration comes
//! from the environment or a TOML file.

pub mod client;
pub mod config;

pub use client::PlatformClient;
pub use config::PlatformConfig;
