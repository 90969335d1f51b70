//! Device session client.
//!
//! Loads credentials, opens a secure session, authenticates, fetches the
//! device state and publishes one telemetry batch.

mod bootstrap;
#[allow(clippy::module_inception)]
mod client;
mod config;
mod error;
mod manager;

pub use bootstrap::{DeviceIdentity, KeySource};
pub use client::{DeviceClient, DeviceState, ServerState, SessionReport};
pub use config::{ClientConfig, ClientConfigBuilder};
pub use error::{ClientError, Phase};
pub use manager::{SessionGuard, SessionManager};
