//! # coap-device-sim
//!
//! Simulates an IoT device talking to a cloud ingestion service over CoAP on
//! a secure datagram session.
//!
//! One session runs four phases in order:
//!
//! - **Authenticate**: POST a short-lived ES256 JWT to `/auth/jwt`
//! - **Fetch state**: GET `/state`
//! - **Publish**: POST a SenML CBOR batch to `/msg/d2c/raw`
//! - **Close**: tear the session down, whatever happened before
//!
//! ## Feature Flags
//!
//! - `dtls` (default): CoAP over DTLS 1.2, the binding the ingestion endpoint speaks
//! - `noise`: Noise_NX over UDP, for loopback endpoints without certificates
//!
//! ## Modules
//!
//! - [`core`]: Constants and leaf error types
//! - [`crypto`]: Signing keys, tokens and pinned server identities
//! - [`transport`]: The session seams and the DTLS and Noise bindings
//! - [`coap`]: CoAP messages and the request/response session
//! - [`senml`]: SenML records, validation and codecs
//! - [`telemetry`]: LwM2M objects and telemetry sources
//! - [`client`]: The device session state machine
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use coap_device_sim::prelude::*;
//!
//! # async fn run() -> Result<(), ClientError> {
//! let config = ClientConfig::builder()
//!     .device_id("dev-001")
//!     .insecure_skip_verify(true)
//!     .build()?;
//!
//! let mut client = DeviceClient::new(config);
//! let report = client.simulate(&mut FixedLocation::new()).await?;
//! println!("published {} records", report.records);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod core;

pub mod crypto;

pub mod transport;

pub mod coap;

pub mod senml;

pub mod telemetry;

pub mod client;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::*;

    pub use crate::client::{
        ClientConfig, ClientConfigBuilder, ClientError, DeviceClient, DeviceIdentity, DeviceState,
        KeySource, Phase, SessionReport,
    };

    pub use crate::senml::{Pack, Record};

    pub use crate::telemetry::{FixedLocation, Telemetry, TelemetrySource, TextPayload};

    pub use crate::transport::{Connector, Session, SessionConfig, TransportError};

    #[cfg(feature = "dtls")]
    pub use crate::transport::DtlsConnector;

    #[cfg(feature = "noise")]
    pub use crate::transport::NoiseConnector;
}

// Re-export commonly used items at crate root
pub use crate::client::{ClientConfig, ClientError, DeviceClient, DeviceState};
pub use crate::core::{CredentialError, TelemetryError};
pub use crate::senml::Pack;
