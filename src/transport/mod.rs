//! Secure datagram transport.
//!
//! The protocol client only sees the [`Connector`] and [`Session`] seams.
//! Two bindings are bundled:
//!
//! - `dtls` (default): CoAP over DTLS 1.2 via `webrtc-dtls`, as spoken by
//!   the ingestion endpoint
//! - `noise`: CoAP over a Noise_NX-secured UDP channel, for loopback
//!   endpoints without certificates
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   DeviceClient (auth, state, publish)   │
//! ├─────────────────────────────────────────┤
//! │   CoapSession        (crate::coap)      │
//! ├─────────────────────────────────────────┤
//! │   DtlsLink  |  SecureChannel (Noise)    │  ← This module
//! ├─────────────────────────────────────────┤
//! │              UDP                        │
//! └─────────────────────────────────────────┘
//! ```

mod error;
mod traits;
#[cfg(any(feature = "dtls", feature = "noise"))]
mod udp;

#[cfg(feature = "dtls")]
mod dtls;

#[cfg(feature = "noise")]
mod channel;
#[cfg(feature = "noise")]
mod connector;
#[cfg(feature = "noise")]
mod frame;
#[cfg(feature = "noise")]
mod replay;

pub use error::*;
pub use traits::{Connector, DatagramLink, Session, SessionConfig};

#[cfg(feature = "dtls")]
#[cfg_attr(docsrs, doc(cfg(feature = "dtls")))]
pub use dtls::{DtlsConnector, DtlsLink, certificate_fingerprint};

#[cfg(feature = "noise")]
#[cfg_attr(docsrs, doc(cfg(feature = "noise")))]
pub use channel::{Inbound, SecureChannel, open_frame, seal_frame};
#[cfg(feature = "noise")]
#[cfg_attr(docsrs, doc(cfg(feature = "noise")))]
pub use connector::NoiseConnector;
#[cfg(feature = "noise")]
#[cfg_attr(docsrs, doc(cfg(feature = "noise")))]
pub use frame::*;
#[cfg(feature = "noise")]
#[cfg_attr(docsrs, doc(cfg(feature = "noise")))]
pub use replay::NonceWindow;
