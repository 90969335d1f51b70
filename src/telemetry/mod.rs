//! Telemetry sources.
//!
//! A run publishes exactly one batch, produced either from fixed synthesized
//! values ([`FixedLocation`]) or from an externally supplied SenML JSON
//! document ([`TextPayload`]). [`Telemetry`] selects between the two.

mod lwm2m;
mod source;

pub use lwm2m::{ObjectId, geolocation};
pub use source::{FixedLocation, Telemetry, TelemetrySource, TextPayload};
