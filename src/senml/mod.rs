//! SenML telemetry codec.
//!
//! The device protocol only needs four things from this module: decode the
//! text form, validate, normalize, and encode the binary form. Everything else
//! here exists so that those four are faithful to RFC 8428.

mod codec;
mod record;

pub use codec::{decode_cbor, decode_json, encode_cbor, encode_json, label};
pub use record::{
    DEFAULT_VERSION, Normalized, Pack, RELATIVE_TIME_THRESHOLD, Record, RecordValue, now_seconds,
};
