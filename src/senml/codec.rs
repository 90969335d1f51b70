//! SenML wire forms: CBOR (binary) and JSON (text).
//!
//! CBOR uses the integer labels of RFC 8428 section 6. Unknown integer labels
//! are ignored; unknown text labels ending in `_` are must-understand and
//! rejected.

use ciborium::value::Value;

use super::record::{Pack, Record};
use crate::core::{DecodeError, EncodeError};

/// CBOR integer labels (RFC 8428, Table 4).
pub mod label {
    /// Base version.
    pub const BVER: i64 = -1;
    /// Base name.
    pub const BN: i64 = -2;
    /// Base time.
    pub const BT: i64 = -3;
    /// Base unit.
    pub const BU: i64 = -4;
    /// Base value.
    pub const BV: i64 = -5;
    /// Base sum.
    pub const BS: i64 = -6;
    /// Name.
    pub const N: i64 = 0;
    /// Unit.
    pub const U: i64 = 1;
    /// Value.
    pub const V: i64 = 2;
    /// String value.
    pub const VS: i64 = 3;
    /// Boolean value.
    pub const VB: i64 = 4;
    /// Sum.
    pub const S: i64 = 5;
    /// Time.
    pub const T: i64 = 6;
    /// Update time.
    pub const UT: i64 = 7;
    /// Data value.
    pub const VD: i64 = 8;
}

/// Encode a pack as SenML CBOR.
pub fn encode_cbor(pack: &Pack) -> Result<Vec<u8>, EncodeError> {
    let records = pack.iter().map(record_to_cbor).collect();
    let mut out = Vec::new();
    ciborium::ser::into_writer(&Value::Array(records), &mut out)
        .map_err(|e| EncodeError::Cbor(e.to_string()))?;
    Ok(out)
}

/// Decode SenML CBOR into a pack (as sent, not re-normalized).
pub fn decode_cbor(bytes: &[u8]) -> Result<Pack, DecodeError> {
    let value: Value =
        ciborium::de::from_reader(bytes).map_err(|e| DecodeError::Cbor(e.to_string()))?;

    let Value::Array(items) = value else {
        return Err(DecodeError::Structure("top-level item is not an array".into()));
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| record_from_cbor(index, item))
        .collect::<Result<Vec<_>, _>>()
        .map(Pack::from)
}

/// Encode a pack as SenML JSON.
pub fn encode_json(pack: &Pack) -> Result<Vec<u8>, EncodeError> {
    Ok(serde_json::to_vec(pack)?)
}

/// Decode SenML JSON (the human-editable text form) into a pack.
pub fn decode_json(bytes: &[u8]) -> Result<Pack, DecodeError> {
    Ok(serde_json::from_slice(bytes)?)
}

fn entry(label: i64, value: Value) -> (Value, Value) {
    (Value::Integer(label.into()), value)
}

fn record_to_cbor(record: &Record) -> Value {
    let mut map = Vec::new();

    if let Some(bver) = record.base_version {
        map.push(entry(label::BVER, Value::Integer(bver.into())));
    }
    if let Some(bn) = &record.base_name {
        map.push(entry(label::BN, Value::Text(bn.clone())));
    }
    if let Some(bt) = record.base_time {
        map.push(entry(label::BT, Value::Float(bt)));
    }
    if let Some(bu) = &record.base_unit {
        map.push(entry(label::BU, Value::Text(bu.clone())));
    }
    if let Some(bv) = record.base_value {
        map.push(entry(label::BV, Value::Float(bv)));
    }
    if let Some(bs) = record.base_sum {
        map.push(entry(label::BS, Value::Float(bs)));
    }
    if !record.name.is_empty() {
        map.push(entry(label::N, Value::Text(record.name.clone())));
    }
    if let Some(u) = &record.unit {
        map.push(entry(label::U, Value::Text(u.clone())));
    }
    if let Some(v) = record.value {
        map.push(entry(label::V, Value::Float(v)));
    }
    if let Some(vs) = &record.string_value {
        map.push(entry(label::VS, Value::Text(vs.clone())));
    }
    if let Some(vb) = record.bool_value {
        map.push(entry(label::VB, Value::Bool(vb)));
    }
    if let Some(s) = record.sum {
        map.push(entry(label::S, Value::Float(s)));
    }
    if let Some(t) = record.time {
        map.push(entry(label::T, Value::Float(t)));
    }
    if let Some(ut) = record.update_time {
        map.push(entry(label::UT, Value::Float(ut)));
    }
    if let Some(vd) = &record.data_value {
        map.push(entry(label::VD, Value::Bytes(vd.clone())));
    }

    Value::Map(map)
}

fn record_from_cbor(index: usize, item: Value) -> Result<Record, DecodeError> {
    let Value::Map(entries) = item else {
        return Err(DecodeError::Structure(format!("record {index} is not a map")));
    };

    let mut record = Record::default();
    for (key, value) in entries {
        let code = match key {
            Value::Integer(code) => i128::from(code),
            Value::Text(name) if name.ends_with('_') => {
                return Err(DecodeError::Structure(format!(
                    "record {index}: unsupported must-understand label {name:?}"
                )));
            }
            _ => continue,
        };

        let field = Field { index, label: code };
        match i64::try_from(code) {
            Ok(label::BVER) => record.base_version = Some(field.integer(value)?),
            Ok(label::BN) => record.base_name = Some(field.text(value)?),
            Ok(label::BT) => record.base_time = Some(field.number(value)?),
            Ok(label::BU) => record.base_unit = Some(field.text(value)?),
            Ok(label::BV) => record.base_value = Some(field.number(value)?),
            Ok(label::BS) => record.base_sum = Some(field.number(value)?),
            Ok(label::N) => record.name = field.text(value)?,
            Ok(label::U) => record.unit = Some(field.text(value)?),
            Ok(label::V) => record.value = Some(field.number(value)?),
            Ok(label::VS) => record.string_value = Some(field.text(value)?),
            Ok(label::VB) => record.bool_value = Some(field.boolean(value)?),
            Ok(label::S) => record.sum = Some(field.number(value)?),
            Ok(label::T) => record.time = Some(field.number(value)?),
            Ok(label::UT) => record.update_time = Some(field.number(value)?),
            Ok(label::VD) => record.data_value = Some(field.bytes(value)?),
            _ => {}
        }
    }

    Ok(record)
}

/// Position of a CBOR field, for error messages.
struct Field {
    index: usize,
    label: i128,
}

impl Field {
    fn mismatch(&self, expected: &str) -> DecodeError {
        DecodeError::Structure(format!(
            "record {}: label {} is not {expected}",
            self.index, self.label
        ))
    }

    fn number(&self, value: Value) -> Result<f64, DecodeError> {
        match value {
            Value::Float(f) => Ok(f),
            Value::Integer(i) => Ok(i128::from(i) as f64),
            _ => Err(self.mismatch("a number")),
        }
    }

    fn integer(&self, value: Value) -> Result<i64, DecodeError> {
        match value {
            Value::Integer(i) => i64::try_from(i128::from(i)).map_err(|_| self.mismatch("an i64")),
            _ => Err(self.mismatch("an integer")),
        }
    }

    fn text(&self, value: Value) -> Result<String, DecodeError> {
        match value {
            Value::Text(s) => Ok(s),
            _ => Err(self.mismatch("a text string")),
        }
    }

    fn boolean(&self, value: Value) -> Result<bool, DecodeError> {
        match value {
            Value::Bool(b) => Ok(b),
            _ => Err(self.mismatch("a boolean")),
        }
    }

    fn bytes(&self, value: Value) -> Result<Vec<u8>, DecodeError> {
        match value {
            Value::Bytes(b) => Ok(b),
            _ => Err(self.mismatch("a byte string")),
        }
    }
}
