//! SenML records and packs (RFC 8428).
//!
//! A [`Pack`] is the unit of publication. It goes through two steps before it
//! reaches the wire, in this order:
//!
//! 1. [`Pack::validate`] checks names, value fields and base versions.
//! 2. [`Pack::normalize_at`] validates and then resolves every base field into
//!    absolute per-record values, producing a [`Normalized`] pack.
//!
//! Only a [`Normalized`] pack is handed to the publish path.

use serde::{Deserialize, Serialize};

use crate::core::ValidationError;

/// Times below 2^28 seconds are relative to "now".
pub const RELATIVE_TIME_THRESHOLD: f64 = 268_435_456.0;

/// SenML version assumed when `bver` is absent.
pub const DEFAULT_VERSION: i64 = 10;

/// One SenML record.
///
/// Field names follow the JSON labels of RFC 8428. At most one of `v`, `vs`,
/// `vb` and `vd` may be present; [`Pack::validate`] enforces it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Base name, prefixed to this and following record names.
    #[serde(rename = "bn", default, skip_serializing_if = "Option::is_none")]
    pub base_name: Option<String>,

    /// Base time, added to this and following record times.
    #[serde(rename = "bt", default, skip_serializing_if = "Option::is_none")]
    pub base_time: Option<f64>,

    /// Base unit, used when a record has no unit.
    #[serde(rename = "bu", default, skip_serializing_if = "Option::is_none")]
    pub base_unit: Option<String>,

    /// Base value, added to numeric values.
    #[serde(rename = "bv", default, skip_serializing_if = "Option::is_none")]
    pub base_value: Option<f64>,

    /// Base sum, added to sums.
    #[serde(rename = "bs", default, skip_serializing_if = "Option::is_none")]
    pub base_sum: Option<f64>,

    /// Base version.
    #[serde(rename = "bver", default, skip_serializing_if = "Option::is_none")]
    pub base_version: Option<i64>,

    /// Name, relative to the current base name.
    #[serde(rename = "n", default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Unit.
    #[serde(rename = "u", default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    /// Numeric value.
    #[serde(rename = "v", default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,

    /// String value.
    #[serde(rename = "vs", default, skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,

    /// Boolean value.
    #[serde(rename = "vb", default, skip_serializing_if = "Option::is_none")]
    pub bool_value: Option<bool>,

    /// Opaque data value (base64url in JSON, byte string in CBOR).
    #[serde(
        rename = "vd",
        default,
        skip_serializing_if = "Option::is_none",
        with = "data_value"
    )]
    pub data_value: Option<Vec<u8>>,

    /// Integrated sum.
    #[serde(rename = "s", default, skip_serializing_if = "Option::is_none")]
    pub sum: Option<f64>,

    /// Time, relative to the current base time.
    #[serde(rename = "t", default, skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,

    /// Maximum seconds before an update is expected.
    #[serde(rename = "ut", default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<f64>,
}

/// Borrowed view of the single value carried by a record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecordValue<'a> {
    /// `v`
    Number(f64),
    /// `vs`
    String(&'a str),
    /// `vb`
    Bool(bool),
    /// `vd`
    Data(&'a [u8]),
}

impl Record {
    /// Record with a numeric value.
    pub fn number(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value: Some(value),
            ..Self::default()
        }
    }

    /// Record with a string value.
    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            string_value: Some(value.into()),
            ..Self::default()
        }
    }

    /// Record with a boolean value.
    pub fn boolean(name: impl Into<String>, value: bool) -> Self {
        Self {
            name: name.into(),
            bool_value: Some(value),
            ..Self::default()
        }
    }

    /// Set the base name.
    pub fn with_base_name(mut self, base_name: impl Into<String>) -> Self {
        self.base_name = Some(base_name.into());
        self
    }

    /// Set the base time (seconds since the Unix epoch).
    pub fn with_base_time(mut self, base_time: f64) -> Self {
        self.base_time = Some(base_time);
        self
    }

    /// Set the unit.
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// The value carried by this record, if exactly one is present.
    pub fn value(&self) -> Option<RecordValue<'_>> {
        if self.value_count() != 1 {
            return None;
        }
        if let Some(v) = self.value {
            return Some(RecordValue::Number(v));
        }
        if let Some(vs) = &self.string_value {
            return Some(RecordValue::String(vs));
        }
        if let Some(vb) = self.bool_value {
            return Some(RecordValue::Bool(vb));
        }
        self.data_value.as_deref().map(RecordValue::Data)
    }

    fn value_count(&self) -> usize {
        [
            self.value.is_some(),
            self.string_value.is_some(),
            self.bool_value.is_some(),
            self.data_value.is_some(),
        ]
        .into_iter()
        .filter(|present| *present)
        .count()
    }

    fn check_finite(&self, index: usize) -> Result<(), ValidationError> {
        let fields = [
            ("bt", self.base_time),
            ("bv", self.base_value),
            ("bs", self.base_sum),
            ("v", self.value),
            ("s", self.sum),
            ("t", self.time),
            ("ut", self.update_time),
        ];
        match fields
            .into_iter()
            .find(|(_, value)| value.is_some_and(|v| !v.is_finite()))
        {
            Some((field, _)) => Err(ValidationError::NonFinite { index, field }),
            None => Ok(()),
        }
    }
}

/// An ordered sequence of records forming one publish event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pack(Vec<Record>);

impl Pack {
    /// Create an empty pack.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a record.
    pub fn push(&mut self, record: Record) {
        self.0.push(record);
    }

    /// Records in order.
    pub fn records(&self) -> &[Record] {
        &self.0
    }

    /// Iterate over records.
    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.0.iter()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the pack has no records.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check the pack against the SenML record rules.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.0.is_empty() {
            return Err(ValidationError::EmptyPack);
        }

        let mut base_name = "";
        let mut version: Option<i64> = None;

        for (index, record) in self.0.iter().enumerate() {
            if let Some(actual) = record.base_version {
                match version {
                    None => version = Some(actual),
                    Some(expected) if expected != actual => {
                        return Err(ValidationError::VersionMismatch {
                            index,
                            expected,
                            actual,
                        });
                    }
                    Some(_) => {}
                }
            }

            if let Some(bn) = &record.base_name {
                base_name = bn.as_str();
            }

            let name = format!("{base_name}{}", record.name);
            if name.is_empty() {
                return Err(ValidationError::EmptyName { index });
            }
            if !is_valid_name(&name) {
                return Err(ValidationError::InvalidName { index, name });
            }

            record.check_finite(index)?;

            match record.value_count() {
                0 if record.sum.is_none() => {
                    return Err(ValidationError::MissingValue { index });
                }
                0 | 1 => {}
                _ => return Err(ValidationError::MultipleValues { index }),
            }
        }

        Ok(())
    }

    /// Validate, then resolve base fields into absolute per-record values.
    ///
    /// `now` is seconds since the Unix epoch; resolved times below
    /// [`RELATIVE_TIME_THRESHOLD`] are taken as relative to it. Records are
    /// returned in chronological order (stable for equal times).
    pub fn normalize_at(&self, now: f64) -> Result<Normalized, ValidationError> {
        self.validate()?;

        let mut base_name = "";
        let mut base_time = 0.0;
        let mut base_unit: Option<&str> = None;
        let mut base_value = 0.0;
        let mut base_sum = 0.0;
        let mut base_version: Option<i64> = None;

        let mut resolved = Vec::with_capacity(self.0.len());
        for record in &self.0 {
            if let Some(bn) = &record.base_name {
                base_name = bn.as_str();
            }
            if let Some(bt) = record.base_time {
                base_time = bt;
            }
            if let Some(bu) = &record.base_unit {
                base_unit = Some(bu.as_str());
            }
            if let Some(bv) = record.base_value {
                base_value = bv;
            }
            if let Some(bs) = record.base_sum {
                base_sum = bs;
            }
            if record.base_version.is_some() {
                base_version = record.base_version;
            }

            let mut time = base_time + record.time.unwrap_or(0.0);
            if time < RELATIVE_TIME_THRESHOLD {
                time += now;
            }

            resolved.push(Record {
                base_version: base_version.filter(|v| *v != DEFAULT_VERSION),
                name: format!("{base_name}{}", record.name),
                unit: record.unit.clone().or_else(|| base_unit.map(str::to_owned)),
                value: record.value.map(|v| v + base_value),
                string_value: record.string_value.clone(),
                bool_value: record.bool_value,
                data_value: record.data_value.clone(),
                sum: record.sum.map(|s| s + base_sum),
                time: Some(time),
                update_time: record.update_time,
                ..Record::default()
            });
        }

        resolved.sort_by(|a, b| {
            a.time
                .unwrap_or_default()
                .total_cmp(&b.time.unwrap_or_default())
        });

        Ok(Normalized(Pack(resolved)))
    }

    /// Normalize against the current wall clock.
    pub fn normalize(&self) -> Result<Normalized, ValidationError> {
        self.normalize_at(now_seconds())
    }
}

impl From<Vec<Record>> for Pack {
    fn from(records: Vec<Record>) -> Self {
        Self(records)
    }
}

impl FromIterator<Record> for Pack {
    fn from_iter<I: IntoIterator<Item = Record>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Pack {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// A validated pack whose records carry absolute names and times.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized(Pack);

impl Normalized {
    /// The resolved pack.
    pub fn pack(&self) -> &Pack {
        &self.0
    }

    /// Resolved records.
    pub fn records(&self) -> &[Record] {
        self.0.records()
    }

    /// Unwrap into the resolved pack.
    pub fn into_pack(self) -> Pack {
        self.0
    }
}

/// Current wall clock as SenML time (seconds, millisecond resolution).
pub fn now_seconds() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(first) if first.is_ascii_alphanumeric())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | ':' | '.' | '/' | '_'))
}

mod data_value {
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_some(&URL_SAFE_NO_PAD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|encoded| {
                URL_SAFE_NO_PAD
                    .decode(encoded.trim_end_matches('='))
                    .map_err(serde::de::Error::custom)
            })
            .transpose()
    }
}
