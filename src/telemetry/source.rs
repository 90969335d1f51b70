//! Producers of the batch published by a run.

use chrono::Utc;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::core::{DecodeError, TelemetryError};
use crate::senml::{self, Pack, Record};

use super::lwm2m::{ObjectId, geolocation};

/// Supplies the record set for one publish event.
pub trait TelemetrySource: Send {
    /// Produce the batch. Called once per run, after the state fetch.
    fn produce(&mut self) -> Result<Pack, TelemetryError>;
}

/// A fixed geolocation fix stamped with the current time.
///
/// The base time is in epoch milliseconds, the unit the ingestion endpoint
/// expects on `/msg/d2c/raw` (SenML itself counts seconds).
#[derive(Debug, Clone)]
pub struct FixedLocation {
    instance: u16,
    latitude: f64,
    longitude: f64,
    accuracy: f64,
    source: String,
    base_time: Option<f64>,
}

impl Default for FixedLocation {
    fn default() -> Self {
        Self {
            instance: 0,
            latitude: 62.469414,
            longitude: 6.151946,
            accuracy: 1.0,
            source: "Fixed".to_string(),
            base_time: None,
        }
    }
}

impl FixedLocation {
    /// The default fix (Ålesund, accuracy 1 m).
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the coordinates.
    pub fn with_position(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = latitude;
        self.longitude = longitude;
        self
    }

    /// Pin the base time (epoch milliseconds) instead of reading the clock.
    pub fn with_base_time(mut self, millis: f64) -> Self {
        self.base_time = Some(millis);
        self
    }

    /// Build the pack without consuming the source.
    pub fn pack(&self) -> Pack {
        let base_time = self.base_time.unwrap_or_else(now_millis);
        Pack::from(vec![
            Record::number(geolocation::LATITUDE, self.latitude)
                .with_base_name(ObjectId::Geolocation.base_name(self.instance))
                .with_base_time(base_time),
            Record::number(geolocation::LONGITUDE, self.longitude),
            Record::number(geolocation::ACCURACY, self.accuracy),
            Record::string(geolocation::SOURCE, self.source.clone()),
        ])
    }
}

fn now_millis() -> f64 {
    Utc::now().timestamp_millis() as f64
}

impl TelemetrySource for FixedLocation {
    fn produce(&mut self) -> Result<Pack, TelemetryError> {
        Ok(self.pack())
    }
}

/// SenML JSON supplied from outside the process (typically stdin).
#[derive(Debug, Clone)]
pub struct TextPayload {
    bytes: Vec<u8>,
}

impl TextPayload {
    /// Wrap raw text input. Decoding happens on [`TelemetrySource::produce`].
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Read all of `reader` (typically stdin). Read failures surface here,
    /// before any session is opened.
    pub async fn read_from<R>(mut reader: R) -> Result<Self, TelemetryError>
    where
        R: AsyncRead + Unpin,
    {
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .await
            .map_err(DecodeError::from)?;
        Ok(Self::new(bytes))
    }

    /// Decode the text form.
    pub fn read(bytes: &[u8]) -> Result<Pack, TelemetryError> {
        Ok(senml::decode_json(bytes)?)
    }
}

impl TelemetrySource for TextPayload {
    fn produce(&mut self) -> Result<Pack, TelemetryError> {
        Self::read(&self.bytes)
    }
}

/// The telemetry mode of a run, with its input.
#[derive(Debug, Clone)]
pub enum Telemetry {
    /// Synthesized geolocation fix.
    Fixed(FixedLocation),
    /// Externally supplied SenML JSON.
    Text(TextPayload),
}

impl TelemetrySource for Telemetry {
    fn produce(&mut self) -> Result<Pack, TelemetryError> {
        match self {
            Self::Fixed(source) => source.produce(),
            Self::Text(source) => source.produce(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::senml::RecordValue;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    struct BrokenPipe;

    impl AsyncRead for BrokenPipe {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "stdin closed")))
        }
    }

    #[test]
    fn test_fixed_location_batch() {
        let pack = FixedLocation::new().with_base_time(1_700_000_000_123.0).pack();

        assert_eq!(pack.len(), 4);
        let first = &pack.records()[0];
        assert_eq!(first.base_name.as_deref(), Some("14201/0/"));
        assert_eq!(first.base_time, Some(1_700_000_000_123.0));

        let values: Vec<_> = pack.iter().map(|r| (r.name.as_str(), r.value())).collect();
        assert_eq!(
            values,
            [
                ("0", Some(RecordValue::Number(62.469414))),
                ("1", Some(RecordValue::Number(6.151946))),
                ("3", Some(RecordValue::Number(1.0))),
                ("6", Some(RecordValue::String("Fixed"))),
            ]
        );
        assert!(pack.validate().is_ok());
    }

    #[test]
    fn test_fixed_location_stamps_epoch_millis() {
        let before = Utc::now().timestamp_millis() as f64;
        let pack = FixedLocation::new().produce().unwrap();
        let after = Utc::now().timestamp_millis() as f64;

        let bt = pack.records()[0].base_time.unwrap();
        assert!((before..=after).contains(&bt), "{before} <= {bt} <= {after}");
        assert_eq!(bt.fract(), 0.0);

        // Far above the relative-time threshold, so normalization keeps it
        let normalized = pack.normalize().unwrap();
        assert!(normalized.records().iter().all(|r| r.time == Some(bt)));
    }

    #[test]
    fn test_text_payload_decodes() {
        let mut source = Telemetry::Text(TextPayload::new(
            r#"[{"bn":"14205/0/","n":"0","v":21.5,"u":"Cel"}]"#,
        ));
        let pack = source.produce().unwrap();
        assert_eq!(pack.records()[0].unit.as_deref(), Some("Cel"));
    }

    #[test]
    fn test_text_payload_malformed() {
        let mut source = TextPayload::new("not senml");
        assert!(matches!(
            source.produce(),
            Err(TelemetryError::Decode(DecodeError::Json(_)))
        ));
    }

    #[tokio::test]
    async fn test_text_payload_read_from_reader() {
        let input = &br#"[{"n":"14203/0/0","v":-90}]"#[..];
        let mut source = TextPayload::read_from(input).await.unwrap();
        assert_eq!(source.produce().unwrap().records()[0].name, "14203/0/0");
    }

    #[tokio::test]
    async fn test_text_payload_read_failure_is_typed() {
        let err = TextPayload::read_from(BrokenPipe).await.unwrap_err();
        match err {
            TelemetryError::Decode(DecodeError::Io(e)) => {
                assert_eq!(e.kind(), io::ErrorKind::BrokenPipe);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
