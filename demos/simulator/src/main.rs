//! Device simulator.
//!
//! Runs one device session against a CoAP ingestion endpoint: authenticate,
//! fetch state, publish one telemetry batch, close.
//!
//! Environment variables (flags take precedence):
//! - DEVICE_ID: device identity (required)
//! - DEVICE_KEY_FILE: explicit PEM key path
//! - DEVICE_KEY_DIR: directory for `<id>.key` lookup (default `certificates`)
//! - COAP_ENDPOINT: `host:port`
//! - COAP_SERVER_CERT_SHA256: hex SHA-256 fingerprint of the server certificate
//! - COAP_INSECURE: skip server certificate verification
//! - RUST_LOG: log filter (default `info`)
//!
//! Exit status is zero after a successful publish and the error's exit code
//! otherwise.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use coap_device_sim::client::{ClientConfig, ClientError, DeviceClient, KeySource};
use coap_device_sim::core::{DEFAULT_ENDPOINT, DEFAULT_KEY_DIR};
use coap_device_sim::crypto::parse_fingerprint;
use coap_device_sim::telemetry::{FixedLocation, Telemetry, TextPayload};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Where the published batch comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TelemetryMode {
    /// Built-in geolocation reading.
    Fixed,
    /// SenML JSON read from stdin.
    Stdin,
}

/// Simulate one CoAP device session.
#[derive(Parser, Debug)]
#[command(name = "coap-device-simulator")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Device identity
    #[arg(short, long, env = "DEVICE_ID")]
    device_id: String,

    /// PEM-encoded P-256 key, PKCS#8 or SEC1 (default: <key-dir>/<device-id>.key)
    #[arg(short, long, env = "DEVICE_KEY_FILE")]
    key_file: Option<PathBuf>,

    /// Directory searched for <device-id>.key
    #[arg(long, env = "DEVICE_KEY_DIR", default_value = DEFAULT_KEY_DIR)]
    key_dir: PathBuf,

    /// Ingestion endpoint, host:port
    #[arg(short, long, env = "COAP_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// SHA-256 fingerprint of the server certificate, hex with optional colons
    #[arg(long, env = "COAP_SERVER_CERT_SHA256", value_parser = parse_server_cert)]
    server_cert_sha256: Option<[u8; 32]>,

    /// Skip server certificate verification
    #[arg(long, env = "COAP_INSECURE")]
    insecure: bool,

    /// Do not request a DTLS connection identifier
    #[arg(long)]
    no_connection_id: bool,

    /// Telemetry source
    #[arg(short, long, value_enum, default_value_t = TelemetryMode::Fixed)]
    telemetry: TelemetryMode,

    /// Deadline for each protocol phase, in seconds
    #[arg(long, default_value_t = 30)]
    phase_timeout: u64,
}

fn parse_server_cert(value: &str) -> Result<[u8; 32], String> {
    parse_fingerprint(value).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(phase = %e.phase(), exit_code = e.exit_code(), "{e}");
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: Cli) -> Result<(), ClientError> {
    let key_source = match cli.key_file {
        Some(path) => KeySource::Path(path),
        None => KeySource::Convention { dir: cli.key_dir },
    };

    let mut builder = ClientConfig::builder()
        .device_id(cli.device_id)
        .key_source(key_source)
        .endpoint(cli.endpoint)
        .insecure_skip_verify(cli.insecure)
        .connection_id(!cli.no_connection_id)
        .phase_timeout(Duration::from_secs(cli.phase_timeout));
    if let Some(fingerprint) = cli.server_cert_sha256 {
        builder = builder.server_certificate(fingerprint);
    }
    let config = builder.build()?;

    let mut telemetry = match cli.telemetry {
        TelemetryMode::Fixed => Telemetry::Fixed(FixedLocation::new()),
        TelemetryMode::Stdin => {
            Telemetry::Text(TextPayload::read_from(tokio::io::stdin()).await?)
        }
    };

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, closing session");
                cancel.cancel();
            }
        }
    });

    let mut client = DeviceClient::new(config).with_cancellation(cancel);
    let report = client.simulate(&mut telemetry).await?;

    info!(
        records = report.records,
        bytes = report.payload_len,
        state_bytes = report.server_state.len(),
        "session complete"
    );
    if let Some(e) = report.close_error {
        warn!(error = %e, "session was not closed cleanly");
    }
    Ok(())
}
