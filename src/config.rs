//! Harness configuration loading from environment variables.
//!
//! All values come from `FLEETCHECK_*` environment variables with safe
//! defaults. Invalid values fall back to defaults without crashing.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `FLEETCHECK_INSTANCES` | 20 | Number of instances in the fleet |
//! | `FLEETCHECK_ROUNDS` | 2 | Rounds of echo + metadata checks |
//! | `FLEETCHECK_BLOB_SIZE` | 10485760 | Echo blob size (bytes) |
//! | `FLEETCHECK_CONNECT_TIMEOUT_SECS` | 5 | Channel connect timeout |
//! | `FLEETCHECK_IO_TIMEOUT_SECS` | 20 | Channel read/write timeout |
//! | `FLEETCHECK_TOKEN_TTL_SECS` | 60 | Session token TTL per round |
//! | `FLEETCHECK_MMDS_SIZE_LIMIT` | 51200 | Data store byte limit |
//! | `FLEETCHECK_API_PAYLOAD_LIMIT` | 512000 | Transport payload limit |
//! | `FLEETCHECK_ECHO_PORT` | 5252 | Echo responder port |
//! | `FLEETCHECK_LOG_FORMAT` | json | `json` or `pretty` |

use std::time::Duration;

use serde::Serialize;

use crate::mmds::{
    DEFAULT_API_PAYLOAD_LIMIT, DEFAULT_STORE_LIMIT, MAX_TOKEN_TTL_SECS, MIN_TOKEN_TTL_SECS,
};
use crate::telemetry::LogFormat;
use crate::transport::ECHO_SERVER_PORT;

/// Full harness configuration.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub instances: usize,
    pub rounds: usize,
    pub blob_size: usize,
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
    pub token_ttl_secs: u64,
    pub mmds_size_limit: usize,
    pub api_payload_limit: usize,
    pub echo_port: u32,
    pub log_format: LogFormat,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            instances: 20,
            rounds: 2,
            blob_size: 10 * 1024 * 1024,
            connect_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(20),
            token_ttl_secs: 60,
            mmds_size_limit: DEFAULT_STORE_LIMIT,
            api_payload_limit: DEFAULT_API_PAYLOAD_LIMIT,
            echo_port: ECHO_SERVER_PORT,
            log_format: LogFormat::Json,
        }
    }
}

/// Effective configuration summary (serializable).
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub instances: usize,
    pub rounds: usize,
    pub blob_size: usize,
    pub connect_timeout_secs: u64,
    pub io_timeout_secs: u64,
    pub token_ttl_secs: u64,
    pub mmds_size_limit: usize,
    pub api_payload_limit: usize,
    pub echo_port: u32,
    pub log_format: String,
}

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u64` env var, returning `default` on missing or invalid.
fn parse_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(val) => val.parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u32` env var, returning `default` on missing or invalid.
fn parse_u32(key: &str, default: u32) -> u32 {
    match std::env::var(key) {
        Ok(val) => val.parse::<u32>().unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_log_format(key: &str) -> LogFormat {
    match std::env::var(key).as_deref() {
        Ok("pretty") => LogFormat::Pretty,
        _ => LogFormat::Json,
    }
}

/// Load all configuration from environment variables.
///
/// Missing or invalid values fall back to defaults. Floors keep the
/// harness runnable: at least one instance, one round, a 4 KiB blob.
/// The configured token TTL is clamped into the protocol bounds here;
/// issuance-level validation still rejects out-of-range requests.
pub fn load() -> HarnessConfig {
    let defaults = HarnessConfig::default();

    let instances = parse_usize("FLEETCHECK_INSTANCES", defaults.instances).max(1);
    let rounds = parse_usize("FLEETCHECK_ROUNDS", defaults.rounds).max(1);
    let blob_size = parse_usize("FLEETCHECK_BLOB_SIZE", defaults.blob_size).max(4096);
    let connect_secs = parse_u64(
        "FLEETCHECK_CONNECT_TIMEOUT_SECS",
        defaults.connect_timeout.as_secs(),
    )
    .max(1);
    let io_secs = parse_u64("FLEETCHECK_IO_TIMEOUT_SECS", defaults.io_timeout.as_secs()).max(1);
    let token_ttl_secs = parse_u64("FLEETCHECK_TOKEN_TTL_SECS", defaults.token_ttl_secs)
        .clamp(MIN_TOKEN_TTL_SECS, MAX_TOKEN_TTL_SECS);
    let mmds_size_limit =
        parse_usize("FLEETCHECK_MMDS_SIZE_LIMIT", defaults.mmds_size_limit).max(1024);
    let api_payload_limit = parse_usize("FLEETCHECK_API_PAYLOAD_LIMIT", defaults.api_payload_limit)
        .max(mmds_size_limit);
    let echo_port = parse_u32("FLEETCHECK_ECHO_PORT", defaults.echo_port).max(1);
    let log_format = parse_log_format("FLEETCHECK_LOG_FORMAT");

    HarnessConfig {
        instances,
        rounds,
        blob_size,
        connect_timeout: Duration::from_secs(connect_secs),
        io_timeout: Duration::from_secs(io_secs),
        token_ttl_secs,
        mmds_size_limit,
        api_payload_limit,
        echo_port,
        log_format,
    }
}

impl HarnessConfig {
    /// Return a serializable summary of all effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        EffectiveConfig {
            instances: self.instances,
            rounds: self.rounds,
            blob_size: self.blob_size,
            connect_timeout_secs: self.connect_timeout.as_secs(),
            io_timeout_secs: self.io_timeout.as_secs(),
            token_ttl_secs: self.token_ttl_secs,
            mmds_size_limit: self.mmds_size_limit,
            api_payload_limit: self.api_payload_limit,
            echo_port: self.echo_port,
            log_format: match self.log_format {
                LogFormat::Json => "json".to_string(),
                LogFormat::Pretty => "pretty".to_string(),
            },
        }
    }
}
