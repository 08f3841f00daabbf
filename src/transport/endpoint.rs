//! Rendezvous endpoint addressing.
//!
//! A channel endpoint is a unix socket path plus a numeric port layered on
//! top of it. Host-initiated connections dial the base path and request the
//! port in a preamble; peer-initiated connections arrive on a per-port
//! socket derived from the base path.

use std::path::{Path, PathBuf};

/// Default echo responder port.
pub const ECHO_SERVER_PORT: u32 = 5252;

/// Default rendezvous socket file name.
pub const DEFAULT_UDS_NAME: &str = "v.sock";

/// Which side dials the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The harness dials the base socket and asks for the port.
    HostInitiated,
    /// The peer dials the per-port socket; the harness waits for it.
    GuestInitiated,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::HostInitiated => write!(f, "host-initiated"),
            Direction::GuestInitiated => write!(f, "guest-initiated"),
        }
    }
}

/// A rendezvous point: socket path plus port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    uds_path: PathBuf,
    port: u32,
}

impl Endpoint {
    pub fn new(uds_path: impl Into<PathBuf>, port: u32) -> Self {
        Self {
            uds_path: uds_path.into(),
            port,
        }
    }

    pub fn uds_path(&self) -> &Path {
        &self.uds_path
    }

    pub fn port(&self) -> u32 {
        self.port
    }

    /// Path of the per-port socket: `<uds_path>_<port>`.
    pub fn host_port_path(&self) -> PathBuf {
        let mut name = self.uds_path.as_os_str().to_os_string();
        name.push(format!("_{}", self.port));
        PathBuf::from(name)
    }
}
