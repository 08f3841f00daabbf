//! fleetcheck — concurrent conformance and stress harness for two
//! instance-facing protocols:
//!
//! - **MMDS**: a token-authenticated key-value metadata service with
//!   bounded token TTLs and size-limited PUT/PATCH/GET semantics.
//! - **Echo channel**: a raw byte-echo exchange over a socket rendezvous
//!   point, used to verify data-transfer integrity with content hashes.
//!
//! The fleet orchestrator drives N instances through R rounds of
//! {echo verification, metadata mutation}, aggregates per-instance
//! failures without letting any instance corrupt another's bookkeeping,
//! and guarantees that every started instance is torn down exactly once
//! with its logs drained, whatever happened earlier.
//!
//! Real deployments attach a virtualization control plane through
//! [`instance::VmControl`] and a live metadata endpoint through
//! [`mmds::MetadataService`]; the [`loopback`] module wires in-process
//! stand-ins for both so the harness is runnable and testable on its own.

pub mod blob;
pub mod config;
pub mod echo;
pub mod fleet;
pub mod instance;
pub mod loopback;
pub mod mmds;
pub mod telemetry;
pub mod transport;

pub use config::{load as load_config, HarnessConfig};
pub use fleet::{FleetOrchestrator, FleetReport};
