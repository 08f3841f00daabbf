//! Token-authenticated metadata service protocol.
//!
//! Covers both sides of the contract: the client state machine the harness
//! drives against an instance, and an in-process reference service used as
//! the loopback fixture when no real control plane is attached.

mod client;
mod server;
mod store;
mod token;

use thiserror::Error;

pub use client::{MetadataService, MmdsClient};
pub use server::InMemoryMmds;
pub use store::{merge, serialized_len, DataStore, DEFAULT_API_PAYLOAD_LIMIT, DEFAULT_STORE_LIMIT};
pub use token::{issue_token, SessionToken, MAX_TOKEN_TTL_SECS, MIN_TOKEN_TTL_SECS};

/// Metadata protocol failures.
#[derive(Error, Debug)]
pub enum MmdsError {
    #[error("token TTL {ttl}s outside [{MIN_TOKEN_TTL_SECS}, {MAX_TOKEN_TTL_SECS}]")]
    InvalidTtl { ttl: u64 },

    #[error("session token expired")]
    TokenExpired,

    #[error("payload of {size} bytes exceeds the {limit}-byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("no value at path {path:?}")]
    NotFound { path: String },

    #[error("metadata transport failed: {0}")]
    Transport(String),
}
