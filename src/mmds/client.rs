//! Client-side metadata protocol state machine.
//!
//! The client is either unauthenticated or holds a token with a known
//! expiry. Protected operations check expiry locally before touching the
//! wire; on expiry they fail with `TokenExpired` and the client drops back
//! to unauthenticated. Whether and when to re-request a token is the
//! caller's decision. The client never retries on its own.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;

use super::token::{MAX_TOKEN_TTL_SECS, MIN_TOKEN_TTL_SECS};
use super::MmdsError;

/// The externally defined metadata service contract.
///
/// Real deployments back this with the instance's HTTP endpoint over the
/// virtual network or the rendezvous channel; tests and loopback runs use
/// [`super::InMemoryMmds`].
#[async_trait]
pub trait MetadataService: Send + Sync {
    /// Mint a session token valid for `ttl_secs`.
    async fn issue_token(&self, ttl_secs: u64) -> Result<String, MmdsError>;

    /// Replace the whole data store.
    async fn put(&self, token: &str, value: Value) -> Result<(), MmdsError>;

    /// Recursively merge into the data store.
    async fn patch(&self, token: &str, value: Value) -> Result<(), MmdsError>;

    /// Read the value at a segmented key path.
    async fn get(&self, token: &str, path: &str) -> Result<Value, MmdsError>;
}

struct AuthState {
    token: String,
    expires_at: Instant,
}

/// Stateful metadata protocol client for one instance.
pub struct MmdsClient {
    service: Arc<dyn MetadataService>,
    auth: Option<AuthState>,
}

impl MmdsClient {
    pub fn new(service: Arc<dyn MetadataService>) -> Self {
        Self {
            service,
            auth: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth
            .as_ref()
            .map(|a| Instant::now() < a.expires_at)
            .unwrap_or(false)
    }

    /// Request a fresh token. Out-of-range TTLs are rejected locally with
    /// `InvalidTtl` before any request is made.
    pub async fn request_token(&mut self, ttl_secs: u64) -> Result<(), MmdsError> {
        if !(MIN_TOKEN_TTL_SECS..=MAX_TOKEN_TTL_SECS).contains(&ttl_secs) {
            return Err(MmdsError::InvalidTtl { ttl: ttl_secs });
        }
        let token = self.service.issue_token(ttl_secs).await?;
        self.auth = Some(AuthState {
            token,
            expires_at: Instant::now() + std::time::Duration::from_secs(ttl_secs),
        });
        Ok(())
    }

    pub async fn put(&mut self, value: Value) -> Result<(), MmdsError> {
        let token = self.current_token()?.to_string();
        self.service.put(&token, value).await
    }

    pub async fn patch(&mut self, value: Value) -> Result<(), MmdsError> {
        let token = self.current_token()?.to_string();
        self.service.patch(&token, value).await
    }

    pub async fn get(&mut self, path: &str) -> Result<Value, MmdsError> {
        let token = self.current_token()?.to_string();
        self.service.get(&token, path).await
    }

    /// Token for a protected operation. Expired or absent credentials
    /// fail with `TokenExpired` and reset the state machine; the remedy
    /// in both cases is a fresh `request_token`.
    fn current_token(&mut self) -> Result<&str, MmdsError> {
        let live = self
            .auth
            .as_ref()
            .is_some_and(|auth| Instant::now() < auth.expires_at);
        if !live {
            self.auth = None;
            return Err(MmdsError::TokenExpired);
        }
        match &self.auth {
            Some(auth) => Ok(auth.token.as_str()),
            None => Err(MmdsError::TokenExpired),
        }
    }
}
