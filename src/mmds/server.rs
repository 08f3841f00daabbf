//! In-process reference metadata service.
//!
//! Implements the full server-side contract (token table with expiry,
//! size-bounded store) so the fleet can run loopback scenarios and tests
//! without a live instance behind the endpoint.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::client::MetadataService;
use super::store::DataStore;
use super::token::issue_token;
use super::MmdsError;

/// One instance's metadata service, backed by memory.
pub struct InMemoryMmds {
    tokens: RwLock<HashMap<String, Instant>>,
    store: RwLock<DataStore>,
}

impl InMemoryMmds {
    pub fn new(limit_bytes: usize) -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
            store: RwLock::new(DataStore::new(limit_bytes)),
        }
    }

    /// Host-side seeding, as done through the control API before boot.
    /// Bypasses token auth but not the size limit.
    pub async fn seed(&self, snapshot: Value) -> Result<(), MmdsError> {
        self.store.write().await.put(snapshot)
    }

    /// Current store contents.
    pub async fn snapshot(&self) -> Value {
        self.store.read().await.snapshot()
    }

    /// Drop expired tokens from the table.
    pub async fn sweep_expired(&self) {
        let now = Instant::now();
        self.tokens.write().await.retain(|_, expiry| *expiry > now);
    }

    async fn authorize(&self, token: &str) -> Result<(), MmdsError> {
        let mut tokens = self.tokens.write().await;
        match tokens.get(token) {
            Some(expiry) if *expiry > Instant::now() => Ok(()),
            Some(_) => {
                tokens.remove(token);
                Err(MmdsError::TokenExpired)
            }
            None => Err(MmdsError::TokenExpired),
        }
    }
}

#[async_trait]
impl MetadataService for InMemoryMmds {
    async fn issue_token(&self, ttl_secs: u64) -> Result<String, MmdsError> {
        let token = issue_token(ttl_secs)?;
        self.tokens
            .write()
            .await
            .insert(token.value().to_string(), token.expires_at());
        Ok(token.value().to_string())
    }

    async fn put(&self, token: &str, value: Value) -> Result<(), MmdsError> {
        self.authorize(token).await?;
        self.store.write().await.put(value)
    }

    async fn patch(&self, token: &str, value: Value) -> Result<(), MmdsError> {
        self.authorize(token).await?;
        self.store.write().await.patch(&value)
    }

    async fn get(&self, token: &str, path: &str) -> Result<Value, MmdsError> {
        self.authorize(token).await?;
        self.store.read().await.get(path)
    }
}
