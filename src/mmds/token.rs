//! Session token issuance with bounded time-to-live.

use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::time::Instant;

use super::MmdsError;

/// Minimum accepted token lifetime, in seconds.
pub const MIN_TOKEN_TTL_SECS: u64 = 1;

/// Maximum accepted token lifetime, in seconds.
pub const MAX_TOKEN_TTL_SECS: u64 = 21_600;

/// Length of the opaque token value.
const TOKEN_VALUE_LEN: usize = 58;

/// An issued session token. Valid for exactly `ttl` from issuance.
#[derive(Debug, Clone)]
pub struct SessionToken {
    value: String,
    issued_at: Instant,
    ttl: Duration,
}

impl SessionToken {
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> Instant {
        self.issued_at + self.ttl
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at()
    }
}

/// Issue a token for `ttl_secs` seconds.
///
/// A TTL outside the accepted range is rejected at issuance, never
/// silently clamped.
pub fn issue_token(ttl_secs: u64) -> Result<SessionToken, MmdsError> {
    if !(MIN_TOKEN_TTL_SECS..=MAX_TOKEN_TTL_SECS).contains(&ttl_secs) {
        return Err(MmdsError::InvalidTtl { ttl: ttl_secs });
    }

    let value: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_VALUE_LEN)
        .map(char::from)
        .collect();

    Ok(SessionToken {
        value,
        issued_at: Instant::now(),
        ttl: Duration::from_secs(ttl_secs),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_bounds_are_enforced_at_issuance() {
        assert!(matches!(issue_token(0), Err(MmdsError::InvalidTtl { ttl: 0 })));
        assert!(matches!(
            issue_token(MAX_TOKEN_TTL_SECS + 1),
            Err(MmdsError::InvalidTtl { .. })
        ));
        assert!(issue_token(MIN_TOKEN_TTL_SECS).is_ok());
        assert!(issue_token(MAX_TOKEN_TTL_SECS).is_ok());
    }

    #[tokio::test]
    async fn tokens_are_opaque_and_distinct() {
        let a = issue_token(60).unwrap();
        let b = issue_token(60).unwrap();
        assert_eq!(a.value().len(), TOKEN_VALUE_LEN);
        assert_ne!(a.value(), b.value());
    }

    #[tokio::test(start_paused = true)]
    async fn token_expires_after_exactly_ttl() {
        let token = issue_token(1).unwrap();
        assert!(!token.is_expired(Instant::now()));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(token.is_expired(Instant::now()));
    }
}
