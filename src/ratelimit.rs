//! Per-owner submission rate limiting
//!
//! Fixed one-minute windows over a shared NATS KV counter, so every
//! gateway and executor instance sees the same budget. The policy is
//! fail-open: if the counter store is unreachable the request is allowed,
//! because ingestion availability outranks strict limiting.

use async_nats::jetstream::kv;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::types::{HoldfastError, Result};

/// Fixed window length
pub const WINDOW: Duration = Duration::from_secs(60);

/// Shared fixed-window rate limiter
#[derive(Clone)]
pub struct RateLimiter {
    bucket: Option<kv::Store>,
    limit: u64,
}

impl RateLimiter {
    /// A limiter backed by the shared KV bucket
    pub fn new(bucket: kv::Store, limit: u64) -> Self {
        Self {
            bucket: Some(bucket),
            limit,
        }
    }

    /// A limiter that admits everything (dev mode, or no NATS at startup)
    pub fn disabled() -> Self {
        Self {
            bucket: None,
            limit: 0,
        }
    }

    /// Check and consume one unit of an owner's budget for the current
    /// window. Errors only with RateLimited; store failures admit.
    pub async fn check(&self, owner_id: Uuid) -> Result<()> {
        let Some(bucket) = &self.bucket else {
            return Ok(());
        };

        let window = chrono::Utc::now().timestamp() / WINDOW.as_secs() as i64;
        let key = format!("{owner_id}.{window}");

        let current = match bucket.get(&key).await {
            Ok(Some(raw)) => String::from_utf8_lossy(&raw).parse::<u64>().unwrap_or(0),
            Ok(None) => 0,
            Err(e) => {
                warn!(error = %e, "Rate-limit store unreachable, admitting request");
                return Ok(());
            }
        };

        if current >= self.limit {
            debug!(owner = %owner_id, current, limit = self.limit, "Rate limit exceeded");
            return Err(HoldfastError::RateLimited);
        }

        // Lost increments under concurrency under-count slightly; a
        // fixed-window limiter tolerates that.
        if let Err(e) = bucket
            .put(&key, (current + 1).to_string().into_bytes().into())
            .await
        {
            warn!(error = %e, "Rate-limit counter update failed");
        }

        Ok(())
    }
}
