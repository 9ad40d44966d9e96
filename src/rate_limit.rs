//! Fixed-window request limiter keyed by (namespace, client identifier).
//!
//! Buckets live in process memory: every server instance counts on its own,
//! and a restart forgets all windows.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use serde::Serialize;

use crate::error::ApiError;

/// Shared identifier for callers that expose neither forwarding header.
pub const UNKNOWN_CLIENT: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub namespace: &'static str,
    pub limit: u32,
    pub window: Duration,
}

impl RateLimitPolicy {
    pub fn new(namespace: &'static str, limit: u32, window: Duration) -> Self {
        Self { namespace, limit, window }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub retry_after_ms: u64,
}

impl RateLimitDecision {
    fn allow() -> Self {
        Self { allowed: true, retry_after_ms: 0 }
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    count: u32,
    reset_at: Instant,
}

#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<(String, String), Bucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(
        &self,
        namespace: &str,
        identifier: &str,
        limit: u32,
        window: Duration,
    ) -> RateLimitDecision {
        self.check_at(namespace, identifier, limit, window, Instant::now())
    }

    pub fn check_at(
        &self,
        namespace: &str,
        identifier: &str,
        limit: u32,
        window: Duration,
        now: Instant,
    ) -> RateLimitDecision {
        let mut buckets = self.lock();
        let key = (namespace.to_string(), identifier.to_string());

        if let Some(bucket) = buckets.get_mut(&key) {
            if now < bucket.reset_at {
                if bucket.count >= limit {
                    // rounded up: a denial never reports 0 ms
                    let retry_after = bucket.reset_at.saturating_duration_since(now);
                    return RateLimitDecision {
                        allowed: false,
                        retry_after_ms: (retry_after.as_nanos().div_ceil(1_000_000) as u64).max(1),
                    };
                }
                bucket.count += 1;
                return RateLimitDecision::allow();
            }
        }

        buckets.insert(key, Bucket { count: 1, reset_at: now + window });
        RateLimitDecision::allow()
    }

    /// Checks `policy` for `identifier`, turning a denial into a 429 error.
    pub fn enforce(&self, policy: &RateLimitPolicy, identifier: &str) -> Result<(), ApiError> {
        let decision = self.check(policy.namespace, identifier, policy.limit, policy.window);
        if decision.allowed {
            Ok(())
        } else {
            tracing::warn!(
                "rate limit hit: namespace={} client={} retry_after_ms={}",
                policy.namespace,
                identifier,
                decision.retry_after_ms
            );
            Err(ApiError::RateLimited { retry_after_ms: decision.retry_after_ms })
        }
    }

    /// Drops buckets whose window has closed. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Instant::now())
    }

    pub fn sweep_expired_at(&self, now: Instant) -> usize {
        let mut buckets = self.lock();
        let before = buckets.len();
        buckets.retain(|_, bucket| now < bucket.reset_at);
        before - buckets.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn start_sweeper(limiter: Arc<Self>, every: Duration) {
        if every.is_zero() {
            return;
        }
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = limiter.sweep_expired();
                if removed > 0 {
                    tracing::debug!("rate limiter swept {} expired buckets", removed);
                }
            }
        });
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(String, String), Bucket>> {
        // a panic mid-update leaves at worst one stale counter
        self.buckets.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// First `X-Forwarded-For` hop, then `X-Real-IP`, then [`UNKNOWN_CLIENT`].
pub fn client_identifier(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(addr) = forwarded {
        return addr.to_string();
    }

    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}
