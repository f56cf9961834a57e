use super::clock::Clock;
use super::store::RateLimitStore;
use super::types::{FailPolicy, RateLimitDecision, RateLimitKey, RateLimitPolicy};
use crate::error::{GatewayError, Result};
use std::sync::Arc;
use tracing::{debug, warn};

/// Fixed-window rate limiter over a shared counter store.
///
/// The window identity is baked into the counter key (timestamp truncated to
/// the window size), so windows reset at discrete boundaries. A client can
/// burst up to twice the limit across a boundary; that approximation is kept
/// deliberately rather than upgraded to a sliding window.
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
    scope: String,
    policy: RateLimitPolicy,
    fail_policy: FailPolicy,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn RateLimitStore>,
        clock: Arc<dyn Clock>,
        scope: &str,
        policy: RateLimitPolicy,
        fail_policy: FailPolicy,
    ) -> Self {
        Self {
            store,
            clock,
            scope: scope.to_string(),
            policy,
            fail_policy,
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Count this request against `identity` and decide admission.
    ///
    /// Store failures resolve through the fail policy: fail-open admits with a
    /// warning, fail-closed surfaces `StoreUnavailable` (503).
    pub async fn check(&self, identity: &str) -> Result<RateLimitDecision> {
        let now_ms = self.clock.now_ms();
        let window_ms = self.policy.window_ms.max(1);
        let window_start_ms = now_ms / window_ms * window_ms;
        let reset_at_ms = window_start_ms + window_ms;

        let key = RateLimitKey::new(&self.scope, identity, window_start_ms);

        match self
            .store
            .increment(&key.storage_key(), self.policy.window())
            .await
        {
            Ok(count) => {
                let limit = self.policy.max_requests;
                if count > u64::from(limit) {
                    warn!(
                        scope = %self.scope,
                        identity,
                        count,
                        limit,
                        "rate limit exceeded"
                    );
                    Ok(RateLimitDecision::denied(limit, reset_at_ms, now_ms))
                } else {
                    let remaining = limit - count as u32;
                    debug!(scope = %self.scope, identity, remaining, "request admitted");
                    Ok(RateLimitDecision::allowed(
                        limit, remaining, reset_at_ms, now_ms,
                    ))
                }
            }
            Err(e) => match self.fail_policy {
                FailPolicy::Open => {
                    warn!(
                        scope = %self.scope,
                        error = %e,
                        "rate limit store unreachable, failing open"
                    );
                    Ok(RateLimitDecision::allowed(
                        self.policy.max_requests,
                        self.policy.max_requests,
                        reset_at_ms,
                        now_ms,
                    ))
                }
                FailPolicy::Closed => {
                    warn!(
                        scope = %self.scope,
                        error = %e,
                        "rate limit store unreachable, failing closed"
                    );
                    Err(GatewayError::StoreUnavailable(e.to_string()))
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::clock::ManualClock;
    use crate::rate_limit::store::{MemoryRateLimitStore, StoreError};
    use async_trait::async_trait;
    use std::time::Duration;

    struct BrokenStore;

    #[async_trait]
    impl RateLimitStore for BrokenStore {
        async fn increment(&self, _key: &str, _window: Duration) -> std::result::Result<u64, StoreError> {
            Err(StoreError("connection refused".to_string()))
        }
    }

    fn limiter_with(
        store: Arc<dyn RateLimitStore>,
        clock: Arc<ManualClock>,
        max: u32,
        window_ms: u64,
        fail_policy: FailPolicy,
    ) -> RateLimiter {
        RateLimiter::new(
            store,
            clock,
            "global",
            RateLimitPolicy {
                max_requests: max,
                window_ms,
            },
            fail_policy,
        )
    }

    #[tokio::test]
    async fn test_sixth_request_in_window_is_denied() {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(MemoryRateLimitStore::new());
        let limiter = limiter_with(store, clock, 5, 60_000, FailPolicy::Open);

        for i in 0..5 {
            let decision = limiter.check("192.168.1.1").await.unwrap();
            assert!(decision.allowed, "request {} should be admitted", i + 1);
            assert_eq!(decision.remaining, 4 - i);
        }

        let decision = limiter.check("192.168.1.1").await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.reset_at_ms, 60_000);
    }

    #[tokio::test]
    async fn test_first_request_of_next_window_is_admitted() {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(MemoryRateLimitStore::new());
        let limiter = limiter_with(store, clock.clone(), 5, 60_000, FailPolicy::Open);

        for _ in 0..6 {
            let _ = limiter.check("192.168.1.1").await.unwrap();
        }
        assert!(!limiter.check("192.168.1.1").await.unwrap().allowed);

        // One millisecond past the boundary starts a fresh counter.
        clock.set(60_001);
        let decision = limiter.check("192.168.1.1").await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);
        assert_eq!(decision.reset_at_ms, 120_000);
    }

    #[tokio::test]
    async fn test_boundary_burst_is_twice_the_limit() {
        // Fixed-window approximation: a client can spend the full budget at
        // the end of one window and again at the start of the next.
        let clock = Arc::new(ManualClock::new(59_000));
        let store = Arc::new(MemoryRateLimitStore::new());
        let limiter = limiter_with(store, clock.clone(), 5, 60_000, FailPolicy::Open);

        for _ in 0..5 {
            assert!(limiter.check("10.0.0.1").await.unwrap().allowed);
        }
        assert!(!limiter.check("10.0.0.1").await.unwrap().allowed);

        clock.set(60_000);
        for _ in 0..5 {
            assert!(limiter.check("10.0.0.1").await.unwrap().allowed);
        }
        assert!(!limiter.check("10.0.0.1").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_identities_are_counted_separately() {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(MemoryRateLimitStore::new());
        let limiter = limiter_with(store, clock, 2, 60_000, FailPolicy::Open);

        assert!(limiter.check("192.168.1.1").await.unwrap().allowed);
        assert!(limiter.check("192.168.1.1").await.unwrap().allowed);
        assert!(!limiter.check("192.168.1.1").await.unwrap().allowed);

        assert!(limiter.check("192.168.1.2").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_fail_open_admits_on_store_error() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = limiter_with(Arc::new(BrokenStore), clock, 5, 60_000, FailPolicy::Open);

        let decision = limiter.check("192.168.1.1").await.unwrap();
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn test_fail_closed_rejects_on_store_error() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = limiter_with(Arc::new(BrokenStore), clock, 5, 60_000, FailPolicy::Closed);

        let err = limiter.check("192.168.1.1").await.unwrap_err();
        assert!(matches!(err, GatewayError::StoreUnavailable(_)));
    }
}
