use axum::http::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// What to do when the shared counter store is unreachable.
///
/// Fail-open admits traffic during store downtime (abuse risk), fail-closed
/// rejects with 503 (cascading-outage risk). Deployment-specific, so it is
/// configuration rather than a hardcoded choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailPolicy {
    Open,
    Closed,
}

impl FromStr for FailPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "open" => Ok(FailPolicy::Open),
            "closed" => Ok(FailPolicy::Closed),
            other => Err(format!("unknown fail policy '{}', expected open|closed", other)),
        }
    }
}

/// Fixed-window rate limit policy: at most `max_requests` per `window_ms`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// Maximum number of requests allowed per window
    pub max_requests: u32,
    /// Window length in milliseconds
    pub window_ms: u64,
}

impl RateLimitPolicy {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window_ms: window.as_millis() as u64,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Composite counter key: limiter scope, caller identity, and the window the
/// counter belongs to. Counters are created implicitly on first increment and
/// expire via store TTL; they are never deleted explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    /// Limiter scope: "global" or "route:<name>"
    pub scope: String,
    /// Client IP or subject id
    pub identity: String,
    /// Window start, truncated to the window size (ms since epoch)
    pub window_start_ms: u64,
}

impl RateLimitKey {
    pub fn new(scope: &str, identity: &str, window_start_ms: u64) -> Self {
        Self {
            scope: scope.to_string(),
            identity: identity.to_string(),
            window_start_ms,
        }
    }

    /// Key under which the counter lives in the shared store.
    pub fn storage_key(&self) -> String {
        format!(
            "gateway:ratelimit:{}:{}:{}",
            self.scope, self.identity, self.window_start_ms
        )
    }
}

/// Per-request admission decision. Not persisted; surfaced only through the
/// rate-limit response headers.
#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// When the current window rolls over (ms since epoch)
    pub reset_at_ms: u64,
    /// Seconds until the window rolls over, for Retry-After
    retry_after_secs: u64,
}

impl RateLimitDecision {
    pub fn allowed(limit: u32, remaining: u32, reset_at_ms: u64, now_ms: u64) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            reset_at_ms,
            retry_after_secs: secs_until(reset_at_ms, now_ms),
        }
    }

    pub fn denied(limit: u32, reset_at_ms: u64, now_ms: u64) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            reset_at_ms,
            retry_after_secs: secs_until(reset_at_ms, now_ms),
        }
    }

    pub fn retry_after_secs(&self) -> u64 {
        self.retry_after_secs
    }

    /// Attach the standard rate-limit headers (limit, remaining, reset).
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        if let Ok(v) = HeaderValue::from_str(&self.limit.to_string()) {
            headers.insert("X-RateLimit-Limit", v);
        }
        if let Ok(v) = HeaderValue::from_str(&self.remaining.to_string()) {
            headers.insert("X-RateLimit-Remaining", v);
        }
        if let Ok(v) = HeaderValue::from_str(&(self.reset_at_ms / 1000).to_string()) {
            headers.insert("X-RateLimit-Reset", v);
        }
    }
}

fn secs_until(reset_at_ms: u64, now_ms: u64) -> u64 {
    let delta_ms = reset_at_ms.saturating_sub(now_ms);
    delta_ms.div_ceil(1000).max(1)
}
