//! Admission control: fixed-window rate limiting over a shared counter store.

pub mod clock;
pub mod limiter;
pub mod middleware;
pub mod store;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use limiter::RateLimiter;
pub use store::{MemoryRateLimitStore, RateLimitStore, RedisRateLimitStore, StoreError};
pub use types::{FailPolicy, RateLimitDecision, RateLimitKey, RateLimitPolicy};
