use async_trait::async_trait;
use dashmap::DashMap;
use redis::{aio::ConnectionManager, Script};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Error raised when the counter store cannot serve an increment. The limiter
/// translates it according to the configured fail policy.
#[derive(Error, Debug)]
#[error("rate limit store error: {0}")]
pub struct StoreError(pub String);

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError(e.to_string())
    }
}

/// Shared counter store with atomic increment-with-expiry semantics.
///
/// Implementations must be safe under concurrent callers across multiple
/// gateway instances so admission control stays consistent cluster-wide.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Atomically increment the counter for `key`, setting its expiry to
    /// `window` when newly created, and return the post-increment count.
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, StoreError>;
}

/// Lua script for atomic increment-with-expiry.
///
/// KEYS[1] = counter key
/// ARGV[1] = expiry in seconds
///
/// Returns the post-increment count. The expiry is only set on the first
/// increment; the window identity lives in the key itself, so a generous TTL
/// just garbage-collects stale windows.
const INCREMENT_SCRIPT: &str = r#"
local current = redis.call('INCR', KEYS[1])
if current == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return current
"#;

/// Redis-backed counter store shared across gateway instances.
pub struct RedisRateLimitStore {
    connection: ConnectionManager,
}

impl RedisRateLimitStore {
    /// Connect to Redis and build a multiplexed connection manager.
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self { connection })
    }

    /// Verify the connection is alive.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        redis::cmd("PING")
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(StoreError::from)
    }
}

#[async_trait]
impl RateLimitStore for RedisRateLimitStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        // Double the window so counters from the previous window remain
        // readable until well past their relevance.
        let expiry_secs = (window.as_secs() * 2).max(1);

        let mut conn = self.connection.clone();
        let count: u64 = Script::new(INCREMENT_SCRIPT)
            .key(key)
            .arg(expiry_secs)
            .invoke_async(&mut conn)
            .await?;

        debug!(key, count, "counter incremented");
        Ok(count)
    }
}

/// In-memory counter store.
///
/// Process-local, so not suitable for multi-instance admission control; used
/// in tests and single-instance deployments without a Redis.
#[derive(Default)]
pub struct MemoryRateLimitStore {
    counters: DashMap<String, CounterEntry>,
}

struct CounterEntry {
    count: u64,
    expires_at: Instant,
}

impl MemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live counters, for tests.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        let now = Instant::now();

        // Opportunistic purge keeps the map from accumulating dead windows.
        self.counters.retain(|_, entry| entry.expires_at > now);

        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert_with(|| CounterEntry {
                count: 0,
                expires_at: now + window * 2,
            });
        entry.count += 1;
        Ok(entry.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_counts_per_key() {
        let store = MemoryRateLimitStore::new();
        let window = Duration::from_secs(60);

        assert_eq!(store.increment("a", window).await.unwrap(), 1);
        assert_eq!(store.increment("a", window).await.unwrap(), 2);
        assert_eq!(store.increment("a", window).await.unwrap(), 3);
        assert_eq!(store.increment("b", window).await.unwrap(), 1);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_memory_store_purges_expired_counters() {
        let store = MemoryRateLimitStore::new();

        store
            .increment("short", Duration::from_millis(5))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;

        // Touching any key triggers the purge of the expired one.
        store
            .increment("other", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_increment_script_shape() {
        assert!(INCREMENT_SCRIPT.contains("INCR"));
        assert!(INCREMENT_SCRIPT.contains("EXPIRE"));
    }

    // Requires a running Redis instance. Run with: cargo test -- --ignored
    #[tokio::test]
    #[ignore]
    async fn test_redis_store_increment() {
        let store = RedisRateLimitStore::connect("redis://127.0.0.1:6379")
            .await
            .expect("Failed to connect to Redis");
        store.ping().await.expect("ping failed");

        let key = format!("gateway:ratelimit:test:{}", uuid::Uuid::new_v4());
        let window = Duration::from_secs(60);

        assert_eq!(store.increment(&key, window).await.unwrap(), 1);
        assert_eq!(store.increment(&key, window).await.unwrap(), 2);
    }
}
