//! Redis-backed counter store.
//!
//! Increment and expiry run inside one Lua script, so the pair is atomic on the server
//! and every gateway instance sharing the Redis sees the same counts.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use std::time::Duration;

use super::rate_limit::{CounterStore, CounterStoreError};

const INCR_WITH_EXPIRY: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

impl From<redis::RedisError> for CounterStoreError {
    fn from(e: redis::RedisError) -> Self {
        CounterStoreError::Unavailable(e.to_string())
    }
}

/// Counter store backed by a shared Redis.
#[derive(Clone)]
pub struct RedisCounterStore {
    connection: ConnectionManager,
    script: Script,
}

impl RedisCounterStore {
    pub async fn connect(url: &str) -> Result<Self, CounterStoreError> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        tracing::info!("Connected rate limiter to Redis");
        Ok(Self {
            connection,
            script: Script::new(INCR_WITH_EXPIRY),
        })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64, CounterStoreError> {
        let mut connection = self.connection.clone();
        let count: u64 = self
            .script
            .key(key)
            .arg(ttl.as_secs().max(1))
            .invoke_async(&mut connection)
            .await?;
        Ok(count)
    }
}
