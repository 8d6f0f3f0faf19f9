//! Redis shared store for `docshield` (companion crate).
//!
//! Every gateway replica pointed at the same server shares rate buckets, abuse profiles and
//! cache entries. Increments and compare-and-swap writes run as Lua scripts so each is one
//! atomic server-side step.

use std::time::Duration;

use async_trait::async_trait;
use docshield::error::StoreError;
use docshield::store::{Counter, SharedStore};
use redis::aio::ConnectionManager;
use redis::{Client, RedisError, Script};

/// INCRBY plus expiry repair in one step: a key without a TTL (new or left behind by a
/// crashed writer) receives `ARGV[2]` milliseconds.
const INCREMENT_SCRIPT: &str = r#"
local value = redis.call('INCRBY', KEYS[1], ARGV[1])
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
    ttl = tonumber(ARGV[2])
end
return {value, ttl}
"#;

/// `ARGV[1]` is `1` when a current value is expected, `0` when the key must be absent.
const COMPARE_AND_SWAP_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if ARGV[1] == '1' then
    if current ~= ARGV[2] then
        return 0
    end
elseif current then
    return 0
end
redis.call('SET', KEYS[1], ARGV[3], 'PX', ARGV[4])
return 1
"#;

const SCAN_BATCH: usize = 500;

/// [`SharedStore`] over a multiplexed, auto-reconnecting Redis connection.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    increment: Script,
    compare_and_swap: Script,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").field("connection", &"<redis::aio::ConnectionManager>").finish()
    }
}

impl RedisStore {
    /// Connect to `url` and verify the server answers `PING`.
    ///
    /// # Errors
    /// Returns [`StoreError::Unavailable`] if the URL is invalid or the server is unreachable.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(|e| {
            tracing::warn!(target: "docshield::redis", error = %e, "invalid redis url");
            unavailable(e)
        })?;
        let connection = ConnectionManager::new(client).await.map_err(|e| {
            tracing::warn!(target: "docshield::redis", error = %e, "failed to connect to redis");
            unavailable(e)
        })?;

        let mut conn = connection.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await.map_err(unavailable)?;
        tracing::debug!(target: "docshield::redis", "connected to redis");

        Ok(Self::from_connection(connection))
    }

    /// Wrap an existing connection manager.
    pub fn from_connection(connection: ConnectionManager) -> Self {
        Self {
            connection,
            increment: Script::new(INCREMENT_SCRIPT),
            compare_and_swap: Script::new(COMPARE_AND_SWAP_SCRIPT),
        }
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn increment(
        &self,
        key: &str,
        delta: i64,
        ttl_if_absent: Duration,
    ) -> Result<Counter, StoreError> {
        let mut conn = self.connection.clone();
        let reply: Vec<i64> = self
            .increment
            .key(key)
            .arg(delta)
            .arg(ttl_millis(ttl_if_absent))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                if is_not_integer(&e) {
                    StoreError::NotAnInteger { key: key.to_string() }
                } else {
                    unavailable(e)
                }
            })?;

        match reply.as_slice() {
            [value, ttl] => Ok(Counter {
                value: *value,
                ttl: Duration::from_millis(u64::try_from(*ttl).unwrap_or(0)),
            }),
            _ => Err(StoreError::Malformed {
                key: key.to_string(),
                reason: format!("increment script returned {} values", reply.len()),
            }),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.connection.clone();
        let value: Option<Vec<u8>> =
            redis::cmd("GET").arg(key).query_async(&mut conn).await.map_err(unavailable)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let (flag, expected) = match expected {
            Some(bytes) => ("1", bytes.to_vec()),
            None => ("0", Vec::new()),
        };
        let swapped: i64 = self
            .compare_and_swap
            .key(key)
            .arg(flag)
            .arg(expected)
            .arg(value)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(swapped == 1)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await.map_err(unavailable)?;
        Ok(removed > 0)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        let mut conn = self.connection.clone();
        let pattern = format!("{}*", escape_glob(prefix));
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(unavailable)?;

            if !keys.is_empty() {
                let n: u64 = redis::cmd("UNLINK").arg(&keys).query_async(&mut conn).await.map_err(unavailable)?;
                removed += n;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }

        tracing::debug!(target: "docshield::redis", prefix, removed, "deleted keys by prefix");
        Ok(removed)
    }
}

fn unavailable(err: RedisError) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

fn is_not_integer(err: &RedisError) -> bool {
    err.to_string().contains("not an integer")
}

/// Redis rejects `PX 0`.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Escape glob metacharacters so a prefix matches literally in `SCAN MATCH`.
fn escape_glob(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
