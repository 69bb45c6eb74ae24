//! Redis-backed window store.
//!
//! Each key maps to one sorted set whose scores are admission timestamps in
//! milliseconds. Admission and peeking each run as a single Lua script, which
//! Redis executes without interleaving any other command, so every call is
//! one atomic round trip.
//!
//! Keys are namespaced as `<prefix>:<key>`.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use tracing::{debug, info};

use crate::error::{Result, SlidewinError};
use crate::ratelimit::entry::{batch_nonce, live_cutoff};
use crate::ratelimit::{Evaluation, Snapshot, WindowStore};

/// Default namespace for keys written by this store.
pub const DEFAULT_KEY_PREFIX: &str = "slidewin";

/// Prune, count and conditionally insert.
///
/// KEYS[1]: the window key
/// ARGV[1]: now in milliseconds
/// ARGV[2]: window length in milliseconds
/// ARGV[3]: limit
/// ARGV[4]: units requested
/// ARGV[5]: random nonce shared by this call's units
/// ARGV[6]: exclusive prune bound, e.g. "(1699999999000"
///
/// Returns {allowed (0|1), remaining}.
const ADMIT_SCRIPT: &str = r#"
local key = KEYS[1]
local now = ARGV[1]
local limit = tonumber(ARGV[3])
local n = tonumber(ARGV[4])
local nonce = ARGV[5]

redis.call('ZREMRANGEBYSCORE', key, '-inf', ARGV[6])

local current = redis.call('ZCARD', key)

if current + n > limit then
    local remaining = limit - current
    if remaining < 0 then remaining = 0 end
    return {0, remaining}
end

for i = 0, n - 1 do
    local member = now .. ':' .. i .. ':' .. nonce
    local attempt = 0
    while redis.call('ZADD', key, 'NX', now, member) == 0 do
        attempt = attempt + 1
        member = now .. ':' .. i .. ':' .. nonce .. ':' .. attempt
    end
end

redis.call('PEXPIRE', key, ARGV[2])

return {1, limit - current - n}
"#;

/// Prune and count. Leaves the key's expiry untouched.
///
/// KEYS[1]: the window key
/// ARGV[1]: exclusive prune bound
///
/// Returns the live entry count.
const PEEK_SCRIPT: &str = r#"
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
return redis.call('ZCARD', KEYS[1])
"#;

/// A [`WindowStore`] shared through a Redis server.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    prefix: String,
    admit: Script,
    peek: Script,
}

impl RedisStore {
    /// Wrap an existing connection manager.
    pub fn new(connection: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            connection,
            prefix: prefix.into(),
            admit: Script::new(ADMIT_SCRIPT),
            peek: Script::new(PEEK_SCRIPT),
        }
    }

    /// Open a managed connection to `url`.
    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|e| SlidewinError::Config(format!("Invalid Redis URL {}: {}", url, e)))?;
        let connection = client.get_connection_manager().await?;

        info!(url = %url, "Connected to Redis");
        Ok(Self::new(connection, prefix))
    }

    /// The namespace prepended to every key.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The Redis key holding `key`'s window.
    pub fn store_key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }
}

#[async_trait]
impl WindowStore for RedisStore {
    async fn evaluate(
        &self,
        key: &str,
        now_ms: u64,
        window_ms: u64,
        limit: u64,
        n: u64,
    ) -> Result<Evaluation> {
        let mut connection = self.connection.clone();

        let reply: Vec<i64> = self
            .admit
            .key(self.store_key(key))
            .arg(now_ms)
            .arg(window_ms)
            .arg(limit)
            .arg(n)
            .arg(batch_nonce())
            .arg(prune_bound(now_ms, window_ms))
            .invoke_async(&mut connection)
            .await?;

        parse_admit_reply(&reply)
    }

    async fn peek(&self, key: &str, now_ms: u64, window_ms: u64, limit: u64) -> Result<Snapshot> {
        let mut connection = self.connection.clone();

        let current: i64 = self
            .peek
            .key(self.store_key(key))
            .arg(prune_bound(now_ms, window_ms))
            .invoke_async(&mut connection)
            .await?;

        let current = u64::try_from(current).map_err(|_| {
            SlidewinError::StoreProtocol(format!("negative window size {}", current))
        })?;

        debug!(key = %key, current = current, "Peeked Redis window");
        Ok(Snapshot::new(current, limit))
    }
}

/// Exclusive ZREMRANGEBYSCORE bound: everything strictly below the cutoff goes.
fn prune_bound(now_ms: u64, window_ms: u64) -> String {
    format!("({}", live_cutoff(now_ms, window_ms))
}

fn parse_admit_reply(reply: &[i64]) -> Result<Evaluation> {
    let [flag, remaining] = reply else {
        return Err(SlidewinError::StoreProtocol(format!(
            "expected 2 values from admit script, got {}",
            reply.len()
        )));
    };

    let allowed = match *flag {
        0 => false,
        1 => true,
        other => {
            return Err(SlidewinError::StoreProtocol(format!(
                "admit flag must be 0 or 1, got {}",
                other
            )))
        }
    };

    let remaining = u64::try_from(*remaining).map_err(|_| {
        SlidewinError::StoreProtocol(format!("negative remaining {}", remaining))
    })?;

    Ok(Evaluation { allowed, remaining })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prune_bound_is_exclusive() {
        assert_eq!(prune_bound(5_000, 1_000), "(4000");
        assert_eq!(prune_bound(500, 1_000), "(0");
    }

    #[test]
    fn test_parse_admit_reply() {
        assert_eq!(
            parse_admit_reply(&[1, 4]).unwrap(),
            Evaluation {
                allowed: true,
                remaining: 4
            }
        );
        assert_eq!(
            parse_admit_reply(&[0, 0]).unwrap(),
            Evaluation {
                allowed: false,
                remaining: 0
            }
        );
    }

    #[test]
    fn test_parse_admit_reply_rejects_malformed() {
        assert!(matches!(
            parse_admit_reply(&[1]),
            Err(SlidewinError::StoreProtocol(_))
        ));
        assert!(matches!(
            parse_admit_reply(&[1, 2, 3]),
            Err(SlidewinError::StoreProtocol(_))
        ));
        assert!(matches!(
            parse_admit_reply(&[2, 0]),
            Err(SlidewinError::StoreProtocol(_))
        ));
        assert!(matches!(
            parse_admit_reply(&[1, -1]),
            Err(SlidewinError::StoreProtocol(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_url() {
        let err = RedisStore::connect("not a url", DEFAULT_KEY_PREFIX)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SlidewinError::Config(_)));
    }
}
