//! Redis-backed rate-limit state shared across facilitator processes

use super::{RateLimit, RateLimitDecision, RateLimitStore};
use crate::{Result, X402Error};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};

// KEYS[1] log key
// ARGV[1] now ms, ARGV[2] window ms, ARGV[3] member
// Returns {count before this attempt, oldest score}
const SLIDING_WINDOW_CONSUME: &str = r#"
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', now - window)
local count = redis.call('ZCARD', KEYS[1])
redis.call('ZADD', KEYS[1], now, ARGV[3])
redis.call('PEXPIRE', KEYS[1], window)
local oldest = redis.call('ZRANGE', KEYS[1], 0, 0, 'WITHSCORES')
return {count, oldest[2]}
"#;

// Read-only variant: counts entries inside the window without purging
const SLIDING_WINDOW_PEEK: &str = r#"
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local lower = '(' .. tostring(now - window)
local count = redis.call('ZCOUNT', KEYS[1], lower, '+inf')
local oldest = redis.call('ZRANGEBYSCORE', KEYS[1], lower, '+inf', 'WITHSCORES', 'LIMIT', 0, 1)
if oldest[2] then
  return {count, oldest[2]}
end
return {count, tostring(now)}
"#;

// KEYS[1] bucket hash
// ARGV[1] capacity, ARGV[2] refill per second, ARGV[3] now ms,
// ARGV[4] consume flag, ARGV[5] ttl ms
// Returns {allowed, tokens as string}
const TOKEN_BUCKET: &str = r#"
local capacity = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local consume = ARGV[4] == '1'
local state = redis.call('HMGET', KEYS[1], 'tokens', 'last_refill')
local tokens = capacity
if state[1] then
  local elapsed = math.max(0, now - tonumber(state[2]))
  tokens = math.min(capacity, tonumber(state[1]) + elapsed / 1000 * rate)
end
local allowed = 0
if tokens >= 1 then
  allowed = 1
  if consume then
    tokens = tokens - 1
  end
end
if consume then
  redis.call('HSET', KEYS[1], 'tokens', tostring(tokens), 'last_refill', tostring(now))
  redis.call('PEXPIRE', KEYS[1], ARGV[5])
end
return {allowed, tostring(tokens)}
"#;

/// Rate-limit store on Redis sorted sets and hashes
///
/// Every check runs as one Lua script, which Redis executes atomically.
#[derive(Clone)]
pub struct RedisRateLimitStore {
    conn: ConnectionManager,
    key_prefix: String,
    consume_window: Script,
    peek_window: Script,
    bucket: Script,
}

impl std::fmt::Debug for RedisRateLimitStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisRateLimitStore")
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl RedisRateLimitStore {
    /// Connect to Redis; `key_prefix` defaults to `x402:`
    pub async fn new(redis_url: &str, key_prefix: Option<&str>) -> Result<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| X402Error::config(format!("Invalid Redis URL: {}", e)))?;
        let conn = ConnectionManager::new(client).await?;

        tracing::info!(redis_url = %redis_url, "rate limiter using Redis");

        Ok(Self {
            conn,
            key_prefix: key_prefix.unwrap_or("x402:").to_string(),
            consume_window: Script::new(SLIDING_WINDOW_CONSUME),
            peek_window: Script::new(SLIDING_WINDOW_PEEK),
            bucket: Script::new(TOKEN_BUCKET),
        })
    }

    fn make_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

fn parse_score(raw: &str, fallback: i64) -> i64 {
    raw.parse::<f64>().map(|v| v as i64).unwrap_or(fallback)
}

#[async_trait]
impl RateLimitStore for RedisRateLimitStore {
    async fn sliding_window(
        &self,
        key: &str,
        limit: &RateLimit,
        now: DateTime<Utc>,
        consume: bool,
    ) -> Result<RateLimitDecision> {
        let mut conn = self.conn.clone();
        let now_ms = now.timestamp_millis();
        let window_ms = limit.window_millis();
        let max = u64::from(limit.max_requests);

        let script = if consume {
            &self.consume_window
        } else {
            &self.peek_window
        };
        let mut invocation = script.key(self.make_key(key));
        invocation.arg(now_ms).arg(window_ms);
        if consume {
            // Unique member so two attempts in the same millisecond both count
            invocation.arg(format!("{}-{}", now_ms, uuid::Uuid::new_v4()));
        }

        let (count, oldest): (u64, String) = invocation.invoke_async(&mut conn).await?;
        let reset_at = from_millis(parse_score(&oldest, now_ms) + window_ms);

        let decision = if consume {
            let allowed = count < max;
            RateLimitDecision {
                allowed,
                remaining: if allowed { (max - count - 1) as u32 } else { 0 },
                reset_at,
            }
        } else {
            RateLimitDecision {
                allowed: count < max,
                remaining: max.saturating_sub(count) as u32,
                reset_at,
            }
        };
        Ok(decision)
    }

    async fn token_bucket(
        &self,
        key: &str,
        limit: &RateLimit,
        now: DateTime<Utc>,
        consume: bool,
    ) -> Result<RateLimitDecision> {
        let mut conn = self.conn.clone();
        let rate = limit.refill_per_second();

        let (allowed, tokens): (i64, String) = self
            .bucket
            .key(self.make_key(key))
            .arg(limit.max_requests)
            .arg(rate)
            .arg(now.timestamp_millis())
            .arg(if consume { "1" } else { "0" })
            .arg(limit.window_millis())
            .invoke_async(&mut conn)
            .await?;

        let tokens: f64 = tokens.parse().unwrap_or(0.0);
        Ok(RateLimitDecision {
            allowed: allowed == 1,
            remaining: tokens.floor().max(0.0) as u32,
            reset_at: limit.next_token_at(tokens, now),
        })
    }

    async fn clear(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(self.make_key(key)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::time::Duration;

    async fn connect() -> Option<RedisRateLimitStore> {
        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let prefix = format!("test:{}:", uuid::Uuid::new_v4());
        match RedisRateLimitStore::new(&redis_url, Some(&prefix)).await {
            Ok(store) => Some(store),
            Err(_) => {
                println!("Skipping Redis test: Redis not available at {}", redis_url);
                None
            }
        }
    }

    #[tokio::test]
    async fn test_redis_sliding_window_admits_exactly_max() {
        let Some(store) = connect().await else { return };
        let limit = RateLimit::new(3, Duration::from_secs(60));
        let now = Utc::now();

        let mut admitted = 0;
        for _ in 0..4 {
            if store.sliding_window("agent:op", &limit, now, true).await.unwrap().allowed {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 3);

        let later = now + chrono::Duration::seconds(61);
        let status = store.sliding_window("agent:op", &limit, later, false).await.unwrap();
        assert_eq!(status.remaining, 3);
    }

    #[tokio::test]
    async fn test_redis_token_bucket_refills() {
        let Some(store) = connect().await else { return };
        let limit = RateLimit::new(2, Duration::from_secs(2));
        let now = Utc::now();

        assert!(store.token_bucket("b", &limit, now, true).await.unwrap().allowed);
        assert!(store.token_bucket("b", &limit, now, true).await.unwrap().allowed);
        assert!(!store.token_bucket("b", &limit, now, true).await.unwrap().allowed);

        let later = now + chrono::Duration::seconds(1);
        assert!(store.token_bucket("b", &limit, later, true).await.unwrap().allowed);
    }
}
