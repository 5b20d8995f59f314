//! Redis-backed dispatch queue.
//!
//! Layout under `{prefix}`:
//! - `{prefix}:pending`    ZSET id -> visible-at (epoch ms)
//! - `{prefix}:leases`     ZSET id -> lease expiry (epoch ms)
//! - `{prefix}:tokens`     HASH id -> current lease token
//! - `{prefix}:deliveries` HASH id -> hand-out count
//!
//! Every state change is a Lua script so lease hand-out, expiry and release
//! are atomic across workers. Timestamps come from the injected clock, not the
//! Redis server.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::Script;
use redis::aio::ConnectionManager;
use uuid::Uuid;

use herald_common::types::NotificationId;

use super::{DEFAULT_POLL_INTERVAL, DispatchQueue, Lease};
use crate::clock::{Clock, add_duration};
use crate::error::QueueError;

const ENQUEUE_SCRIPT: &str = r#"
if redis.call('HEXISTS', KEYS[2], ARGV[1]) == 1 then
    return 0
end
local current = redis.call('ZSCORE', KEYS[1], ARGV[1])
if current and tonumber(current) <= tonumber(ARGV[2]) then
    return 0
end
redis.call('ZADD', KEYS[1], ARGV[2], ARGV[1])
return 1
"#;

const DEQUEUE_SCRIPT: &str = r#"
local expired = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1])
for _, id in ipairs(expired) do
    local expired_at = redis.call('ZSCORE', KEYS[2], id)
    redis.call('ZREM', KEYS[2], id)
    redis.call('HDEL', KEYS[3], id)
    local current = redis.call('ZSCORE', KEYS[1], id)
    if (not current) or tonumber(current) > tonumber(expired_at) then
        redis.call('ZADD', KEYS[1], expired_at, id)
    end
end
local ready = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 1)
if #ready == 0 then
    return false
end
local id = ready[1]
redis.call('ZREM', KEYS[1], id)
redis.call('ZADD', KEYS[2], ARGV[2], id)
redis.call('HSET', KEYS[3], id, ARGV[3])
local deliveries = redis.call('HINCRBY', KEYS[4], id, 1)
return {id, deliveries}
"#;

const ACK_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[2], ARGV[1]) ~= ARGV[2] then
    return 0
end
redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('HDEL', KEYS[2], ARGV[1])
redis.call('HDEL', KEYS[3], ARGV[1])
return 1
"#;

const NACK_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[3], ARGV[1]) ~= ARGV[2] then
    return 0
end
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('HDEL', KEYS[3], ARGV[1])
local current = redis.call('ZSCORE', KEYS[1], ARGV[1])
if (not current) or tonumber(current) > tonumber(ARGV[3]) then
    redis.call('ZADD', KEYS[1], ARGV[3], ARGV[1])
end
return 1
"#;

#[derive(Debug, Clone)]
struct QueueKeys {
    pending: String,
    leases: String,
    tokens: String,
    deliveries: String,
}

impl QueueKeys {
    fn new(prefix: &str) -> Self {
        Self {
            pending: format!("{}:pending", prefix),
            leases: format!("{}:leases", prefix),
            tokens: format!("{}:tokens", prefix),
            deliveries: format!("{}:deliveries", prefix),
        }
    }
}

pub struct RedisDispatchQueue {
    conn: ConnectionManager,
    keys: QueueKeys,
    clock: Arc<dyn Clock>,
    lease_timeout: Duration,
    poll_interval: Duration,
    enqueue_script: Script,
    dequeue_script: Script,
    ack_script: Script,
    nack_script: Script,
}

impl RedisDispatchQueue {
    pub fn new(
        conn: ConnectionManager,
        key_prefix: &str,
        clock: Arc<dyn Clock>,
        lease_timeout: Duration,
    ) -> Self {
        Self {
            conn,
            keys: QueueKeys::new(key_prefix),
            clock,
            lease_timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
            enqueue_script: Script::new(ENQUEUE_SCRIPT),
            dequeue_script: Script::new(DEQUEUE_SCRIPT),
            ack_script: Script::new(ACK_SCRIPT),
            nack_script: Script::new(NACK_SCRIPT),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Drop every key owned by this queue.
    pub async fn purge(&self) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("DEL")
            .arg(&self.keys.pending)
            .arg(&self.keys.leases)
            .arg(&self.keys.tokens)
            .arg(&self.keys.deliveries)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    fn millis_after(&self, delay: Duration) -> i64 {
        add_duration(self.clock.now(), delay).timestamp_millis()
    }
}

#[async_trait]
impl DispatchQueue for RedisDispatchQueue {
    async fn enqueue(&self, id: NotificationId, delay: Duration) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let added: i64 = self
            .enqueue_script
            .key(&self.keys.pending)
            .key(&self.keys.tokens)
            .arg(id)
            .arg(self.millis_after(delay))
            .invoke_async(&mut conn)
            .await?;

        if added == 0 {
            tracing::debug!(notification_id = id, "Enqueue collapsed into existing entry");
        }
        Ok(())
    }

    async fn try_dequeue(&self) -> Result<Option<Lease>, QueueError> {
        let mut conn = self.conn.clone();
        let now = self.clock.now();
        let expires_at = add_duration(now, self.lease_timeout);
        let token = Uuid::new_v4();

        let leased: Option<(NotificationId, i64)> = self
            .dequeue_script
            .key(&self.keys.pending)
            .key(&self.keys.leases)
            .key(&self.keys.tokens)
            .key(&self.keys.deliveries)
            .arg(now.timestamp_millis())
            .arg(expires_at.timestamp_millis())
            .arg(token.to_string())
            .invoke_async(&mut conn)
            .await?;

        let Some((id, deliveries)) = leased else {
            return Ok(None);
        };
        let deliveries = u32::try_from(deliveries)
            .map_err(|_| QueueError::Malformed(format!("delivery count {} for {}", deliveries, id)))?;

        Ok(Some(Lease {
            id,
            token,
            deliveries,
            expires_at,
        }))
    }

    async fn ack(&self, lease: &Lease) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let released: i64 = self
            .ack_script
            .key(&self.keys.leases)
            .key(&self.keys.tokens)
            .key(&self.keys.deliveries)
            .arg(lease.id)
            .arg(lease.token.to_string())
            .invoke_async(&mut conn)
            .await?;

        if released == 0 {
            tracing::debug!(notification_id = lease.id, "Ignoring ack for stale lease");
        }
        Ok(())
    }

    async fn nack(&self, lease: &Lease, delay: Duration) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let released: i64 = self
            .nack_script
            .key(&self.keys.pending)
            .key(&self.keys.leases)
            .key(&self.keys.tokens)
            .arg(lease.id)
            .arg(lease.token.to_string())
            .arg(self.millis_after(delay))
            .invoke_async(&mut conn)
            .await?;

        if released == 0 {
            tracing::debug!(notification_id = lease.id, "Ignoring nack for stale lease");
        }
        Ok(())
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}
