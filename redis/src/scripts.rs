//! Lua scripts executed atomically on the Redis server.
//!
//! Reply codes follow [`flashsale_core::ledger`]: `-1` insufficient, `-2`
//! counter absent, `-3` marker already present.

use redis::Script;

/// `KEYS[1]` stock key, `ARGV[1]` quantity.
///
/// Returns the new remaining count, `-1` or `-2`.
pub const DECREMENT: &str = r"
local stock = redis.call('GET', KEYS[1])
if not stock then
    return -2
end
local qty = tonumber(ARGV[1])
if tonumber(stock) < qty then
    return -1
end
return redis.call('DECRBY', KEYS[1], qty)
";

/// `KEYS[1]` stock key, `KEYS[2]` dedup key, `ARGV[1]` quantity,
/// `ARGV[2]` marker TTL in seconds.
///
/// Returns the new remaining count, `-1`, `-2` or `-3`. Nothing is written
/// unless both the decrement and the marker happen.
pub const CLAIM: &str = r"
if redis.call('EXISTS', KEYS[2]) == 1 then
    return -3
end
local stock = redis.call('GET', KEYS[1])
if not stock then
    return -2
end
local qty = tonumber(ARGV[1])
if tonumber(stock) < qty then
    return -1
end
local remaining = redis.call('DECRBY', KEYS[1], qty)
redis.call('SET', KEYS[2], '1', 'EX', tonumber(ARGV[2]))
return remaining
";

/// `KEYS[1]` stock key, `ARGV[1]` quantity.
///
/// Returns `1` if units were given back, `0` if the sale no longer exists.
pub const RESTORE: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return 0
end
redis.call('INCRBY', KEYS[1], tonumber(ARGV[1]))
return 1
";

/// `KEYS[1]` window key, `ARGV[1]` now (ms), `ARGV[2]` window (seconds),
/// `ARGV[3]` capacity, `ARGV[4]` unique member.
///
/// Returns `1` when admitted (and recorded), `0` when the window is full.
pub const SLIDING_WINDOW: &str = r"
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local capacity = tonumber(ARGV[3])
redis.call('ZREMRANGEBYSCORE', KEYS[1], 0, now - window * 1000)
if redis.call('ZCARD', KEYS[1]) < capacity then
    redis.call('ZADD', KEYS[1], now, ARGV[4])
    redis.call('EXPIRE', KEYS[1], window)
    return 1
end
return 0
";

/// Compiled scripts, hashed once and shared by clones.
#[derive(Debug, Clone)]
pub struct Scripts {
    /// [`DECREMENT`]
    pub decrement: Script,
    /// [`CLAIM`]
    pub claim: Script,
    /// [`RESTORE`]
    pub restore: Script,
}

impl Scripts {
    /// Compile the ledger scripts.
    #[must_use]
    pub fn new() -> Self {
        Self {
            decrement: Script::new(DECREMENT),
            claim: Script::new(CLAIM),
            restore: Script::new(RESTORE),
        }
    }
}

impl Default for Scripts {
    fn default() -> Self {
        Self::new()
    }
}
