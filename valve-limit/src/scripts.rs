//! Lua sources executed server-side by [`crate::RedisStore`].
//!
//! [`crate::MemoryStore`] mirrors each of these step for step.

/// KEYS[1] = lock key, ARGV[1] = expected token.
pub(crate) const UNLOCK: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
	return redis.call("DEL", KEYS[1])
end
return 0
"#;

/// KEYS[1] = previous window, KEYS[2] = current window.
/// ARGV = weight, limit, seconds until the window ends, current bucket expiry.
/// Returns `{0, 0, remaining}` on admit, `{-1, retry_after, 0}` on reject.
pub(crate) const SLIDING_WINDOW: &str = r#"
local prev = tonumber(redis.call("GET", KEYS[1]) or "0")
local curr = tonumber(redis.call("GET", KEYS[2]) or "0")
local weight = tonumber(ARGV[1])
local limit = tonumber(ARGV[2])
local ttl_secs = tonumber(ARGV[3])
local expire_secs = tonumber(ARGV[4])

local rate = prev * weight + curr
if rate >= limit then
	return {-1, ttl_secs, 0}
end

redis.call("INCR", KEYS[2])
redis.call("EXPIRE", KEYS[2], expire_secs)
return {0, 0, math.max(0, math.floor(limit - rate - 1))}
"#;

/// KEYS[1] = window counter. ARGV = limit, expiry.
/// Returns `{0, ttl, remaining}` on admit, `{-1, ttl, 0}` on reject.
pub(crate) const FIXED_WINDOW: &str = r#"
local limit = tonumber(ARGV[1])
local expire_secs = tonumber(ARGV[2])

local current = redis.call("INCR", KEYS[1])
if current == 1 then
	redis.call("EXPIRE", KEYS[1], expire_secs)
end

local ttl = redis.call("TTL", KEYS[1])
if ttl < 0 then
	redis.call("EXPIRE", KEYS[1], expire_secs)
	ttl = expire_secs
end

if current > limit then
	return {-1, ttl, 0}
end
return {0, ttl, limit - current}
"#;

/// KEYS[1] = tokens, KEYS[2] = last refill. ARGV = capacity, now, refill rate.
/// Returns `{1, tokens}` on admit, `{0, tokens}` on reject; tokens as a string.
pub(crate) const TOKEN_BUCKET: &str = r#"
local capacity = tonumber(ARGV[1])
local now = tonumber(ARGV[2])
local rate = tonumber(ARGV[3])

local tokens = tonumber(redis.call("GET", KEYS[1]) or capacity)
local last = tonumber(redis.call("GET", KEYS[2]) or now)

local delta = math.max(0, now - last)
tokens = math.min(capacity, tokens + delta * rate)

local admitted = 0
if tokens >= 1 then
	tokens = tokens - 1
	admitted = 1
end

redis.call("SET", KEYS[1], tostring(tokens), "EX", 3600)
redis.call("SET", KEYS[2], tostring(math.max(now, last)), "EX", 3600)
return {admitted, tostring(tokens)}
"#;

/// KEYS[1] = level, KEYS[2] = last drain. ARGV = now, leak rate, capacity.
/// Returns `{1, level}` on admit, `{0, level}` on reject; level as a string.
pub(crate) const LEAKY_BUCKET: &str = r#"
local now = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local capacity = tonumber(ARGV[3])

local level = tonumber(redis.call("GET", KEYS[1]) or "0")
local last = tonumber(redis.call("GET", KEYS[2]) or now)

level = math.max(0, level - math.max(0, now - last) * rate)

local admitted = 0
if level + 1 <= capacity then
	level = level + 1
	admitted = 1
end

redis.call("SET", KEYS[1], tostring(level), "EX", 3600)
redis.call("SET", KEYS[2], tostring(math.max(now, last)), "EX", 3600)
return {admitted, tostring(level)}
"#;
