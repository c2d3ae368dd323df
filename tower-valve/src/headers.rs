//! Quota headers attached to admitted and rejected responses.

use std::time::Duration;

use http::HeaderMap;
use http::HeaderName;
use http::HeaderValue;

use valve_limit::Decision;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
/// Seconds until the quota resets.
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

pub(crate) fn insert_quota(headers: &mut HeaderMap, limit: u64, remaining: u64, reset: Duration) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(reset.as_secs()));
}

/// Report `decision` unless an inner stage already reported a tighter quota.
pub(crate) fn insert_decision(headers: &mut HeaderMap, decision: &Decision) {
    let tighter_inside = headers
        .get(X_RATELIMIT_REMAINING)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .is_some_and(|remaining| remaining <= decision.remaining);
    if !tighter_inside {
        insert_quota(headers, decision.limit, decision.remaining, decision.reset_in);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision(limit: u64, remaining: u64) -> Decision {
        Decision {
            allowed: true,
            limit,
            remaining,
            reset_in: Duration::from_secs(30),
        }
    }

    #[test]
    fn the_tightest_quota_wins() {
        let mut headers = HeaderMap::new();
        insert_decision(&mut headers, &decision(5, 1));
        insert_decision(&mut headers, &decision(100, 99));
        assert_eq!(headers[X_RATELIMIT_LIMIT], "5");
        assert_eq!(headers[X_RATELIMIT_REMAINING], "1");

        insert_decision(&mut headers, &decision(10, 0));
        assert_eq!(headers[X_RATELIMIT_LIMIT], "10");
        assert_eq!(headers[X_RATELIMIT_RESET], "30");
    }
}
