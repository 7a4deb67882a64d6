//! Wall-clock helpers for rate-limit arithmetic.
//!
//! Bucket delays are computed exclusively from server-supplied values (the
//! `x-ratelimit-reset` header against the server's own `Date`), so clock skew
//! between this process and the remote service never inflates or deflates a
//! wait. The local wall clock is only consulted for snapshot reporting of
//! client-side token buckets. Monotonic waits go through [`tokio::time`],
//! which makes them controllable from tests with a paused runtime clock.

use std::time::{SystemTime, UNIX_EPOCH};
use time::{format_description::well_known::Rfc2822, OffsetDateTime};

/// Current unix timestamp in milliseconds.
pub(crate) fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis() as u64)
}

/// Parse an RFC 1123 `Date` header value into unix milliseconds.
///
/// The obsolete `GMT` zone name that HTTP dates carry is normalized to a
/// numeric offset first, since the RFC 2822 parser only accepts those.
pub(crate) fn parse_date_ms(value: &str) -> Option<u64> {
    let normalized = value.trim().replace("GMT", "+0000");
    let date = OffsetDateTime::parse(&normalized, &Rfc2822).ok()?;
    let millis = date.unix_timestamp_nanos() / 1_000_000;

    u64::try_from(millis).ok()
}
