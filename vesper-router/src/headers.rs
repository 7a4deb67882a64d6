//! Parse typed rate-limit headers from a response.
//!
//! The headers of a response may indicate a global rate limit, a bucketed
//! rate limit, or no rate limit at all. Endpoints that the service does not
//! rate limit send none of the `x-ratelimit-*` family, which parses to
//! [`RateLimitHeaders::None`] and is treated as "no delay required".

use crate::clock;
use serde::Deserialize;
use std::{
    error::Error,
    fmt::{Debug, Display, Formatter, Result as FmtResult},
    str::{self, Utf8Error},
    time::Duration,
};

/// A header failed to be parsed.
#[derive(Debug)]
pub struct HeaderParsingError {
    /// Detailed reason why the header failed to be parsed.
    pub(crate) kind: HeaderParsingErrorType,
    /// Original error leading up to this one.
    pub(crate) source: Option<Box<dyn Error + Send + Sync>>,
}

impl HeaderParsingError {
    /// Immutable reference to the type of error that occurred.
    #[must_use = "retrieving the type has no effect if left unused"]
    pub const fn kind(&self) -> &HeaderParsingErrorType {
        &self.kind
    }

    /// Consume the error, returning the source error if there is any.
    #[must_use = "consuming the error and retrieving the source has no effect if left unused"]
    pub fn into_source(self) -> Option<Box<dyn Error + Send + Sync>> {
        self.source
    }

    /// Consume the error, returning the owned error type and the source
    /// error.
    #[must_use = "consuming the error into its parts has no effect if left unused"]
    pub fn into_parts(self) -> (HeaderParsingErrorType, Option<Box<dyn Error + Send + Sync>>) {
        (self.kind, self.source)
    }

    /// Create a new error because a header is missing in the response.
    pub(crate) fn missing(name: HeaderName) -> Self {
        Self {
            kind: HeaderParsingErrorType::Missing { name },
            source: None,
        }
    }

    /// Create a new error because a header is not valid UTF-8.
    pub(crate) fn not_utf8(name: HeaderName, value: Vec<u8>, source: Utf8Error) -> Self {
        Self {
            kind: HeaderParsingErrorType::NotUtf8 { name, value },
            source: Some(Box::new(source)),
        }
    }
}

impl Display for HeaderParsingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            HeaderParsingErrorType::Missing { name } => {
                f.write_str("at least one header, '")?;
                f.write_str(name.name())?;

                f.write_str("', is missing")
            }
            HeaderParsingErrorType::NotUtf8 { name, value } => {
                f.write_str("header '")?;
                f.write_str(name.name())?;
                f.write_str("' contains invalid UTF-8: ")?;

                Debug::fmt(value, f)
            }
            HeaderParsingErrorType::Parsing { kind, name, value } => {
                f.write_str("header '")?;
                f.write_str(name.name())?;
                f.write_str("' can not be parsed as a ")?;
                f.write_str(kind.name())?;
                f.write_str(": '")?;
                f.write_str(value)?;

                f.write_str("'")
            }
        }
    }
}

impl Error for HeaderParsingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| &**source as &(dyn Error + 'static))
    }
}

/// Type of [`HeaderParsingError`] that occurred.
#[derive(Debug)]
#[non_exhaustive]
pub enum HeaderParsingErrorType {
    /// Expected header is missing.
    Missing {
        /// Name of the header that should be present in the list.
        name: HeaderName,
    },
    /// Header value is not UTF-8 valid.
    NotUtf8 {
        /// Name of the header.
        name: HeaderName,
        /// Value of the header.
        value: Vec<u8>,
    },
    /// Header value is not of the expected type.
    Parsing {
        /// Type of header value expected.
        kind: HeaderType,
        /// Name of the header.
        name: HeaderName,
        /// Value of the header.
        value: String,
    },
}

/// Typed name of a header the router consumes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum HeaderName {
    /// Server clock anchor.
    Date,
    /// Global rate-limit flag.
    Global,
    /// Remaining requests allotted in the bucket.
    Remaining,
    /// When the bucket resets, in unix seconds.
    Reset,
    /// How long until a request can be tried again.
    RetryAfter,
}

impl HeaderName {
    /// Lowercased name for the date header.
    pub const DATE: &'static str = "date";

    /// Lowercased name for the global header.
    pub const GLOBAL: &'static str = "x-ratelimit-global";

    /// Lowercased name for the remaining header.
    pub const REMAINING: &'static str = "x-ratelimit-remaining";

    /// Lowercased name for the reset header.
    pub const RESET: &'static str = "x-ratelimit-reset";

    /// Lowercased name for the retry-after header.
    // It's correct for this to not have the `x-ratelimit-` prefix.
    pub const RETRY_AFTER: &'static str = "retry-after";

    /// Lowercased name of the header.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Date => Self::DATE,
            Self::Global => Self::GLOBAL,
            Self::Remaining => Self::REMAINING,
            Self::Reset => Self::RESET,
            Self::RetryAfter => Self::RETRY_AFTER,
        }
    }
}

impl Display for HeaderName {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.name())
    }
}

/// Expected type of a header value.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum HeaderType {
    /// Type of header value is a bool.
    Bool,
    /// Type of header value is a date.
    Date,
    /// Type of header value is a float.
    Float,
    /// Type of header value is an integer.
    Integer,
}

impl HeaderType {
    /// Name of the type of header.
    const fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Date => "date",
            Self::Float => "float",
            Self::Integer => "integer",
        }
    }
}

impl Display for HeaderType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.name())
    }
}

/// Rate limit covering every bucket of the credential.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GlobalLimited {
    /// How long to suspend all outgoing requests.
    retry_after: Duration,
}

impl GlobalLimited {
    /// How long to suspend all outgoing requests.
    #[must_use]
    pub const fn retry_after(&self) -> Duration {
        self.retry_after
    }
}

/// Bucketed rate-limit information is available.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Present {
    /// Server clock when the response was produced, unix milliseconds.
    date: u64,
    /// Remaining number of requests in the bucket's window.
    remaining: u64,
    /// When the bucket resets, unix milliseconds on the server's clock.
    reset: u64,
}

impl Present {
    /// Server clock anchor in unix milliseconds.
    #[must_use]
    pub const fn date(&self) -> u64 {
        self.date
    }

    /// Remaining number of requests in the window.
    #[must_use]
    pub const fn remaining(&self) -> u64 {
        self.remaining
    }

    /// When the bucket resets, in unix milliseconds.
    #[must_use]
    pub const fn reset(&self) -> u64 {
        self.reset
    }

    /// Minimum wait before the next request may be dispatched.
    ///
    /// Zero while the bucket has requests remaining; otherwise the distance
    /// between the server's reset time and the server's own clock, which
    /// keeps the wait immune to skew against the local clock.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        if self.remaining > 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(self.reset.saturating_sub(self.date))
        }
    }
}

/// Parsed rate-limit headers.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum RateLimitHeaders {
    /// The credential is globally rate limited.
    GlobalLimited(GlobalLimited),
    /// No rate-limit headers present.
    None,
    /// Bucketed rate-limit information is available.
    Present(Present),
}

impl RateLimitHeaders {
    /// Whether the headers are a global rate limit.
    #[must_use]
    pub const fn is_global(&self) -> bool {
        matches!(self, Self::GlobalLimited(_))
    }

    /// Whether there are no rate-limit headers.
    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Whether bucketed information is present.
    #[must_use]
    pub const fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }

    /// Parse headers from an iterator of name-value pairs.
    ///
    /// Header names must be lowercased; values may be any bytes and are
    /// checked for validity before parsing.
    ///
    /// # Errors
    ///
    /// Returns an error if a required header is missing or a header value is
    /// of an invalid type.
    pub fn from_pairs<'a>(
        headers: impl Iterator<Item = (&'a str, &'a [u8])>,
    ) -> Result<Self, HeaderParsingError> {
        let mut date = None;
        let mut global = false;
        let mut remaining = None;
        let mut reset = None;
        let mut retry_after = None;

        for (name, value) in headers {
            match name {
                HeaderName::DATE => {
                    let text = header_str(HeaderName::Date, value)?;
                    let parsed =
                        clock::parse_date_ms(text).ok_or_else(|| HeaderParsingError {
                            kind: HeaderParsingErrorType::Parsing {
                                kind: HeaderType::Date,
                                name: HeaderName::Date,
                                value: text.to_owned(),
                            },
                            source: None,
                        })?;

                    date.replace(parsed);
                }
                HeaderName::GLOBAL => {
                    global = header_bool(HeaderName::Global, value)?;
                }
                HeaderName::REMAINING => {
                    remaining.replace(header_int(HeaderName::Remaining, value)?);
                }
                HeaderName::RESET => {
                    let reset_value = header_float(HeaderName::Reset, value)?;

                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    reset.replace((reset_value * 1000.).ceil() as u64);
                }
                HeaderName::RETRY_AFTER => {
                    let text = header_str(HeaderName::RetryAfter, value)?;

                    retry_after.replace(parse_retry_after(text).ok_or_else(|| {
                        HeaderParsingError {
                            kind: HeaderParsingErrorType::Parsing {
                                kind: HeaderType::Float,
                                name: HeaderName::RetryAfter,
                                value: text.to_owned(),
                            },
                            source: None,
                        }
                    })?);
                }
                _ => continue,
            }
        }

        if global {
            let retry_after =
                retry_after.ok_or_else(|| HeaderParsingError::missing(HeaderName::RetryAfter))?;

            return Ok(Self::GlobalLimited(GlobalLimited { retry_after }));
        }

        // No rate-limit values at all means the route isn't rate limited.
        if remaining.is_none() && reset.is_none() {
            return Ok(Self::None);
        }

        Ok(Self::Present(Present {
            date: date.ok_or_else(|| HeaderParsingError::missing(HeaderName::Date))?,
            remaining: remaining
                .ok_or_else(|| HeaderParsingError::missing(HeaderName::Remaining))?,
            reset: reset.ok_or_else(|| HeaderParsingError::missing(HeaderName::Reset))?,
        }))
    }
}

/// Parse a retry-after value that may be in seconds or milliseconds.
///
/// Values containing a decimal point are fractional seconds. Integral values
/// under 1000 are whole seconds; anything larger is taken as milliseconds,
/// since no real retry window spans a thousand seconds while millisecond
/// payloads always exceed that magnitude.
pub(crate) fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();

    if value.contains('.') {
        let seconds: f64 = value.parse().ok()?;

        return (seconds >= 0.).then(|| Duration::from_secs_f64(seconds));
    }

    let number: u64 = value.parse().ok()?;

    Some(if number < 1000 {
        Duration::from_secs(number)
    } else {
        Duration::from_millis(number)
    })
}

/// JSON body of a 429 response, used when the global flag or the retry
/// window only appear in the payload rather than the headers.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct RateLimitBody {
    /// Whether the rate limit affects every bucket of the credential.
    #[serde(default)]
    pub global: bool,
    /// How long to wait before retrying, in seconds or milliseconds.
    #[serde(default)]
    pub retry_after: Option<f64>,
}

impl RateLimitBody {
    /// Deserialize a 429 body, tolerating any malformed payload.
    pub fn from_slice(body: &[u8]) -> Self {
        serde_json::from_slice(body).unwrap_or_default()
    }

    /// The retry window carried in the body, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        let number = self.retry_after?;

        if number.fract() > f64::EPSILON {
            return (number >= 0.).then(|| Duration::from_secs_f64(number));
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let whole = number as u64;

        Some(if whole < 1000 {
            Duration::from_secs(whole)
        } else {
            Duration::from_millis(whole)
        })
    }
}

/// Parse a value as a boolean.
fn header_bool(name: HeaderName, value: &[u8]) -> Result<bool, HeaderParsingError> {
    let text = header_str(name, value)?;

    let end = text.parse().map_err(|source| HeaderParsingError {
        kind: HeaderParsingErrorType::Parsing {
            kind: HeaderType::Bool,
            name,
            value: text.to_owned(),
        },
        source: Some(Box::new(source)),
    })?;

    Ok(end)
}

/// Parse a value expected to be a float.
fn header_float(name: HeaderName, value: &[u8]) -> Result<f64, HeaderParsingError> {
    let text = header_str(name, value)?;

    let end = text.parse().map_err(|source| HeaderParsingError {
        kind: HeaderParsingErrorType::Parsing {
            kind: HeaderType::Float,
            name,
            value: text.to_owned(),
        },
        source: Some(Box::new(source)),
    })?;

    Ok(end)
}

/// Parse a value expected to be an integer.
fn header_int(name: HeaderName, value: &[u8]) -> Result<u64, HeaderParsingError> {
    let text = header_str(name, value)?;

    let end = text.parse().map_err(|source| HeaderParsingError {
        kind: HeaderParsingErrorType::Parsing {
            kind: HeaderType::Integer,
            name,
            value: text.to_owned(),
        },
        source: Some(Box::new(source)),
    })?;

    Ok(end)
}

/// Parse a value expected to be a UTF-8 valid string.
fn header_str(name: HeaderName, value: &[u8]) -> Result<&str, HeaderParsingError> {
    let text = str::from_utf8(value)
        .map_err(|source| HeaderParsingError::not_utf8(name, value.to_owned(), source))?;

    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::{
        GlobalLimited, HeaderName, HeaderParsingError, HeaderParsingErrorType, HeaderType,
        Present, RateLimitBody, RateLimitHeaders,
    };
    use static_assertions::{assert_fields, assert_impl_all};
    use std::{
        error::Error,
        fmt::{Debug, Display},
        time::Duration,
    };

    assert_fields!(HeaderParsingErrorType::Missing: name);
    assert_fields!(HeaderParsingErrorType::NotUtf8: name, value);
    assert_fields!(HeaderParsingErrorType::Parsing: kind, name, value);
    assert_impl_all!(
        HeaderName: Clone,
        Copy,
        Debug,
        Display,
        Eq,
        PartialEq,
        Send,
        Sync
    );
    assert_impl_all!(HeaderParsingErrorType: Debug, Send, Sync);
    assert_impl_all!(HeaderParsingError: Error, Send, Sync);
    assert_impl_all!(
        HeaderType: Clone,
        Copy,
        Debug,
        Display,
        Eq,
        PartialEq,
        Send,
        Sync
    );
    assert_impl_all!(GlobalLimited: Clone, Debug, Eq, PartialEq, Send, Sync);
    assert_impl_all!(Present: Clone, Debug, Eq, PartialEq, Send, Sync);
    assert_impl_all!(RateLimitHeaders: Clone, Debug, Send, Sync);

    const DATE: &str = "Thu, 01 Jan 2015 00:00:00 GMT";
    const DATE_MS: u64 = 1_420_070_400_000;

    #[test]
    fn global() -> Result<(), Box<dyn Error>> {
        let headers = [
            ("retry-after", "65".as_bytes()),
            ("x-ratelimit-global", "true".as_bytes()),
        ];

        let parsed = RateLimitHeaders::from_pairs(headers.into_iter())?;
        assert!(matches!(
            parsed,
            RateLimitHeaders::GlobalLimited(global)
            if global.retry_after() == Duration::from_secs(65)
        ));

        Ok(())
    }

    #[test]
    fn present() -> Result<(), Box<dyn Error>> {
        let headers = [
            ("date", DATE.as_bytes()),
            ("x-ratelimit-remaining", "0".as_bytes()),
            ("x-ratelimit-reset", "1420070402".as_bytes()),
        ];

        let parsed = RateLimitHeaders::from_pairs(headers.into_iter())?;
        let present = match parsed {
            RateLimitHeaders::Present(present) => present,
            other => panic!("headers aren't present: {other:?}"),
        };

        assert_eq!(0, present.remaining());
        assert_eq!(DATE_MS, present.date());
        assert_eq!(DATE_MS + 2000, present.reset());
        assert_eq!(Duration::from_secs(2), present.delay());

        Ok(())
    }

    #[test]
    fn present_with_remaining() -> Result<(), Box<dyn Error>> {
        let headers = [
            ("date", DATE.as_bytes()),
            ("x-ratelimit-remaining", "4".as_bytes()),
            ("x-ratelimit-reset", "1420070401".as_bytes()),
        ];

        let parsed = RateLimitHeaders::from_pairs(headers.into_iter())?;
        assert!(matches!(
            parsed,
            RateLimitHeaders::Present(present)
            if present.remaining() == 4 && present.delay() == Duration::ZERO
        ));

        Ok(())
    }

    #[test]
    fn reset_in_the_past_clamps_to_zero() -> Result<(), Box<dyn Error>> {
        let headers = [
            ("date", DATE.as_bytes()),
            ("x-ratelimit-remaining", "0".as_bytes()),
            ("x-ratelimit-reset", "1420070399".as_bytes()),
        ];

        let parsed = RateLimitHeaders::from_pairs(headers.into_iter())?;
        assert!(matches!(
            parsed,
            RateLimitHeaders::Present(present) if present.delay() == Duration::ZERO
        ));

        Ok(())
    }

    #[test]
    fn no_headers_is_none() -> Result<(), Box<dyn Error>> {
        let headers = [("date", DATE.as_bytes()), ("content-type", "application/json".as_bytes())];

        let parsed = RateLimitHeaders::from_pairs(headers.into_iter())?;
        assert!(parsed.is_none());

        Ok(())
    }

    #[test]
    fn retry_after_units() {
        assert_eq!(
            Some(Duration::from_secs(3)),
            super::parse_retry_after("3"),
        );
        assert_eq!(
            Some(Duration::from_millis(6500)),
            super::parse_retry_after("6.5"),
        );
        assert_eq!(
            Some(Duration::from_millis(2500)),
            super::parse_retry_after("2500"),
        );
        assert!(super::parse_retry_after("soon").is_none());
    }

    #[test]
    fn body_fallback() {
        let body = RateLimitBody::from_slice(br#"{"global": true, "retry_after": 3000}"#);
        assert!(body.global);
        assert_eq!(Some(Duration::from_secs(3)), body.retry_after());

        let body = RateLimitBody::from_slice(br#"{"retry_after": 1.5}"#);
        assert!(!body.global);
        assert_eq!(Some(Duration::from_millis(1500)), body.retry_after());

        let body = RateLimitBody::from_slice(b"not json");
        assert!(!body.global);
        assert!(body.retry_after().is_none());
    }
}
