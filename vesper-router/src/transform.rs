//! Cross-cutting response post-processors.
//!
//! Transformers run, in registration order, over every outcome a request
//! stream produces before the caller's future is completed. Each transformer
//! either forwards the outcome (possibly rewritten) or asks the stream to
//! re-enqueue the correlation at its head. Order matters: a transformer that
//! empties out a 404 shadows a later one that would retry on it.

use crate::{
    error::Error,
    request::{Correlation, Request},
    response::RawResponse,
    route::RouteMatcher,
};
use http::StatusCode;
use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    sync::Arc,
};

/// Outcome of applying one transformer.
pub enum Transformed {
    /// Pass the result on to the next transformer, or to the caller.
    Forward(Result<RawResponse, Error>),
    /// Re-enqueue the correlation at the head of its stream.
    Retry,
}

/// Function type of a custom transformer.
type CustomFn = dyn Fn(&Request, Result<RawResponse, Error>) -> Transformed + Send + Sync;

/// Built-in behavior of a transformer.
enum TransformerKind {
    /// Arbitrary user-supplied transformer.
    Custom(Arc<CustomFn>),
    /// Convert responses with the listed statuses into empty successes.
    EmptyOnStatus(Vec<StatusCode>),
    /// Re-enqueue once on the first response with a listed status.
    RetryOnceOnStatus(Vec<StatusCode>),
}

impl Debug for TransformerKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Custom(_) => f.write_str("Custom"),
            Self::EmptyOnStatus(statuses) => f.debug_tuple("EmptyOnStatus").field(statuses).finish(),
            Self::RetryOnceOnStatus(statuses) => {
                f.debug_tuple("RetryOnceOnStatus").field(statuses).finish()
            }
        }
    }
}

/// One element of a router's response pipeline.
#[derive(Debug)]
pub struct ResponseTransformer {
    /// Behavior of the transformer.
    kind: TransformerKind,
    /// Routes the transformer applies to.
    matcher: RouteMatcher,
}

impl ResponseTransformer {
    /// Convert 404 responses from matching routes into empty successes.
    #[must_use]
    pub fn empty_if_not_found(matcher: RouteMatcher) -> Self {
        Self {
            kind: TransformerKind::EmptyOnStatus(vec![StatusCode::NOT_FOUND]),
            matcher,
        }
    }

    /// Convert responses with any of the listed statuses into empty
    /// successes.
    #[must_use]
    pub fn empty_on_error_status(matcher: RouteMatcher, statuses: &[u16]) -> Self {
        Self {
            kind: TransformerKind::EmptyOnStatus(status_codes(statuses)),
            matcher,
        }
    }

    /// Re-enqueue a correlation once when its response has any of the listed
    /// statuses.
    ///
    /// The budget is per correlation: a second failing response is
    /// surfaced to the caller untouched.
    #[must_use]
    pub fn retry_once_on_error_status(matcher: RouteMatcher, statuses: &[u16]) -> Self {
        Self {
            kind: TransformerKind::RetryOnceOnStatus(status_codes(statuses)),
            matcher,
        }
    }

    /// Run an arbitrary function over matching outcomes.
    #[must_use]
    pub fn custom<F>(matcher: RouteMatcher, transform: F) -> Self
    where
        F: Fn(&Request, Result<RawResponse, Error>) -> Transformed + Send + Sync + 'static,
    {
        Self {
            kind: TransformerKind::Custom(Arc::new(transform)),
            matcher,
        }
    }

    /// Routes the transformer applies to.
    #[must_use]
    pub const fn matcher(&self) -> &RouteMatcher {
        &self.matcher
    }

    /// Apply the transformer to one outcome.
    pub(crate) fn apply(
        &self,
        correlation: &mut Correlation,
        result: Result<RawResponse, Error>,
    ) -> Transformed {
        match &self.kind {
            TransformerKind::Custom(transform) => transform(correlation.request(), result),
            TransformerKind::EmptyOnStatus(statuses) => match result {
                Ok(raw) if statuses.contains(&raw.status()) => {
                    Transformed::Forward(Ok(raw.into_empty()))
                }
                other => Transformed::Forward(other),
            },
            TransformerKind::RetryOnceOnStatus(statuses) => match result {
                // An earlier transformer that emptied the response out
                // shadows the retry, even though the status is kept.
                Ok(raw)
                    if !raw.is_empty()
                        && statuses.contains(&raw.status())
                        && !correlation.user_retried() =>
                {
                    correlation.mark_user_retried();

                    Transformed::Retry
                }
                other => Transformed::Forward(other),
            },
        }
    }
}

/// Convert a list of numeric statuses, silently skipping invalid codes.
fn status_codes(statuses: &[u16]) -> Vec<StatusCode> {
    statuses
        .iter()
        .copied()
        .filter_map(|status| StatusCode::from_u16(status).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{ResponseTransformer, Transformed};
    use crate::{
        request::{Correlation, Request},
        response::RawResponse,
        route::{Method, Route, RouteMatcher},
    };
    use http::{header::HeaderMap, StatusCode};
    use static_assertions::assert_impl_all;
    use std::fmt::Debug;
    use tokio::sync::oneshot;

    assert_impl_all!(ResponseTransformer: Debug, Send, Sync);
    assert_impl_all!(Transformed: Send, Sync);

    const ROUTE: Route = Route::new(Method::Get, "/gateway", None);

    fn correlation() -> Correlation {
        let (tx, _rx) = oneshot::channel();

        Correlation::new(Request::new(ROUTE, "/gateway"), tx)
    }

    fn raw(status: StatusCode) -> RawResponse {
        RawResponse::new(status, HeaderMap::new(), b"{}".to_vec())
    }

    #[test]
    fn empty_if_not_found() {
        let transformer = ResponseTransformer::empty_if_not_found(RouteMatcher::Any);
        let mut correlation = correlation();

        match transformer.apply(&mut correlation, Ok(raw(StatusCode::NOT_FOUND))) {
            Transformed::Forward(Ok(response)) => assert!(response.is_empty()),
            _ => panic!("404 wasn't emptied"),
        }

        match transformer.apply(&mut correlation, Ok(raw(StatusCode::OK))) {
            Transformed::Forward(Ok(response)) => assert!(!response.is_empty()),
            _ => panic!("200 was transformed"),
        }
    }

    #[test]
    fn retry_once_budget() {
        let transformer =
            ResponseTransformer::retry_once_on_error_status(RouteMatcher::Any, &[500]);
        let mut correlation = correlation();

        assert!(matches!(
            transformer.apply(&mut correlation, Ok(raw(StatusCode::INTERNAL_SERVER_ERROR))),
            Transformed::Retry,
        ));

        // The second failure surfaces.
        assert!(matches!(
            transformer.apply(&mut correlation, Ok(raw(StatusCode::INTERNAL_SERVER_ERROR))),
            Transformed::Forward(Ok(response)) if response.status() == StatusCode::INTERNAL_SERVER_ERROR,
        ));
    }

    #[test]
    fn unmatched_status_passes_through() {
        let transformer = ResponseTransformer::empty_on_error_status(RouteMatcher::Any, &[403]);
        let mut correlation = correlation();

        assert!(matches!(
            transformer.apply(&mut correlation, Ok(raw(StatusCode::NOT_FOUND))),
            Transformed::Forward(Ok(response)) if !response.is_empty(),
        ));
    }
}
