//! Description of a single REST call.

use crate::{
    error::Error,
    response::RawResponse,
    route::Route,
};
use http::header::{HeaderMap, HeaderValue};
use tokio::sync::oneshot::Sender;

/// Immutable description of one REST call.
///
/// A request pairs a [`Route`] template with the resolved path the
/// placeholders were substituted into, plus an optional body and headers. It
/// is created by the caller and consumed once by [`Router::exchange`].
///
/// [`Router::exchange`]: crate::Router::exchange
#[derive(Debug)]
pub struct Request {
    /// Body of the request, if any.
    body: Option<Vec<u8>>,
    /// Additional headers to send, if any.
    headers: Option<HeaderMap<HeaderValue>>,
    /// Resolved path, with the route's placeholders substituted.
    path: String,
    /// Route template the request was built from.
    route: Route,
    /// Shard the request originated from, for log correlation only.
    shard: Option<u32>,
}

impl Request {
    /// Create a new request from a route and its resolved path.
    #[must_use]
    pub fn new(route: Route, path: impl Into<String>) -> Self {
        Self {
            body: None,
            headers: None,
            path: path.into(),
            route,
            shard: None,
        }
    }

    /// Attach a body to the request.
    #[must_use]
    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body.replace(body);

        self
    }

    /// Attach additional headers to the request.
    #[must_use]
    pub fn headers(mut self, headers: HeaderMap<HeaderValue>) -> Self {
        self.headers.replace(headers);

        self
    }

    /// Tag the request with the shard it originated from.
    ///
    /// The tag only shows up in logs; it has no routing effect.
    #[must_use]
    pub fn shard(mut self, shard: u32) -> Self {
        self.shard = Some(shard);

        self
    }

    /// Body of the request, if any.
    #[must_use]
    pub fn body_ref(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Additional headers of the request, if any.
    #[must_use]
    pub const fn headers_ref(&self) -> Option<&HeaderMap<HeaderValue>> {
        self.headers.as_ref()
    }

    /// Resolved path of the request.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Route template of the request.
    #[must_use]
    pub const fn route(&self) -> &Route {
        &self.route
    }

    /// Shard tag of the request, if any.
    #[must_use]
    pub const fn shard_ref(&self) -> Option<u32> {
        self.shard
    }
}

/// A queued request plus the single-fire handle completing its caller's
/// future.
///
/// Correlations are created by the router and live on exactly one stream's
/// queue until the stream completes them — with a value, an error, or by
/// observing that the caller went away.
#[derive(Debug)]
pub(crate) struct Correlation {
    /// Whether the automatic 429 re-enqueue has been spent.
    auto_retried: bool,
    /// Request being exchanged.
    request: Request,
    /// Completion handle for the caller's future.
    tx: Sender<Result<RawResponse, Error>>,
    /// Whether the transformer-level retry budget has been spent.
    user_retried: bool,
}

impl Correlation {
    /// Create a new correlation around a request.
    pub fn new(request: Request, tx: Sender<Result<RawResponse, Error>>) -> Self {
        Self {
            auto_retried: false,
            request,
            tx,
            user_retried: false,
        }
    }

    /// Whether the automatic 429 re-enqueue has been spent.
    pub const fn auto_retried(&self) -> bool {
        self.auto_retried
    }

    /// Spend the automatic 429 re-enqueue budget.
    pub fn mark_auto_retried(&mut self) {
        self.auto_retried = true;
    }

    /// Whether the transformer-level retry budget has been spent.
    pub const fn user_retried(&self) -> bool {
        self.user_retried
    }

    /// Spend the transformer-level retry budget.
    pub fn mark_user_retried(&mut self) {
        self.user_retried = true;
    }

    /// Whether the caller dropped its future.
    pub fn is_canceled(&self) -> bool {
        self.tx.is_closed()
    }

    /// Request being exchanged.
    pub const fn request(&self) -> &Request {
        &self.request
    }

    /// Complete the caller's future.
    ///
    /// The result is discarded if the caller canceled in the meantime.
    pub fn complete(self, result: Result<RawResponse, Error>) {
        let _ = self.tx.send(result);
    }
}
