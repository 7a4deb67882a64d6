//! Issuing a routed request over the wire.
//!
//! The router core never talks HTTP itself; it hands each dequeued request
//! to a [`Transport`]. The crate ships [`HyperTransport`] as the production
//! implementation, while tests substitute scripted mocks.

mod tls;

use crate::{request::Request, response::RawResponse};
use http::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use hyper::{client::Client, Body};
use std::{error::Error as StdError, fmt::Debug, future::Future, pin::Pin};

/// A generic error type a transport may fail with.
pub type GenericError = Box<dyn StdError + Send + Sync>;

/// Future returned by [`Transport::send`].
pub type SendFuture =
    Pin<Box<dyn Future<Output = Result<RawResponse, GenericError>> + Send + 'static>>;

/// Capability to exchange one request for one raw response.
///
/// Implementations must be cheap to call concurrently; the router issues at
/// most one call per bucket at a time but many buckets at once. A
/// per-request timeout, if desired, belongs to the implementation.
pub trait Transport: Debug + Send + Sync {
    /// Issue the request, resolving to the raw response or a transport
    /// failure.
    ///
    /// The returned future owns everything it needs; the request reference
    /// is released before the future is first polled.
    fn send(&self, request: &Request) -> SendFuture;
}

/// [`Transport`] backed by a shared `hyper` client.
#[derive(Clone, Debug)]
pub struct HyperTransport {
    /// Base URL requests are issued against, without a trailing slash.
    base: String,
    /// Underlying HTTP client.
    http: Client<tls::Connector, Body>,
    /// Authorization header value sent with every request, if any.
    token: Option<HeaderValue>,
}

impl HyperTransport {
    /// Create a new transport issuing requests against a base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base = base_url.into();

        while base.ends_with('/') {
            base.pop();
        }

        Self {
            base,
            http: Client::builder().build(tls::connector()),
            token: None,
        }
    }

    /// Send an `Authorization` header with every request.
    ///
    /// A value that is not a valid header value is discarded with a log.
    #[must_use]
    pub fn token(mut self, token: &str) -> Self {
        match HeaderValue::from_str(token) {
            Ok(value) => {
                self.token.replace(value);
            }
            Err(_source) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("authorization token is not a valid header value: {_source}");
            }
        }

        self
    }
}

impl Transport for HyperTransport {
    fn send(&self, request: &Request) -> SendFuture {
        let path = request.path();
        let uri = if path.starts_with('/') {
            format!("{}{path}", self.base)
        } else {
            format!("{}/{path}", self.base)
        };

        let mut builder = hyper::Request::builder()
            .method(request.route().method().into_http())
            .uri(uri);

        if let Some(headers) = builder.headers_mut() {
            if let Some(additional) = request.headers_ref() {
                for (name, value) in additional {
                    headers.insert(name, value.clone());
                }
            }

            if let Some(token) = &self.token {
                headers.insert(AUTHORIZATION, token.clone());
            }

            if request.body_ref().is_some() {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            }
        }

        let body = request.body_ref().map_or_else(Vec::new, <[u8]>::to_vec);
        let built = builder.body(Body::from(body));
        let client = self.http.clone();

        Box::pin(async move {
            let outgoing = built?;
            let response = client.request(outgoing).await?;

            let (parts, body) = response.into_parts();
            let bytes = hyper::body::to_bytes(body).await?;

            Ok(RawResponse::new(parts.status, parts.headers, bytes.to_vec()))
        })
    }
}
