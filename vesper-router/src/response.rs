//! Typed response wrapper and the future resolving to it.

use crate::error::Error;
use http::{header::HeaderMap, HeaderValue, StatusCode};
use serde::de::DeserializeOwned;
use std::{
    future::Future,
    marker::PhantomData,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::sync::oneshot::Receiver;

/// Raw response produced by a transport: status, headers, and the collected
/// body.
#[derive(Clone, Debug)]
pub struct RawResponse {
    /// Collected body of the response.
    body: Vec<u8>,
    /// Whether a transformer replaced the response with an empty success.
    empty: bool,
    /// Headers of the response.
    headers: HeaderMap<HeaderValue>,
    /// Status code of the response.
    status: StatusCode,
}

impl RawResponse {
    /// Create a new raw response.
    #[must_use]
    pub fn new(status: StatusCode, headers: HeaderMap<HeaderValue>, body: Vec<u8>) -> Self {
        Self {
            body,
            empty: false,
            headers,
            status,
        }
    }

    /// Collected body of the response.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Headers of the response.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap<HeaderValue> {
        &self.headers
    }

    /// Whether a transformer converted this response into an empty success.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.empty
    }

    /// Status code of the response.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Consume the response, returning its body.
    #[must_use]
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// Convert the response into an empty success, keeping its status and
    /// headers for inspection.
    pub(crate) fn into_empty(mut self) -> Self {
        self.body.clear();
        self.empty = true;

        self
    }
}

/// Response to an exchanged request, typed over the expected body model.
///
/// The type parameter only drives [`model`]; a response can always be
/// inspected structurally via [`status`], [`headers`], and [`bytes`].
///
/// [`bytes`]: Self::bytes
/// [`headers`]: Self::headers
/// [`model`]: Self::model
/// [`status`]: Self::status
#[derive(Debug)]
pub struct Response<T> {
    /// Raw response being wrapped.
    inner: RawResponse,
    /// Marker for the expected body model.
    phantom: PhantomData<fn() -> T>,
}

impl<T> Response<T> {
    /// Wrap a raw response.
    pub(crate) const fn new(inner: RawResponse) -> Self {
        Self {
            inner,
            phantom: PhantomData,
        }
    }

    /// Raw bytes of the response body.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        self.inner.body()
    }

    /// Headers of the response.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap<HeaderValue> {
        self.inner.headers()
    }

    /// Whether a transformer converted this response into an empty success,
    /// such as a 404 downgraded by
    /// [`ResponseTransformer::empty_if_not_found`].
    ///
    /// [`ResponseTransformer::empty_if_not_found`]: crate::transform::ResponseTransformer::empty_if_not_found
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Status code of the response.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.inner.status()
    }
}

impl<T: DeserializeOwned> Response<T> {
    /// Deserialize the response body into the expected model.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorType::Parsing`] error type if the body could not be
    /// deserialized, including when the response is an empty success; use
    /// [`maybe_model`] for routes that transformers may empty out.
    ///
    /// [`ErrorType::Parsing`]: crate::error::ErrorType::Parsing
    /// [`maybe_model`]: Self::maybe_model
    pub fn model(self) -> Result<T, Error> {
        let body = self.inner.into_body();

        serde_json::from_slice(&body).map_err(|source| Error::parsing(body, source))
    }

    /// Deserialize the response body, mapping an empty success to `None`.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorType::Parsing`] error type if a non-empty body could
    /// not be deserialized.
    ///
    /// [`ErrorType::Parsing`]: crate::error::ErrorType::Parsing
    pub fn maybe_model(self) -> Result<Option<T>, Error> {
        if self.is_empty() {
            return Ok(None);
        }

        self.model().map(Some)
    }
}

/// Future resolving to the [`Response`] of an exchanged request.
///
/// Dropping the future cancels the request: a still-queued correlation is
/// skipped by its stream, while an in-flight one runs to completion with its
/// result discarded. The reverse direction resolves to an
/// [`ErrorType::RatelimiterDropped`] error type: if the stream goes away
/// without settling the correlation, no response will ever arrive.
///
/// [`ErrorType::RatelimiterDropped`]: crate::error::ErrorType::RatelimiterDropped
#[derive(Debug)]
pub struct ResponseFuture<T> {
    /// Marker for the expected body model.
    phantom: PhantomData<fn() -> T>,
    /// Receiving half of the correlation's completion handle.
    rx: Receiver<Result<RawResponse, Error>>,
}

impl<T> ResponseFuture<T> {
    /// Create a new future over a correlation's completion handle.
    pub(crate) const fn new(rx: Receiver<Result<RawResponse, Error>>) -> Self {
        Self {
            phantom: PhantomData,
            rx,
        }
    }
}

impl<T> Future for ResponseFuture<T> {
    type Output = Result<Response<T>, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|result| match result {
            Ok(Ok(raw)) => Ok(Response::new(raw)),
            Ok(Err(source)) => Err(source),
            // The stream dropped the completion handle without settling it.
            Err(_) => Err(Error::ratelimiter_dropped()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{RawResponse, Response, ResponseFuture};
    use http::{header::HeaderMap, StatusCode};
    use serde::Deserialize;
    use static_assertions::assert_impl_all;
    use std::fmt::Debug;

    assert_impl_all!(RawResponse: Clone, Debug, Send, Sync);
    assert_impl_all!(Response<()>: Debug, Send, Sync);
    assert_impl_all!(ResponseFuture<()>: Debug, Send, Sync);

    #[derive(Debug, Deserialize, Eq, PartialEq)]
    struct Message {
        id: u64,
    }

    #[test]
    fn model_roundtrip() {
        let raw = RawResponse::new(
            StatusCode::OK,
            HeaderMap::new(),
            br#"{"id": 3}"#.to_vec(),
        );
        let response = Response::<Message>::new(raw);

        assert_eq!(Message { id: 3 }, response.model().unwrap());
    }

    #[test]
    fn empty_success() {
        let raw = RawResponse::new(StatusCode::NOT_FOUND, HeaderMap::new(), b"missing".to_vec())
            .into_empty();
        assert!(raw.is_empty());
        assert!(raw.body().is_empty());

        let response = Response::<Message>::new(raw);
        assert!(response.maybe_model().unwrap().is_none());
    }
}
