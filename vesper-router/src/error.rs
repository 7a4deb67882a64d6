use http::StatusCode;
use std::{
    error::Error as StdError,
    fmt::{Display, Formatter, Result as FmtResult},
};

/// Failure when routing a request or interpreting its response.
#[derive(Debug)]
pub struct Error {
    /// Type of error that occurred.
    pub(crate) kind: ErrorType,
    /// Original error leading up to this one.
    pub(crate) source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    /// Immutable reference to the type of error that occurred.
    #[must_use = "retrieving the type has no effect if left unused"]
    pub const fn kind(&self) -> &ErrorType {
        &self.kind
    }

    /// Consume the error, returning the source error if there is any.
    #[must_use = "consuming the error and retrieving the source has no effect if left unused"]
    pub fn into_source(self) -> Option<Box<dyn StdError + Send + Sync>> {
        self.source
    }

    /// Consume the error, returning the owned error type and the source
    /// error.
    #[must_use = "consuming the error into its parts has no effect if left unused"]
    pub fn into_parts(self) -> (ErrorType, Option<Box<dyn StdError + Send + Sync>>) {
        (self.kind, self.source)
    }

    /// Create a new error for a canceled correlation.
    pub(crate) const fn canceled() -> Self {
        Self {
            kind: ErrorType::RequestCanceled,
            source: None,
        }
    }

    /// Create a new error for a failed body deserialization.
    pub(crate) fn parsing(body: Vec<u8>, source: serde_json::Error) -> Self {
        Self {
            kind: ErrorType::Parsing { body },
            source: Some(Box::new(source)),
        }
    }

    /// Create a new error for a correlation whose stream went away.
    pub(crate) const fn ratelimiter_dropped() -> Self {
        Self {
            kind: ErrorType::RatelimiterDropped,
            source: None,
        }
    }

    /// Create a new error for a response with an unsuccessful status.
    pub(crate) fn response(status: StatusCode, body: Vec<u8>) -> Self {
        Self {
            kind: ErrorType::Response { body, status },
            source: None,
        }
    }

    /// Create a new error for a failed transport exchange.
    pub(crate) fn transport(source: Box<dyn StdError + Send + Sync>) -> Self {
        Self {
            kind: ErrorType::RequestError,
            source: Some(source),
        }
    }

    /// Create a new error for a status lookup on a bucket without a stream.
    pub(crate) const fn unknown_bucket() -> Self {
        Self {
            kind: ErrorType::UnknownBucket,
            source: None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            ErrorType::Parsing { body } => {
                f.write_str("response body couldn't be deserialized: ")?;

                Display::fmt(&String::from_utf8_lossy(body), f)
            }
            ErrorType::RatelimiterDropped => {
                f.write_str("request stream was dropped before a response arrived")
            }
            ErrorType::RequestCanceled => {
                f.write_str("request was canceled either before or while being sent")
            }
            ErrorType::RequestError => f.write_str("sending the request failed"),
            ErrorType::Response { status, .. } => {
                f.write_str("response error: status code ")?;

                Display::fmt(status, f)
            }
            ErrorType::UnknownBucket => {
                f.write_str("no request has been routed through the bucket yet")
            }
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| &**source as &(dyn StdError + 'static))
    }
}

/// Type of [`Error`] that occurred.
#[derive(Debug)]
#[non_exhaustive]
pub enum ErrorType {
    /// Deserializing the response body failed.
    Parsing {
        /// Body of the response.
        body: Vec<u8>,
    },
    /// The correlation's stream went away — the router was dropped with the
    /// request still queued, or its worker task died — so no response will
    /// ever arrive.
    RatelimiterDropped,
    /// The caller dropped its future before or while the request was sent.
    RequestCanceled,
    /// The transport failed before a response arrived.
    RequestError,
    /// A response arrived with an unsuccessful status and no transformer
    /// converted it.
    Response {
        /// Body of the response.
        body: Vec<u8>,
        /// Status code of the response.
        status: StatusCode,
    },
    /// The bucket has no request stream yet, so no status is known.
    UnknownBucket,
}
