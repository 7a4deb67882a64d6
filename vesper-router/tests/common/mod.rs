//! Scripted transport shared by the integration tests.
#![allow(dead_code)]

use http::{
    header::{HeaderMap, HeaderName, HeaderValue},
    StatusCode,
};
use std::{
    collections::{HashMap, VecDeque},
    io::{Error as IoError, ErrorKind},
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::time::{sleep, Instant};
use vesper_router::{
    transport::{GenericError, SendFuture},
    RawResponse, Request, Transport,
};

/// Server clock anchor used by every scripted response.
pub const DATE: &str = "Thu, 01 Jan 2015 00:00:00 GMT";

/// Unix seconds of [`DATE`].
pub const DATE_UNIX: u64 = 1_420_070_400;

/// One recorded dispatch.
#[derive(Clone, Debug)]
pub struct Dispatch {
    /// When the transport was invoked.
    pub at: Instant,
    /// Path that was requested.
    pub path: String,
}

/// Transport answering from per-path scripts and recording every dispatch.
#[derive(Debug, Default)]
pub struct MockTransport {
    in_flight: Arc<AtomicU32>,
    latency: Duration,
    log: Mutex<Vec<Dispatch>>,
    max_in_flight: Arc<AtomicU32>,
    scripts: Mutex<HashMap<String, VecDeque<RawResponse>>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a transport whose responses take `latency` to arrive.
    pub fn with_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            ..Self::default()
        })
    }

    /// Script the next response for a path.
    pub fn script(&self, path: &str, response: RawResponse) {
        self.scripts
            .lock()
            .unwrap()
            .entry(path.to_owned())
            .or_default()
            .push_back(response);
    }

    /// Every dispatch the transport has seen, in invocation order.
    pub fn dispatches(&self) -> Vec<Dispatch> {
        self.log.lock().unwrap().clone()
    }

    /// Most requests ever in flight at once.
    pub fn max_in_flight(&self) -> u32 {
        self.max_in_flight.load(Ordering::Relaxed)
    }
}

impl Transport for MockTransport {
    fn send(&self, request: &Request) -> SendFuture {
        let path = request.path().to_owned();
        let response = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&path)
            .and_then(VecDeque::pop_front);

        self.log.lock().unwrap().push(Dispatch {
            at: Instant::now(),
            path,
        });

        let concurrent = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.max_in_flight.fetch_max(concurrent, Ordering::Relaxed);

        let in_flight = Arc::clone(&self.in_flight);
        let latency = self.latency;

        Box::pin(async move {
            if !latency.is_zero() {
                sleep(latency).await;
            }

            in_flight.fetch_sub(1, Ordering::Relaxed);

            response.map_or_else(
                || {
                    Err(Box::new(IoError::new(ErrorKind::Other, "no scripted response"))
                        as GenericError)
                },
                Ok,
            )
        })
    }
}

/// Build a 200 response with bucket headers.
pub fn limited_ok(remaining: u64, reset_unix: u64) -> RawResponse {
    RawResponse::new(StatusCode::OK, bucket_headers(remaining, reset_unix, DATE), b"{}".to_vec())
}

/// Build a 200 response with bucket headers anchored at a shifted date.
pub fn limited_ok_at(remaining: u64, reset_unix: u64, date: &str) -> RawResponse {
    RawResponse::new(
        StatusCode::OK,
        bucket_headers(remaining, reset_unix, date),
        b"{}".to_vec(),
    )
}

/// Build a plain response without rate-limit headers.
pub fn plain(status: StatusCode) -> RawResponse {
    RawResponse::new(status, date_headers(DATE), b"{}".to_vec())
}

/// Build a global 429 with a retry-after window in seconds.
pub fn global_429(retry_after_secs: u64) -> RawResponse {
    let mut headers = date_headers(DATE);
    headers.insert(
        HeaderName::from_static("x-ratelimit-global"),
        HeaderValue::from_static("true"),
    );
    headers.insert(
        HeaderName::from_static("retry-after"),
        HeaderValue::from_str(&retry_after_secs.to_string()).unwrap(),
    );

    RawResponse::new(
        StatusCode::TOO_MANY_REQUESTS,
        headers,
        br#"{"global": true}"#.to_vec(),
    )
}

/// Build a 429 whose rate-limit information lives only in the body.
pub fn body_429(body: &[u8]) -> RawResponse {
    RawResponse::new(StatusCode::TOO_MANY_REQUESTS, date_headers(DATE), body.to_vec())
}

/// Bucket headers with the given remaining count and reset time.
pub fn bucket_headers(remaining: u64, reset_unix: u64, date: &str) -> HeaderMap<HeaderValue> {
    let mut headers = date_headers(date);
    headers.insert(
        HeaderName::from_static("x-ratelimit-remaining"),
        HeaderValue::from_str(&remaining.to_string()).unwrap(),
    );
    headers.insert(
        HeaderName::from_static("x-ratelimit-reset"),
        HeaderValue::from_str(&reset_unix.to_string()).unwrap(),
    );

    headers
}

/// Headers carrying only the server date.
pub fn date_headers(date: &str) -> HeaderMap<HeaderValue> {
    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static("date"),
        HeaderValue::from_str(date).unwrap(),
    );

    headers
}
