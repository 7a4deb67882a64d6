//! TLS backend selection for the bundled transport.
//!
//! Exactly one backend is compiled in, chosen by cargo feature. Without any
//! TLS feature the transport speaks plain HTTP, which is only useful against
//! a local proxy.

/// Plain TCP connector for a TLS backend to wrap.
#[cfg(any(
    feature = "native",
    feature = "rustls-native-roots",
    feature = "rustls-webpki-roots"
))]
fn tcp() -> hyper::client::HttpConnector {
    let mut connector = hyper::client::HttpConnector::new();

    // The TLS layer owns the scheme check, not the inner connector.
    connector.enforce_http(false);

    connector
}

/// Connector of the bundled transport.
#[cfg(feature = "rustls-native-roots")]
pub type Connector = hyper_rustls::HttpsConnector<hyper::client::HttpConnector>;

/// Create a connector trusting the system's native root certificates.
#[cfg(feature = "rustls-native-roots")]
pub fn connector() -> Connector {
    hyper_rustls::HttpsConnectorBuilder::new()
        .with_native_roots()
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .wrap_connector(tcp())
}

/// Connector of the bundled transport.
#[cfg(all(feature = "rustls-webpki-roots", not(feature = "rustls-native-roots")))]
pub type Connector = hyper_rustls::HttpsConnector<hyper::client::HttpConnector>;

/// Create a connector trusting the bundled `webpki` root certificates.
#[cfg(all(feature = "rustls-webpki-roots", not(feature = "rustls-native-roots")))]
pub fn connector() -> Connector {
    hyper_rustls::HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .wrap_connector(tcp())
}

/// Connector of the bundled transport.
#[cfg(all(
    feature = "native",
    not(any(feature = "rustls-native-roots", feature = "rustls-webpki-roots"))
))]
pub type Connector = hyper_tls::HttpsConnector<hyper::client::HttpConnector>;

/// Create a connector backed by the platform's native TLS library.
#[cfg(all(
    feature = "native",
    not(any(feature = "rustls-native-roots", feature = "rustls-webpki-roots"))
))]
pub fn connector() -> Connector {
    hyper_tls::HttpsConnector::new_with_connector(tcp())
}

/// Connector of the bundled transport.
#[cfg(not(any(
    feature = "native",
    feature = "rustls-native-roots",
    feature = "rustls-webpki-roots"
)))]
pub type Connector = hyper::client::HttpConnector;

/// Create a plain HTTP connector.
#[cfg(not(any(
    feature = "native",
    feature = "rustls-native-roots",
    feature = "rustls-webpki-roots"
)))]
pub fn connector() -> Connector {
    hyper::client::HttpConnector::new()
}
