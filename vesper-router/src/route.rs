//! Route templates and rate-limit bucket identification.
//!
//! A [`Route`] is a static description of one REST endpoint: an HTTP verb and
//! a path pattern with named `{placeholder}` segments, one of which may be
//! the *major parameter* — the top-level resource whose identity partitions
//! the remote service's rate limits. A [`BucketKey`] is derived from a route
//! and its resolved path and is the unit the router queues on.

use std::fmt::{Display, Formatter, Result as FmtResult};

/// HTTP verb of a [`Route`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum Method {
    /// DELETE a resource.
    Delete,
    /// GET a resource.
    Get,
    /// PATCH a resource.
    Patch,
    /// POST a resource.
    Post,
    /// PUT a resource.
    Put,
}

impl Method {
    /// Name of the verb, uppercased.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Delete => "DELETE",
            Self::Get => "GET",
            Self::Patch => "PATCH",
            Self::Post => "POST",
            Self::Put => "PUT",
        }
    }

    /// Convert the verb into the `http` crate's equivalent.
    #[must_use]
    pub fn into_http(self) -> http::Method {
        match self {
            Self::Delete => http::Method::DELETE,
            Self::Get => http::Method::GET,
            Self::Patch => http::Method::PATCH,
            Self::Post => http::Method::POST,
            Self::Put => http::Method::PUT,
        }
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.name())
    }
}

/// Static route template.
///
/// Templates use `{name}` placeholders for path parameters, for example
/// `/channels/{channel.id}/messages/{message.id}`. The major parameter, if
/// any, names the placeholder that identifies the top-level resource.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Route {
    /// Verb of the route.
    method: Method,
    /// Path pattern with named placeholders.
    template: &'static str,
    /// Name of the placeholder holding the major parameter, if any.
    major: Option<&'static str>,
}

impl Route {
    /// Create a new route from a verb, a template, and the name of its major
    /// parameter placeholder.
    #[must_use]
    pub const fn new(
        method: Method,
        template: &'static str,
        major: Option<&'static str>,
    ) -> Self {
        Self {
            method,
            template,
            major,
        }
    }

    /// Verb of the route.
    #[must_use]
    pub const fn method(&self) -> Method {
        self.method
    }

    /// Path pattern of the route.
    #[must_use]
    pub const fn template(&self) -> &'static str {
        self.template
    }

    /// Name of the major parameter placeholder, if the route has one.
    #[must_use]
    pub const fn major(&self) -> Option<&'static str> {
        self.major
    }

    /// Whether the remote service assigns this route a bucket per HTTP verb.
    ///
    /// Message deletion shares its template with message retrieval and
    /// editing but lives in its own bucket, so the verb is part of its key.
    fn verb_qualified(&self) -> bool {
        self.method == Method::Delete && self.template.ends_with("/messages/{message.id}")
    }
}

/// Identity of a rate-limit bucket.
///
/// Equality and hashing are structural over the template, the extracted
/// major parameter, and — for verb-qualified routes — the verb.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct BucketKey {
    /// Verb, present only for verb-qualified routes.
    method: Option<Method>,
    /// Template the bucket is keyed on.
    template: &'static str,
    /// Resolved major parameter, or [`Self::NO_MAJOR`].
    major: Box<str>,
}

impl BucketKey {
    /// Sentinel for routes without a major parameter.
    const NO_MAJOR: &'static str = "-";

    /// Compute the bucket key for a route and its resolved path.
    ///
    /// The major parameter is extracted from the path by walking it against
    /// the template segment by segment; a trailing query string on the path
    /// is ignored.
    #[must_use]
    pub fn new(route: &Route, path: &str) -> Self {
        let major = route
            .major()
            .and_then(|name| extract_segment(route.template(), path, name))
            .unwrap_or(Self::NO_MAJOR);

        Self {
            method: route.verb_qualified().then(|| route.method()),
            template: route.template(),
            major: Box::from(major),
        }
    }

    /// Template the bucket is keyed on.
    #[must_use]
    pub const fn template(&self) -> &'static str {
        self.template
    }

    /// Resolved major parameter of the bucket.
    #[must_use]
    pub fn major(&self) -> &str {
        &self.major
    }
}

impl Display for BucketKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        if let Some(method) = self.method {
            f.write_str(method.name())?;
            f.write_str(" ")?;
        }

        f.write_str(self.template)?;
        f.write_str(":")?;

        f.write_str(&self.major)
    }
}

/// Extract the path segment matching a named template placeholder.
fn extract_segment<'a>(template: &str, path: &'a str, name: &str) -> Option<&'a str> {
    let path = path.split('?').next().unwrap_or(path);

    template
        .trim_start_matches('/')
        .split('/')
        .zip(path.trim_start_matches('/').split('/'))
        .find(|(pattern, _)| {
            pattern
                .strip_prefix('{')
                .and_then(|rest| rest.strip_suffix('}'))
                == Some(name)
        })
        .map(|(_, segment)| segment)
        .filter(|segment| !segment.is_empty())
}

/// Predicate over routes, consumed by response transformers and strategy
/// overrides.
#[derive(Clone, Debug)]
pub enum RouteMatcher {
    /// Matches every route.
    Any,
    /// Matches any route in the list.
    AnyOf(Vec<Route>),
    /// Matches exactly one route.
    Route(Route),
}

impl RouteMatcher {
    /// Whether the matcher covers the given route.
    #[must_use]
    pub fn matches(&self, route: &Route) -> bool {
        match self {
            Self::Any => true,
            Self::AnyOf(routes) => routes.contains(route),
            Self::Route(matched) => matched == route,
        }
    }
}
