// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Incoming request abstraction.
//!
//! Adapters (the HTTP server, tests, embedders) build a [`PrerenderRequest`]
//! from whatever they received and hand it to the
//! [`Prerenderer`](crate::Prerenderer).

use std::collections::{BTreeMap, HashMap};

/// A platform-agnostic view of one incoming request.
///
/// # Example
///
/// ```rust
/// use prerender::PrerenderRequest;
///
/// let request = PrerenderRequest::new("/weather/Berlin?units=metric")
///     .with_header("Host", "example.com");
/// assert_eq!(request.path(), "/weather/Berlin");
/// assert_eq!(request.host(), "example.com");
/// ```
#[derive(Debug, Clone)]
pub struct PrerenderRequest {
    /// Path plus optional query string, as received (e.g. "/a/b?x=1").
    pub url: String,

    /// The HTTP method.
    pub method: String,

    /// Request headers, names lowercased.
    pub headers: HashMap<String, String>,
}

impl PrerenderRequest {
    /// Creates a GET request for `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            headers: HashMap::new(),
        }
    }

    /// Sets the method.
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Replaces all headers. Names are lowercased.
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        self
    }

    /// Adds one header.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Looks up a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|s| s.as_str())
    }

    /// The path component, without query string or fragment.
    pub fn path(&self) -> &str {
        let end = self.url.find(['?', '#']).unwrap_or(self.url.len());
        match &self.url[..end] {
            "" => "/",
            path => path,
        }
    }

    /// The raw query string, without the leading `?`.
    pub fn query_string(&self) -> &str {
        let Some(start) = self.url.find('?') else {
            return "";
        };
        let rest = &self.url[start + 1..];
        rest.split('#').next().unwrap_or("")
    }

    /// Decoded query parameters. Later duplicates win.
    pub fn query(&self) -> BTreeMap<String, String> {
        form_urlencoded::parse(self.query_string().as_bytes())
            .into_owned()
            .collect()
    }

    /// The `Host` header, or `localhost` when absent.
    pub fn host(&self) -> &str {
        self.header("host").unwrap_or("localhost")
    }

    /// The scheme the client used, honouring `X-Forwarded-Proto`.
    pub fn protocol(&self) -> &str {
        self.header("x-forwarded-proto")
            .and_then(|p| p.split(',').next())
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or("http")
    }

    /// The absolute URL the client asked for.
    pub fn absolute_url(&self) -> String {
        format!("{}://{}{}", self.protocol(), self.host(), self.url)
    }
}

impl Default for PrerenderRequest {
    fn default() -> Self {
        Self::new("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_and_query() {
        let req = PrerenderRequest::new("/search?q=rust&page=2#top");
        assert_eq!(req.path(), "/search");
        assert_eq!(req.query_string(), "q=rust&page=2");
        let query = req.query();
        assert_eq!(query.get("q"), Some(&"rust".to_string()));
        assert_eq!(query.get("page"), Some(&"2".to_string()));
    }

    #[test]
    fn test_empty_path_is_root() {
        let req = PrerenderRequest::new("?a=1");
        assert_eq!(req.path(), "/");
    }

    #[test]
    fn test_headers_are_case_insensitive() {
        let req = PrerenderRequest::new("/").with_header("X-Forwarded-Proto", "https");
        assert_eq!(req.header("x-forwarded-proto"), Some("https"));
        assert_eq!(req.protocol(), "https");
    }

    #[test]
    fn test_absolute_url_defaults() {
        let req = PrerenderRequest::new("/a/b?x=1");
        assert_eq!(req.absolute_url(), "http://localhost/a/b?x=1");

        let req = PrerenderRequest::new("/").with_header("Host", "foo.bar.com:8080");
        assert_eq!(req.absolute_url(), "http://foo.bar.com:8080/");
    }
}
