// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Response abstraction returned by the render lifecycle.
//!
//! Adapters convert a [`PrerenderResponse`] into their platform's response
//! type; the library never writes to a socket.

use std::collections::HashMap;

use serde_json::Value as JsonValue;

/// What the lifecycle produced for one request.
///
/// # Example
///
/// ```rust
/// use prerender::PrerenderResponse;
///
/// let page = PrerenderResponse::html(200, "<h1>Hello</h1>");
/// let data = PrerenderResponse::json(200, serde_json::json!({}));
/// let moved = PrerenderResponse::redirect("http://example.com/elsewhere");
/// assert!(moved.is_redirect());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum PrerenderResponse {
    /// Prerendered page.
    Html {
        /// HTTP status code
        status: u16,
        /// HTTP headers
        headers: HashMap<String, String>,
        /// HTML body
        body: String,
    },

    /// Route data.
    Json {
        /// HTTP status code
        status: u16,
        /// JSON body
        body: JsonValue,
    },

    /// Redirect requested by the application or the route table.
    Redirect {
        /// HTTP status code
        status: u16,
        /// Absolute target URL
        location: String,
    },

    /// Plain-text response for fixed errors and diagnostics.
    Text {
        /// HTTP status code
        status: u16,
        /// Body text
        body: String,
    },
}

impl PrerenderResponse {
    /// Creates an HTML response.
    pub fn html(status: u16, body: impl Into<String>) -> Self {
        Self::Html {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    /// Creates a JSON response.
    pub fn json(status: u16, body: JsonValue) -> Self {
        Self::Json { status, body }
    }

    /// Creates a 302 redirect.
    pub fn redirect(location: impl Into<String>) -> Self {
        Self::Redirect {
            status: 302,
            location: location.into(),
        }
    }

    /// Creates a plain-text response.
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self::Text {
            status,
            body: body.into(),
        }
    }

    /// The fixed 404 response.
    pub fn not_found() -> Self {
        Self::text(404, "Not found")
    }

    /// A 500 response carrying `message`.
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::text(500, message)
    }

    /// Returns the status code.
    pub fn status(&self) -> u16 {
        match self {
            Self::Html { status, .. }
            | Self::Json { status, .. }
            | Self::Redirect { status, .. }
            | Self::Text { status, .. } => *status,
        }
    }

    /// Returns true for 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status())
    }

    /// Returns true for 4xx and 5xx.
    pub fn is_error(&self) -> bool {
        self.status() >= 400
    }

    /// Returns true for 3xx.
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status())
    }

    /// Content type the adapter should send.
    pub fn content_type(&self) -> Option<&'static str> {
        match self {
            Self::Html { .. } => Some("text/html; charset=utf-8"),
            Self::Json { .. } => Some("application/json"),
            Self::Text { .. } => Some("text/plain; charset=utf-8"),
            Self::Redirect { .. } => None,
        }
    }

    /// The body rendered as text (empty for redirects).
    pub fn body_text(&self) -> String {
        match self {
            Self::Html { body, .. } | Self::Text { body, .. } => body.clone(),
            Self::Json { body, .. } => body.to_string(),
            Self::Redirect { .. } => String::new(),
        }
    }

    /// Adds a header (HTML responses only).
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let Self::Html { headers, .. } = &mut self {
            headers.insert(key.into(), value.into());
        }
        self
    }
}
