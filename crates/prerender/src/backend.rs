// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Network backend abstraction.
//!
//! The library never opens sockets itself. Every outbound call made by an
//! application script goes through an [`HttpBackend`], which lets the server
//! plug in a real client and lets tests use [`MemoryBackend`].

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by a network backend.
#[derive(Debug, Clone, Error)]
pub enum HttpError {
    /// The URL could not be parsed or resolved.
    #[error("Invalid URL {url}: {message}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// Parser message.
        message: String,
    },
    /// The method is not one the backend knows.
    #[error("Unsupported HTTP method: {0}")]
    UnsupportedMethod(String),
    /// Connection, timeout or decoding failure.
    #[error("HTTP request failed: {0}")]
    Transport(String),
    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status {
        /// Response status code.
        status: u16,
        /// Requested URL.
        url: String,
    },
}

/// An outbound request, already resolved to an absolute URL.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// Uppercase method name.
    pub method: String,
    /// Absolute URL.
    pub url: String,
    /// Request headers.
    pub headers: BTreeMap<String, String>,
    /// Optional request body.
    pub body: Option<String>,
}

impl HttpRequest {
    /// A GET request without headers.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }
}

/// A response with its body already decoded to text.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response headers, names lowercased.
    pub headers: BTreeMap<String, String>,
    /// Decoded body.
    pub body: String,
}

impl HttpResponse {
    /// A response with the given status and body.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    /// A 200 JSON response.
    pub fn json(value: &serde_json::Value) -> Self {
        Self::new(200, value.to_string()).with_header("content-type", "application/json")
    }

    /// Adds a header (name is lowercased).
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// True for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// True when the content type names JSON.
    pub fn is_json(&self) -> bool {
        self.headers
            .get("content-type")
            .map(|ct| ct.to_ascii_lowercase().contains("json"))
            .unwrap_or(false)
    }
}

/// Performs outbound HTTP on behalf of the sandbox.
#[async_trait]
pub trait HttpBackend: Send + Sync {
    /// Sends one request and returns the decoded response.
    ///
    /// Non-success statuses are returned as responses, not errors.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;
}

/// In-memory backend with canned responses, used by tests and embedders.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    responses: Mutex<HashMap<String, HttpResponse>>,
    latency: Option<Duration>,
    log: Mutex<Vec<HttpRequest>>,
    started: AtomicUsize,
    in_flight: Arc<AtomicUsize>,
}

struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryBackend {
    /// An empty backend; every URL answers 404.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every response by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Registers a canned response for `url`, any method.
    pub fn with_response(self, url: impl Into<String>, response: HttpResponse) -> Self {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.into(), response);
        self
    }

    /// Registers a 200 JSON response for `url`.
    pub fn with_json(self, url: impl Into<String>, value: serde_json::Value) -> Self {
        self.with_response(url, HttpResponse::json(&value))
    }

    /// Registers a 200 text response for `url`.
    pub fn with_text(self, url: impl Into<String>, body: impl Into<String>) -> Self {
        self.with_response(url, HttpResponse::new(200, body))
    }

    /// Number of requests received so far.
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Requests currently waiting on their response.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Every request received, in arrival order.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl HttpBackend for MemoryBackend {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlight(self.in_flight.clone());

        let canned = self
            .responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&request.url)
            .cloned();
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        Ok(canned.unwrap_or_else(|| HttpResponse::new(404, "Not found")))
    }
}
