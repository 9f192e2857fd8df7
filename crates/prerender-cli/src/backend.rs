// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Production network backend built on `reqwest`.
//!
//! Response bodies are decoded with `Response::text`, which honours the
//! charset named in the `Content-Type` header and falls back to UTF-8.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use prerender::{HttpBackend, HttpError, HttpRequest, HttpResponse};

/// Sends application requests over the network.
#[derive(Debug, Clone)]
pub struct ReqwestBackend {
    client: reqwest::Client,
}

impl ReqwestBackend {
    /// Creates a backend whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpBackend for ReqwestBackend {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let method = reqwest::Method::from_bytes(request.method.to_uppercase().as_bytes())
            .map_err(|_| HttpError::UnsupportedMethod(request.method.clone()))?;
        let url = reqwest::Url::parse(&request.url).map_err(|e| HttpError::InvalidUrl {
            url: request.url.clone(),
            message: e.to_string(),
        })?;

        let mut builder = self.client.request(method, url);
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| HttpError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let mut headers = BTreeMap::new();
        for (key, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(key.as_str().to_ascii_lowercase(), v.to_string());
            }
        }
        let body = response
            .text()
            .await
            .map_err(|e| HttpError::Transport(e.to_string()))?;

        tracing::trace!(status, url = %request.url, "Backend response");
        Ok(HttpResponse { status, headers, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unsupported_method() {
        let backend = ReqwestBackend::new(Duration::from_secs(1)).unwrap();
        let mut request = HttpRequest::get("http://127.0.0.1:9/");
        request.method = "NOT A METHOD".to_string();
        let err = backend.send(request).await.unwrap_err();
        assert!(matches!(err, HttpError::UnsupportedMethod(_)));
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let backend = ReqwestBackend::new(Duration::from_secs(1)).unwrap();
        let err = backend.send(HttpRequest::get("not a url")).await.unwrap_err();
        assert!(matches!(err, HttpError::InvalidUrl { .. }));
    }
}
