// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! HTTP server for prerendered pages and route data.
//!
//! This is a thin adapter that converts HTTP requests to `PrerenderRequest`,
//! calls the renderer, and converts `PrerenderResponse` back to HTTP.
//!
//! With `stream_head` set, page bodies are streamed: the head goes out as
//! soon as the lifecycle hands it over and the rest follows when the page
//! settles.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Router,
};
use futures_util::{future, stream, StreamExt};
use prerender::{Endpoint, PrerenderRequest, PrerenderResponse, Prerenderer};
use tokio::sync::oneshot;
use tower_http::services::ServeDir;

use crate::config::Config;

/// Shared application state.
pub struct AppState {
    /// Renderer for the configured application.
    pub renderer: Prerenderer,
    /// Mount point of the data-only endpoint.
    pub api_prefix: String,
    /// Stream page heads before the page settles.
    pub stream_head: bool,
}

/// Builds the axum router: static files, the data endpoint and the page
/// endpoint for everything else.
pub fn build_router(config: &Config, root: &Path, renderer: Prerenderer) -> Router {
    let state = Arc::new(AppState {
        renderer,
        api_prefix: config.server.api_prefix.trim_end_matches('/').to_string(),
        stream_head: config.server.stream_head,
    });

    Router::new()
        .nest_service("/static", ServeDir::new(root.join(&config.server.static_dir)))
        .fallback(fallback_handler)
        .with_state(state)
}

/// Binds `addr` and serves `app` until the process stops.
pub async fn create_server(addr: &str, app: Router) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Dispatches to the data endpoint under the API prefix, the page endpoint
/// otherwise.
async fn fallback_handler(State(state): State<Arc<AppState>>, request: Request<Body>) -> Response {
    let (parts, _body) = request.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());

    let headers: HashMap<String, String> = parts
        .headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
        .collect();

    match strip_api_prefix(&state.api_prefix, &path_and_query) {
        Some(url) => {
            let request = to_prerender_request(url, parts.method.as_str(), headers);
            let response = state.renderer.render_data(&request).await;
            to_axum_response(response)
        }
        None => {
            let request = to_prerender_request(path_and_query, parts.method.as_str(), headers);
            if state.stream_head {
                return stream_page(state.clone(), request).await;
            }
            let response = state.renderer.render_page(&request).await;
            to_axum_response(response)
        }
    }
}

/// Renders a page on its own task, answering with a streamed body once the
/// head is ready, or with the finished response when no head was sent.
async fn stream_page(state: Arc<AppState>, request: PrerenderRequest) -> Response {
    let (sink, head) = oneshot::channel();
    let render = tokio::spawn(async move {
        state
            .renderer
            .lifecycle()
            .with_head_sink(sink)
            .run(&request, Endpoint::Page)
            .await
    });

    let Ok(head) = head.await else {
        return match render.await {
            Ok(response) => to_axum_response(response),
            Err(e) => {
                tracing::error!(error = %e, "Render task failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Render task failed").into_response()
            }
        };
    };

    let rest = async move {
        match render.await {
            Ok(PrerenderResponse::Html { body, .. }) => Ok(body),
            Ok(other) => {
                tracing::warn!(status = other.status(), "Page failed after its head was sent");
                Ok(other.body_text())
            }
            Err(e) => Err(std::io::Error::other(e)),
        }
    };
    let body = stream::once(future::ready(Ok::<_, std::io::Error>(head))).chain(stream::once(rest));

    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/html; charset=utf-8")
        .body(Body::from_stream(body))
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to build response");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to build response").into_response()
        })
}

/// The application URL behind the API prefix, if `url` is a data request.
fn strip_api_prefix(prefix: &str, url: &str) -> Option<String> {
    if prefix.is_empty() {
        return None;
    }
    let rest = url.strip_prefix(prefix)?;
    match rest.chars().next() {
        None => Some("/".to_string()),
        Some('/') => Some(rest.to_string()),
        Some('?') => Some(format!("/{rest}")),
        Some(_) => None,
    }
}

fn to_prerender_request(url: String, method: &str, headers: HashMap<String, String>) -> PrerenderRequest {
    PrerenderRequest::new(url)
        .with_method(method)
        .with_headers(headers)
}

/// Converts a `PrerenderResponse` to an axum `Response`.
pub fn to_axum_response(response: PrerenderResponse) -> Response {
    let content_type = response.content_type();
    let built = match response {
        PrerenderResponse::Html { status, headers, body } => {
            let mut builder = Response::builder().status(status_code(status, StatusCode::OK));
            for (key, value) in headers {
                builder = builder.header(key, value);
            }
            if let Some(ct) = content_type {
                builder = builder.header("content-type", ct);
            }
            builder.body(Body::from(body))
        }
        PrerenderResponse::Json { status, body } => Response::builder()
            .status(status_code(status, StatusCode::OK))
            .header("content-type", content_type.unwrap_or("application/json"))
            .body(Body::from(body.to_string())),
        PrerenderResponse::Redirect { status, location } => Response::builder()
            .status(status_code(status, StatusCode::FOUND))
            .header("location", location)
            .body(Body::empty()),
        PrerenderResponse::Text { status, body } => Response::builder()
            .status(status_code(status, StatusCode::INTERNAL_SERVER_ERROR))
            .header("content-type", content_type.unwrap_or("text/plain; charset=utf-8"))
            .body(Body::from(body)),
    };

    built.unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to build response");
        (StatusCode::INTERNAL_SERVER_ERROR, "Failed to build response").into_response()
    })
}

fn status_code(status: u16, fallback: StatusCode) -> StatusCode {
    StatusCode::from_u16(status).unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_api_prefix() {
        assert_eq!(strip_api_prefix("/:", "/:/weather/Berlin").as_deref(), Some("/weather/Berlin"));
        assert_eq!(strip_api_prefix("/:", "/:").as_deref(), Some("/"));
        assert_eq!(strip_api_prefix("/:", "/:?x=1").as_deref(), Some("/?x=1"));
        assert_eq!(strip_api_prefix("/:", "/weather/Berlin"), None);
        assert_eq!(strip_api_prefix("/api", "/apiary"), None);
        assert_eq!(strip_api_prefix("", "/x"), None);
    }

    #[test]
    fn test_redirect_conversion() {
        let response = to_axum_response(PrerenderResponse::redirect("http://a.test/b"));
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()["location"], "http://a.test/b");
    }

    #[test]
    fn test_text_conversion() {
        let response = to_axum_response(PrerenderResponse::not_found());
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()["content-type"], "text/plain; charset=utf-8");
    }
}
