// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! HTTP client module for Lua.
//!
//! Provides `http.get`, `http.post`, `http.put`, `http.delete`, `http.patch`,
//! `http.head` and `http.request`. Every call returns a promise and counts as
//! outstanding work until it settles.
//!
//! # Example
//!
//! ```lua
//! local res = await(http.get("/api/users", { params = { page = 2 } }))
//! print(res.status, res.data[1].name)
//!
//! http.post("/api/users", { body = { name = "John" } })
//!     :next(function(res) return res.data.id end)
//! ```
//!
//! Relative URLs resolve against the request being rendered. Responses with
//! a non-2xx status reject.

use std::collections::BTreeMap;
use std::sync::Arc;

use mlua::{Lua, LuaSerdeExt, Result as LuaResult, Table, Value};
use url::Url;

use crate::backend::{HttpBackend, HttpError, HttpRequest, HttpResponse};
use crate::error::{PrerenderError, Result};
use crate::location::RequestContext;
use crate::pending::PendingRequests;
use crate::promise::{Promise, Rejection};

const METHODS: [&str; 6] = ["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD"];

/// Tracked access to the network backend for one context.
#[derive(Clone)]
pub struct HttpClient {
    backend: Arc<dyn HttpBackend>,
    pending: PendingRequests,
    request: RequestContext,
}

impl HttpClient {
    /// Creates a client bound to one context's tracker and request.
    pub fn new(backend: Arc<dyn HttpBackend>, pending: PendingRequests, request: RequestContext) -> Self {
        Self {
            backend,
            pending,
            request,
        }
    }

    /// Resolves `url` against the current location.
    pub fn resolve_url(&self, url: &str) -> std::result::Result<String, HttpError> {
        let invalid = |e: url::ParseError| HttpError::InvalidUrl {
            url: url.to_string(),
            message: e.to_string(),
        };
        let base = match self.request.location() {
            Some(location) => location.abs_url(),
            None => "http://localhost/".to_string(),
        };
        let base = Url::parse(&base).map_err(invalid)?;
        Ok(base.join(url).map_err(invalid)?.to_string())
    }

    /// Fetches `url` as text, for template loading.
    pub async fn fetch_text(&self, url: &str) -> Result<String> {
        let url = self.resolve_url(url)?;
        let backend = self.backend.clone();
        let request = HttpRequest::get(url.clone());
        let outcome = self
            .pending
            .track(async move { backend.send(request).await })
            .await;
        match outcome {
            None => Err(PrerenderError::Resolution(format!("Request for {url} was aborted"))),
            Some(Err(err)) => Err(err.into()),
            Some(Ok(response)) if !response.is_success() => Err(HttpError::Status {
                status: response.status,
                url,
            }
            .into()),
            Some(Ok(response)) => Ok(response.body),
        }
    }

    /// Starts `request` and returns a promise for the response table.
    pub fn send(&self, lua: &Lua, request: HttpRequest) -> Promise {
        let backend = self.backend.clone();
        let lua = lua.clone();
        tracing::debug!(method = %request.method, url = %request.url, "Outbound request");
        Promise::spawn(&self.pending, async move {
            let url = request.url.clone();
            let response = backend
                .send(request)
                .await
                .map_err(|e| Rejection::Failed(e.to_string()))?;
            if !response.is_success() {
                return Err(Rejection::Failed(
                    HttpError::Status {
                        status: response.status,
                        url,
                    }
                    .to_string(),
                ));
            }
            Ok(Value::Table(response_table(&lua, &response)?))
        })
    }
}

fn client(lua: &Lua) -> LuaResult<HttpClient> {
    lua.app_data_ref::<HttpClient>()
        .map(|client| client.clone())
        .ok_or_else(|| mlua::Error::RuntimeError("http is not available in this context".into()))
}

/// Register the http module on the given Lua instance.
///
/// An [`HttpClient`] must be stored as app data before scripts call it.
pub fn register_http_module(lua: &Lua) -> LuaResult<Table> {
    let http_module = lua.create_table()?;

    for method in METHODS {
        let call = lua.create_function(move |lua, (url, options): (String, Option<Table>)| {
            make_request(lua, method, &url, options)
        })?;
        http_module.set(method.to_ascii_lowercase(), call)?;
    }

    let request_fn = lua.create_function(|lua, options: Table| {
        let method: String = options
            .get::<Option<String>>("method")?
            .unwrap_or_else(|| "GET".to_string());
        let url: String = options
            .get::<Option<String>>("url")?
            .ok_or_else(|| mlua::Error::external("http.request requires 'url' field"))?;
        make_request(lua, &method, &url, Some(options))
    })?;
    http_module.set("request", request_fn)?;

    let globals = lua.globals();
    globals.set("http", http_module.clone())?;

    // Also register in package.preload for require("http")
    let package: Table = globals.get("package")?;
    let preload: Table = package.get("preload")?;
    let module = http_module.clone();
    preload.set("http", lua.create_function(move |_, ()| Ok(module.clone()))?)?;

    Ok(http_module)
}

fn make_request(lua: &Lua, method: &str, url: &str, options: Option<Table>) -> LuaResult<Promise> {
    let method = method.to_ascii_uppercase();
    if !METHODS.contains(&method.as_str()) {
        return Err(mlua::Error::external(HttpError::UnsupportedMethod(method)));
    }

    let mut headers = BTreeMap::new();
    let mut body = None;
    let mut target = url.to_string();

    if let Some(opts) = options {
        if let Some(table) = opts.get::<Option<Table>>("headers")? {
            for pair in table.pairs::<String, String>() {
                let (name, value) = pair?;
                headers.insert(name.to_ascii_lowercase(), value);
            }
        }
        match opts.get::<Value>("body")? {
            Value::Nil => {}
            Value::String(text) => body = Some(text.to_str()?.to_string()),
            other => {
                let json: serde_json::Value = lua.from_value(other)?;
                headers
                    .entry("content-type".to_string())
                    .or_insert_with(|| "application/json".to_string());
                body = Some(json.to_string());
            }
        }
        if let Some(params) = opts.get::<Option<Table>>("params")? {
            let mut query = form_urlencoded::Serializer::new(String::new());
            for pair in params.pairs::<String, String>() {
                let (key, value) = pair?;
                query.append_pair(&key, &value);
            }
            let query = query.finish();
            if !query.is_empty() {
                let separator = if target.contains('?') { '&' } else { '?' };
                target = format!("{target}{separator}{query}");
            }
        }
    }

    let client = client(lua)?;
    let request = HttpRequest {
        method,
        url: client.resolve_url(&target).map_err(mlua::Error::external)?,
        headers,
        body,
    };
    Ok(client.send(lua, request))
}

/// Builds the Lua table handed to scripts for a response.
///
/// `data` holds the decoded body when the content type names JSON, the
/// text otherwise.
pub fn response_table(lua: &Lua, response: &HttpResponse) -> LuaResult<Table> {
    let result = lua.create_table()?;
    result.set("status", response.status)?;
    result.set("ok", response.is_success())?;

    let headers = lua.create_table()?;
    for (name, value) in &response.headers {
        headers.set(name.as_str(), value.as_str())?;
    }
    result.set("headers", headers)?;
    result.set("body", response.body.as_str())?;

    if response.is_json() && !response.body.trim().is_empty() {
        let decoded: serde_json::Value = serde_json::from_str(&response.body)
            .map_err(|e| mlua::Error::external(format!("JSON decode error: {e}")))?;
        result.set("data", lua.to_value(&decoded)?)?;
    } else {
        result.set("data", response.body.as_str())?;
    }
    Ok(result)
}
