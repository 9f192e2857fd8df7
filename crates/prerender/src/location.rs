// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Per-context request state and the server-side location service.
//!
//! [`RequestContext`] holds the request the context is rendering plus the
//! current location. Scripts reach it through the injectable `location`
//! service, whose setters mirror a browser location API:
//!
//! ```lua
//! location:path()                 -- "/weather/Berlin"
//! location:search("units", "si")  -- updates the query, no redirect
//! location:path("/elsewhere")     -- records a redirect to the new URL
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use mlua::{IntoLua, Lua, UserData, UserDataMethods, Value};

use crate::error::{PrerenderError, Result};
use crate::request::PrerenderRequest;

/// The current location of one context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    protocol: String,
    host: String,
    path: String,
    search: BTreeMap<String, String>,
}

impl Location {
    /// Builds the initial location from a request.
    pub fn from_request(request: &PrerenderRequest) -> Self {
        Self {
            protocol: request.protocol().to_string(),
            host: request.host().to_string(),
            path: request.path().to_string(),
            search: request.query(),
        }
    }

    /// Scheme, e.g. `http`.
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Host name without port.
    pub fn host(&self) -> &str {
        match self.host.rsplit_once(':') {
            Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
            _ => &self.host,
        }
    }

    /// Explicit port, or the scheme default.
    pub fn port(&self) -> u16 {
        self.host
            .rsplit_once(':')
            .and_then(|(_, port)| port.parse().ok())
            .unwrap_or(if self.protocol == "https" { 443 } else { 80 })
    }

    /// Path component.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Decoded query parameters.
    pub fn search(&self) -> &BTreeMap<String, String> {
        &self.search
    }

    /// Path plus encoded query string.
    pub fn url(&self) -> String {
        if self.search.is_empty() {
            return self.path.clone();
        }
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.search.iter())
            .finish();
        format!("{}?{}", self.path, query)
    }

    /// Absolute URL.
    pub fn abs_url(&self) -> String {
        format!("{}://{}{}", self.protocol, self.host, self.url())
    }

    fn set_url(&mut self, url: &str) {
        let request = PrerenderRequest::new(url);
        self.path = request.path().to_string();
        self.search = request.query();
    }
}

#[derive(Debug, Default)]
struct RequestState {
    initial: Option<String>,
    location: Option<Location>,
    navigated: bool,
}

/// Request-scoped state shared between the lifecycle and the sandbox.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    state: Arc<Mutex<RequestState>>,
}

impl RequestContext {
    /// An empty context with no request attached.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RequestState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attaches the request. A context serves exactly one request.
    pub fn set_request(&self, request: &PrerenderRequest) -> Result<()> {
        let mut state = self.lock();
        if state.location.is_some() {
            return Err(PrerenderError::RequestAlreadyAttached);
        }
        let location = Location::from_request(request);
        state.initial = Some(location.abs_url());
        state.location = Some(location);
        Ok(())
    }

    /// Whether a request has been attached.
    pub fn has_request(&self) -> bool {
        self.lock().location.is_some()
    }

    /// A snapshot of the current location.
    pub fn location(&self) -> Option<Location> {
        self.lock().location.clone()
    }

    /// Navigates to a new path. Records a redirect.
    pub fn set_path(&self, path: &str) {
        self.navigate(|loc| loc.path = normalize_path(path));
    }

    /// Navigates to a new path and query. Records a redirect.
    pub fn set_url(&self, url: &str) {
        self.navigate(|loc| loc.set_url(url));
    }

    /// Replaces the whole query. Does not by itself record a redirect.
    pub fn set_search(&self, search: BTreeMap<String, String>) {
        self.update(|loc| loc.search = search);
    }

    /// Sets or removes one query parameter. Does not record a redirect.
    pub fn set_search_param(&self, key: &str, value: Option<String>) {
        self.update(|loc| match value {
            Some(value) => {
                loc.search.insert(key.to_string(), value);
            }
            None => {
                loc.search.remove(key);
            }
        });
    }

    /// The absolute URL to redirect to, if the application navigated away.
    pub fn redirect_target(&self) -> Option<String> {
        let state = self.lock();
        if !state.navigated {
            return None;
        }
        let current = state.location.as_ref()?.abs_url();
        (state.initial.as_deref() != Some(current.as_str())).then_some(current)
    }

    fn navigate(&self, change: impl FnOnce(&mut Location)) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(location) = state.location.as_mut() {
            change(location);
            state.navigated = true;
            tracing::debug!(url = %location.abs_url(), "Location change requested");
        }
    }

    fn update(&self, change: impl FnOnce(&mut Location)) {
        if let Some(location) = self.lock().location.as_mut() {
            change(location);
        }
    }
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

/// The `location` service as seen from Lua.
#[derive(Clone)]
pub struct LocationHandle(pub RequestContext);

impl LocationHandle {
    fn current(&self) -> mlua::Result<Location> {
        self.0
            .location()
            .ok_or_else(|| mlua::Error::RuntimeError("no request attached to this context".into()))
    }
}

fn search_value(lua: &Lua, value: Value) -> mlua::Result<Option<String>> {
    match value {
        Value::Nil => Ok(None),
        Value::Boolean(false) => Ok(None),
        other => lua.unpack::<String>(other).map(Some),
    }
}

impl UserData for LocationHandle {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("absUrl", |_, this, ()| Ok(this.current()?.abs_url()));
        methods.add_method("protocol", |_, this, ()| {
            Ok(this.current()?.protocol().to_string())
        });
        methods.add_method("host", |_, this, ()| Ok(this.current()?.host().to_string()));
        methods.add_method("port", |_, this, ()| Ok(this.current()?.port()));
        methods.add_method("hash", |_, _, ()| Ok(String::new()));

        methods.add_method("url", |lua, this, url: Option<String>| match url {
            Some(url) => {
                this.0.set_url(&url);
                this.clone().into_lua(lua)
            }
            None => this.current()?.url().into_lua(lua),
        });

        methods.add_method("path", |lua, this, path: Option<String>| match path {
            Some(path) => {
                this.0.set_path(&path);
                this.clone().into_lua(lua)
            }
            None => this.current()?.path().to_string().into_lua(lua),
        });

        methods.add_method("search", |lua, this, (first, second): (Value, Value)| {
            match first {
                Value::Nil => {
                    let location = this.current()?;
                    let table = lua.create_table()?;
                    for (key, value) in location.search() {
                        table.set(key.as_str(), value.as_str())?;
                    }
                    return Ok(Value::Table(table));
                }
                Value::Table(params) => {
                    let mut search = BTreeMap::new();
                    for pair in params.pairs::<String, Value>() {
                        let (key, value) = pair?;
                        if let Some(value) = search_value(lua, value)? {
                            search.insert(key, value);
                        }
                    }
                    this.0.set_search(search);
                }
                key => {
                    let key: String = lua.unpack(key)?;
                    this.0.set_search_param(&key, search_value(lua, second)?);
                }
            }
            this.clone().into_lua(lua)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(url: &str) -> RequestContext {
        let ctx = RequestContext::new();
        let request = PrerenderRequest::new(url).with_header("host", "foo.bar.com");
        ctx.set_request(&request).unwrap();
        ctx
    }

    #[test]
    fn test_set_request_twice_fails() {
        let ctx = context("/");
        assert!(ctx.has_request());
        let err = ctx.set_request(&PrerenderRequest::new("/other")).unwrap_err();
        assert!(matches!(err, PrerenderError::RequestAlreadyAttached));
    }

    #[test]
    fn test_search_change_alone_does_not_redirect() {
        let ctx = context("/st/page?abc=123");
        ctx.set_search_param("ghi", Some("789".into()));
        assert_eq!(ctx.redirect_target(), None);
    }

    #[test]
    fn test_path_change_redirects_with_current_search() {
        let ctx = context("/st/page?abc=123");
        ctx.set_search([("def".to_string(), "456".to_string())].into());
        ctx.set_search_param("ghi", Some("789".into()));
        ctx.set_path("/st/elsewhere");
        assert_eq!(
            ctx.redirect_target().as_deref(),
            Some("http://foo.bar.com/st/elsewhere?def=456&ghi=789")
        );
    }

    #[test]
    fn test_navigating_back_to_start_is_not_a_redirect() {
        let ctx = context("/a");
        ctx.set_path("/b");
        ctx.set_path("/a");
        assert_eq!(ctx.redirect_target(), None);
    }

    #[test]
    fn test_location_parts() {
        let request = PrerenderRequest::new("/x?q=1")
            .with_header("host", "example.com:8443")
            .with_header("x-forwarded-proto", "https");
        let loc = Location::from_request(&request);
        assert_eq!(loc.host(), "example.com");
        assert_eq!(loc.port(), 8443);
        assert_eq!(loc.protocol(), "https");
        assert_eq!(loc.abs_url(), "https://example.com:8443/x?q=1");
    }

    #[test]
    fn test_lua_handle_round_trip() {
        let lua = Lua::new();
        let ctx = context("/start?abc=123");
        lua.globals().set("location", LocationHandle(ctx.clone())).unwrap();
        let path: String = lua
            .load(
                r#"
                location:search({ def = "456" })
                location:search("ghi", 789)
                location:path("/st/elsewhere")
                return location:path()
                "#,
            )
            .eval()
            .unwrap();
        assert_eq!(path, "/st/elsewhere");
        assert_eq!(
            ctx.redirect_target().as_deref(),
            Some("http://foo.bar.com/st/elsewhere?def=456&ghi=789")
        );
    }
}
