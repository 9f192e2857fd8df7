// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Route resolution and the route transport form.
//!
//! Resolving a matched route runs its server-side resolvers, fetches its
//! template, and flattens every promise in the results. The outcome can be
//! turned into a [`RouteTransport`], the JSON form the client uses to
//! reconstruct the route without running the resolvers again.

use std::collections::{BTreeMap, HashMap, HashSet};

use futures_util::future::{try_join, try_join_all};
use mlua::{Lua, LuaSerdeExt, Table, Value};
use serde::Serialize;

use crate::error::{PrerenderError, Result};
use crate::extensions::HttpClient;
use crate::flatten::flatten;
use crate::inject::Injector;
use crate::router::{MatchedRoute, Resolver, TemplateSource};

/// A route whose resolvers have all settled.
#[derive(Debug, Clone)]
pub struct ResolvedRoute {
    /// The match this was resolved from.
    pub matched: MatchedRoute,
    /// Resolver results, keyed by resolver name.
    pub locals: Table,
    /// Resolvers that name a service instead of running on the server.
    pub local_services: BTreeMap<String, String>,
    /// View markup, inline or fetched.
    pub template: Option<String>,
}

/// Serializable form of a resolved route.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteTransport {
    /// Pattern the route was registered with.
    pub original_path: Option<String>,
    /// Controller name, if the route names one.
    pub controller: Option<String>,
    /// View markup.
    pub template: Option<String>,
    /// Settled resolver results.
    pub locals: serde_json::Value,
    /// Resolver name to service name.
    pub local_services: BTreeMap<String, String>,
    /// Query overlaid with path parameters.
    pub params: BTreeMap<String, String>,
    /// Path parameters only.
    pub path_params: BTreeMap<String, String>,
}

impl ResolvedRoute {
    /// Converts to the transport form.
    ///
    /// Fails with [`PrerenderError::Serialization`] when a local holds a
    /// function, userdata, a cyclic table or a NaN or infinite number.
    pub fn to_transport(&self, lua: &Lua) -> Result<RouteTransport> {
        let locals = Value::Table(self.locals.clone());
        reject_non_finite(&locals, "locals", &mut HashSet::new())?;
        let locals: serde_json::Value = lua
            .from_value(Value::Table(self.locals.clone()))
            .map_err(|e| PrerenderError::Serialization(e.to_string()))?;
        let descriptor = &self.matched.descriptor;
        Ok(RouteTransport {
            original_path: descriptor.original_path.clone(),
            controller: descriptor
                .controller
                .as_ref()
                .and_then(|c| c.name())
                .map(str::to_string),
            template: self.template.clone(),
            locals,
            local_services: self.local_services.clone(),
            params: self.matched.params.clone(),
            path_params: self.matched.path_params.clone(),
        })
    }

    /// Resolver results as injectable locals.
    pub fn injectable_locals(&self) -> Result<HashMap<String, Value>> {
        let mut locals = HashMap::new();
        for pair in self.locals.clone().pairs::<String, Value>() {
            let (name, value) = pair?;
            locals.insert(name, value);
        }
        Ok(locals)
    }
}

/// JSON has no NaN or infinity; serde_json would turn them into `null`.
fn reject_non_finite(value: &Value, path: &str, seen: &mut HashSet<usize>) -> Result<()> {
    match value {
        Value::Number(n) if !n.is_finite() => Err(PrerenderError::Serialization(format!(
            "{path} is {n}, which JSON cannot represent"
        ))),
        Value::Table(table) => {
            if !seen.insert(table.to_pointer() as usize) {
                return Ok(());
            }
            for pair in table.clone().pairs::<Value, Value>() {
                let (key, value) = pair?;
                let key = match &key {
                    Value::String(name) => name.to_string_lossy(),
                    Value::Integer(index) => index.to_string(),
                    other => other.type_name().to_string(),
                };
                reject_non_finite(&value, &format!("{path}.{key}"), seen)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Builds the `route` value passed to resolvers and controllers.
pub fn route_value(lua: &Lua, matched: &MatchedRoute) -> Result<Value> {
    let route = lua.create_table()?;
    route.set("originalPath", matched.original_path())?;
    route.set("params", map_table(lua, &matched.params)?)?;
    route.set("pathParams", map_table(lua, &matched.path_params)?)?;
    Ok(Value::Table(route))
}

fn map_table(lua: &Lua, map: &BTreeMap<String, String>) -> Result<Table> {
    let table = lua.create_table()?;
    for (key, value) in map {
        table.set(key.as_str(), value.as_str())?;
    }
    Ok(table)
}

/// Runs a matched route's resolvers.
pub struct RouteResolver<'a> {
    lua: &'a Lua,
    injector: &'a Injector,
    http: &'a HttpClient,
}

impl<'a> RouteResolver<'a> {
    /// A resolver over one context's sandbox, services and network client.
    pub fn new(lua: &'a Lua, injector: &'a Injector, http: &'a HttpClient) -> Self {
        Self { lua, injector, http }
    }

    /// Resolves `matched`.
    ///
    /// Resolver functions are started in order and run concurrently with
    /// the template fetch. Any rejection fails the whole resolution.
    pub async fn resolve(&self, matched: MatchedRoute) -> Result<ResolvedRoute> {
        let route = route_value(self.lua, &matched)?;
        let mut local_services = BTreeMap::new();
        let mut calls = Vec::new();

        for (name, resolver) in &matched.descriptor.resolve {
            match resolver {
                Resolver::Service(service) => {
                    local_services.insert(name.clone(), service.clone());
                }
                Resolver::Function(invocable) => {
                    let locals = HashMap::from([("route".to_string(), route.clone())]);
                    let route = route.clone();
                    let injector = self.injector;
                    calls.push(async move {
                        let value = injector
                            .invoke(invocable, &locals, route)
                            .await
                            .map_err(|e| PrerenderError::Resolution(format!("{name}: {e}")))?;
                        Ok::<_, PrerenderError>((name.clone(), value))
                    });
                }
            }
        }

        let (results, template) = try_join(try_join_all(calls), self.load_template(&matched)).await?;

        let locals = self.lua.create_table()?;
        for (name, value) in results {
            locals.set(name, value)?;
        }
        flatten(&locals)
            .await
            .map_err(|e| PrerenderError::Resolution(e.to_string()))?;

        tracing::debug!(
            route = matched.original_path().unwrap_or("otherwise"),
            "Resolved route"
        );
        Ok(ResolvedRoute {
            matched,
            locals,
            local_services,
            template,
        })
    }

    async fn load_template(&self, matched: &MatchedRoute) -> Result<Option<String>> {
        match &matched.descriptor.template {
            None => Ok(None),
            Some(TemplateSource::Inline(markup)) => Ok(Some(markup.clone())),
            Some(TemplateSource::Url(url)) => self
                .http
                .fetch_text(url)
                .await
                .map(Some)
                .map_err(|e| PrerenderError::Resolution(format!("template {url}: {e}"))),
        }
    }
}
