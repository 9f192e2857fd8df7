// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Application modules declared from Lua.
//!
//! Scripts declare modules with `prerender.module(name, requires)` and then
//! attach routes, services and controllers to the returned handle:
//!
//! ```lua
//! local app = prerender.module("weather", {})
//!
//! app:service("api", { "http", function(http)
//!     return { forecast = function(city) return http.get("/api/" .. city) end }
//! end })
//!
//! app:route("/weather/:city", {
//!     templateUrl = "/views/weather.html",
//!     controller = "WeatherCtrl",
//!     resolve = {
//!         forecast = { "api", "route", function(api, route)
//!             return api.forecast(route.params.city)
//!         end },
//!     },
//! })
//!
//! app:otherwise({ redirectTo = "/" })
//! ```
//!
//! Nothing is interpreted until [`ModuleRegistry::activate`] walks the
//! requested modules and their requirements.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use mlua::{Lua, Table, UserData, UserDataMethods, Value};

use crate::error::{PrerenderError, Result};
use crate::inject::{Injector, Invocable};
use crate::router::{ControllerRef, Resolver, RouteDescriptor, RouteError, RouteTable, TemplateSource};

enum ServiceDef {
    Factory(Value),
    Value(Value),
}

#[derive(Default)]
struct ModuleSpec {
    requires: Vec<String>,
    routes: Vec<(Option<String>, Table)>,
    services: Vec<(String, ServiceDef)>,
    controllers: Vec<(String, Value)>,
}

/// A module as seen from Lua. Methods return the handle for chaining.
#[derive(Clone)]
pub struct ModuleHandle {
    name: String,
    spec: Arc<Mutex<ModuleSpec>>,
}

impl ModuleHandle {
    fn new(name: &str, requires: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            spec: Arc::new(Mutex::new(ModuleSpec {
                requires,
                ..ModuleSpec::default()
            })),
        }
    }

    fn spec(&self) -> MutexGuard<'_, ModuleSpec> {
        self.spec.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Module name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers a constant service.
    pub fn add_value(&self, name: &str, value: Value) {
        self.spec()
            .services
            .push((name.to_string(), ServiceDef::Value(value)));
    }
}

impl UserData for ModuleHandle {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("route", |_, this, (pattern, definition): (String, Table)| {
            this.spec().routes.push((Some(pattern), definition));
            Ok(this.clone())
        });
        methods.add_method("otherwise", |_, this, definition: Table| {
            this.spec().routes.push((None, definition));
            Ok(this.clone())
        });
        methods.add_method("service", |_, this, (name, factory): (String, Value)| {
            this.spec()
                .services
                .push((name, ServiceDef::Factory(factory)));
            Ok(this.clone())
        });
        methods.add_method("value", |_, this, (name, value): (String, Value)| {
            this.add_value(&name, value);
            Ok(this.clone())
        });
        methods.add_method("controller", |_, this, (name, value): (String, Value)| {
            this.spec().controllers.push((name, value));
            Ok(this.clone())
        });
        methods.add_method("name", |_, this, ()| Ok(this.name.clone()));
    }
}

/// Everything activation produced: routes, services and controllers.
#[derive(Debug, Default)]
pub struct Application {
    /// Route table, in registration order.
    pub routes: RouteTable,
    /// Service registry.
    pub injector: Injector,
    controllers: HashMap<String, Invocable>,
    modules: Vec<String>,
}

impl Application {
    /// Looks up the function for a route's controller.
    pub fn controller(&self, controller: &ControllerRef) -> Result<Invocable> {
        match controller {
            ControllerRef::Inline(invocable) => Ok(invocable.clone()),
            ControllerRef::Named(name) => self
                .controllers
                .get(name)
                .cloned()
                .ok_or_else(|| PrerenderError::UnknownController(name.clone())),
        }
    }

    /// Modules in activation order.
    pub fn modules(&self) -> &[String] {
        &self.modules
    }
}

/// All modules declared in one execution context.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: Arc<Mutex<HashMap<String, ModuleHandle>>>,
}

impl ModuleRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ModuleHandle>> {
        self.modules.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Declares (or redeclares) a module.
    pub fn define(&self, name: &str, requires: Vec<String>) -> ModuleHandle {
        let handle = ModuleHandle::new(name, requires);
        self.lock().insert(name.to_string(), handle.clone());
        handle
    }

    /// Looks up a declared module.
    pub fn get(&self, name: &str) -> Option<ModuleHandle> {
        self.lock().get(name).cloned()
    }

    /// Installs the global `prerender` table.
    pub fn install(&self, lua: &Lua) -> mlua::Result<()> {
        let api = lua.create_table()?;
        let registry = self.clone();
        api.set(
            "module",
            lua.create_function(move |_, (name, requires): (String, Option<Vec<String>>)| {
                match requires {
                    Some(requires) => Ok(registry.define(&name, requires)),
                    None => registry
                        .get(&name)
                        .ok_or_else(|| mlua::Error::external(PrerenderError::UnknownModule(name))),
                }
            })?,
        )?;
        lua.globals().set("prerender", api)
    }

    /// Runs the declarations of `names` and everything they require,
    /// requirements first.
    pub fn activate(&self, names: &[String]) -> Result<Application> {
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        for name in names {
            self.collect(name, &mut seen, &mut order)?;
        }

        let mut app = Application::default();
        for handle in &order {
            apply(handle, &mut app)?;
            app.modules.push(handle.name.clone());
        }
        tracing::debug!(modules = ?app.modules, routes = app.routes.len(), "Activated modules");
        Ok(app)
    }

    fn collect(&self, name: &str, seen: &mut HashSet<String>, order: &mut Vec<ModuleHandle>) -> Result<()> {
        if !seen.insert(name.to_string()) {
            return Ok(());
        }
        let handle = self
            .get(name)
            .ok_or_else(|| PrerenderError::UnknownModule(name.to_string()))?;
        let requires = handle.spec().requires.clone();
        for required in &requires {
            self.collect(required, seen, order)?;
        }
        order.push(handle);
        Ok(())
    }
}

fn apply(handle: &ModuleHandle, app: &mut Application) -> Result<()> {
    let spec = handle.spec();
    for (name, service) in &spec.services {
        match service {
            ServiceDef::Value(value) => app.injector.register_value(name, value.clone()),
            ServiceDef::Factory(factory) => {
                app.injector
                    .register_factory(name, Invocable::from_value(factory.clone())?)
            }
        }
    }
    for (name, value) in &spec.controllers {
        app.controllers
            .insert(name.clone(), Invocable::from_value(value.clone())?);
    }
    for (pattern, definition) in &spec.routes {
        let label = pattern.as_deref().unwrap_or("otherwise");
        let descriptor = parse_route(label, definition)?;
        match pattern {
            Some(pattern) => app.routes.register(pattern, descriptor)?,
            None => app.routes.register_default(descriptor)?,
        }
    }
    Ok(())
}

fn invalid(pattern: &str, message: impl Into<String>) -> PrerenderError {
    PrerenderError::Route(RouteError::InvalidDefinition {
        pattern: pattern.to_string(),
        message: message.into(),
    })
}

/// Reads a Lua route definition table.
///
/// Lua tables carry no key order, so resolvers run in key order.
fn parse_route(pattern: &str, definition: &Table) -> Result<RouteDescriptor> {
    let mut descriptor = RouteDescriptor::new();

    let template: Option<String> = definition.get("template")?;
    let template_url: Option<String> = definition.get("templateUrl")?;
    descriptor.template = match (template, template_url) {
        (Some(markup), _) => Some(TemplateSource::Inline(markup)),
        (None, Some(url)) => Some(TemplateSource::Url(url)),
        (None, None) => None,
    };

    descriptor.controller = match definition.get::<Value>("controller")? {
        Value::Nil => None,
        Value::String(name) => Some(ControllerRef::Named(name.to_str()?.to_string())),
        other => Some(ControllerRef::Inline(Invocable::from_value(other)?)),
    };

    descriptor.redirect_to = definition.get("redirectTo")?;
    descriptor.case_insensitive = definition
        .get::<Option<bool>>("caseInsensitiveMatch")?
        .unwrap_or(false);
    descriptor.reload_on_search = definition
        .get::<Option<bool>>("reloadOnSearch")?
        .unwrap_or(true);

    match definition.get::<Value>("resolve")? {
        Value::Nil => {}
        Value::Table(resolve) => descriptor.resolve = parse_resolvers(pattern, &resolve)?,
        other => return Err(invalid(pattern, format!("resolve must be a table, got {}", other.type_name()))),
    }

    Ok(descriptor)
}

/// Reads a `resolve` table.
///
/// `{ {"name", resolver}, ... }` entries keep their declaration order and
/// run first. Keyed entries follow, sorted by name, since a Lua table does
/// not remember the order its keys were written in.
fn parse_resolvers(pattern: &str, resolve: &Table) -> Result<Vec<(String, Resolver)>> {
    let mut ordered = Vec::new();
    for entry in resolve.clone().sequence_values::<Value>() {
        let Value::Table(entry) = entry? else {
            return Err(invalid(pattern, "ordered resolvers must be {name, resolver} pairs"));
        };
        let Value::String(name) = entry.get::<Value>(1)? else {
            return Err(invalid(pattern, "ordered resolver names must be strings"));
        };
        ordered.push((name.to_str()?.to_string(), parse_resolver(entry.get(2)?)?));
    }

    let mut named = Vec::new();
    for pair in resolve.clone().pairs::<Value, Value>() {
        let (key, value) = pair?;
        match key {
            Value::Integer(index) if index >= 1 && index as usize <= ordered.len() => {}
            Value::String(name) => named.push((name.to_str()?.to_string(), parse_resolver(value)?)),
            other => {
                return Err(invalid(
                    pattern,
                    format!("unexpected resolve key of type {}", other.type_name()),
                ))
            }
        }
    }
    named.sort_by(|a, b| a.0.cmp(&b.0));

    ordered.extend(named);
    for (i, (name, _)) in ordered.iter().enumerate() {
        if ordered[..i].iter().any(|(other, _)| other == name) {
            return Err(invalid(pattern, format!("resolver {name} is declared twice")));
        }
    }
    Ok(ordered)
}

fn parse_resolver(value: Value) -> Result<Resolver> {
    Ok(match value {
        Value::String(service) => Resolver::Service(service.to_str()?.to_string()),
        other => Resolver::Function(Invocable::from_value(other)?),
    })
}
