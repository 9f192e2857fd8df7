// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Named-dependency injection for resolvers, controllers and services.
//!
//! An [`Invocable`] is a Lua function plus the names of the values it wants.
//! In scripts it is written either as a bare function or as an annotated
//! array whose last element is the function:
//!
//! ```lua
//! resolve = {
//!     weather = { "http", "route", function(http, route) ... end },
//!     now = function(route) return os.time() end,
//! }
//! ```
//!
//! A bare function receives one default argument instead (the route for
//! resolvers, the scope for controllers).

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use mlua::{Function, Value, Variadic};

use crate::error::{PrerenderError, Result};

/// A function together with the names of its injected arguments.
#[derive(Debug, Clone)]
pub struct Invocable {
    /// The function to call.
    pub function: Function,
    /// Argument names, in order. Empty means "pass the default argument".
    pub inject: Vec<String>,
}

impl Invocable {
    /// Wraps a bare function.
    pub fn bare(function: Function) -> Self {
        Self {
            function,
            inject: Vec::new(),
        }
    }

    /// Reads a bare function or an annotated array.
    pub fn from_value(value: Value) -> mlua::Result<Self> {
        match value {
            Value::Function(function) => Ok(Self::bare(function)),
            Value::Table(table) => {
                let mut items: Vec<Value> = table
                    .sequence_values::<Value>()
                    .collect::<mlua::Result<_>>()?;
                let Some(Value::Function(function)) = items.pop() else {
                    return Err(mlua::Error::RuntimeError(
                        "annotated function must end with a function".into(),
                    ));
                };
                let inject = items
                    .into_iter()
                    .map(|item| match item {
                        Value::String(name) => Ok(name.to_str()?.to_string()),
                        other => Err(mlua::Error::RuntimeError(format!(
                            "injection names must be strings, got {}",
                            other.type_name()
                        ))),
                    })
                    .collect::<mlua::Result<_>>()?;
                Ok(Self { function, inject })
            }
            other => Err(mlua::Error::RuntimeError(format!(
                "expected a function or annotated array, got {}",
                other.type_name()
            ))),
        }
    }
}

enum Provider {
    Value(Value),
    Factory(Invocable),
}

/// Service registry for one execution context.
///
/// Factories run lazily, once, on first lookup.
#[derive(Default)]
pub struct Injector {
    providers: HashMap<String, Provider>,
    instances: Mutex<HashMap<String, Value>>,
    constructing: Mutex<HashSet<String>>,
}

impl Injector {
    /// An empty injector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a constant. Later registrations replace earlier ones.
    pub fn register_value(&mut self, name: impl Into<String>, value: Value) {
        self.providers.insert(name.into(), Provider::Value(value));
    }

    /// Registers a lazily invoked factory.
    pub fn register_factory(&mut self, name: impl Into<String>, factory: Invocable) {
        self.providers.insert(name.into(), Provider::Factory(factory));
    }

    /// Whether `name` is registered.
    pub fn has(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Returns the service instance for `name`, creating it if needed.
    pub fn get(&self, name: &str) -> Result<Value> {
        let factory = match self.providers.get(name) {
            None => return Err(PrerenderError::UnknownProvider(name.to_string())),
            Some(Provider::Value(value)) => return Ok(value.clone()),
            Some(Provider::Factory(factory)) => factory,
        };

        if let Some(instance) = self.instances_lock().get(name) {
            return Ok(instance.clone());
        }

        if !self.constructing_lock().insert(name.to_string()) {
            return Err(PrerenderError::Resolution(format!(
                "Circular dependency while constructing {name}"
            )));
        }
        let created = self.arguments(&factory.inject, &HashMap::new()).and_then(|args| {
            factory
                .function
                .call::<Value>(args)
                .map_err(PrerenderError::from)
        });
        self.constructing_lock().remove(name);

        let instance = created?;
        self.instances_lock()
            .insert(name.to_string(), instance.clone());
        tracing::trace!(service = name, "Instantiated service");
        Ok(instance)
    }

    /// Collects arguments for `names`, preferring `locals` over services.
    pub fn arguments(&self, names: &[String], locals: &HashMap<String, Value>) -> Result<Variadic<Value>> {
        names
            .iter()
            .map(|name| match locals.get(name) {
                Some(value) => Ok(value.clone()),
                None => self.get(name),
            })
            .collect()
    }

    /// Calls `invocable`, injecting its arguments or passing `default`.
    ///
    /// The call runs as a coroutine, so the function may `await` promises.
    pub async fn invoke(
        &self,
        invocable: &Invocable,
        locals: &HashMap<String, Value>,
        default: Value,
    ) -> Result<Value> {
        let value = if invocable.inject.is_empty() {
            invocable.function.call_async::<Value>(default).await?
        } else {
            let args = self.arguments(&invocable.inject, locals)?;
            invocable.function.call_async::<Value>(args).await?
        };
        Ok(value)
    }

    fn instances_lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Value>> {
        self.instances.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn constructing_lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.constructing.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Injector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Injector")
            .field("providers", &self.names())
            .finish()
    }
}
