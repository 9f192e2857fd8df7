// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! View engines render the base template with the active route's view.
//!
//! The lifecycle only needs four steps from an engine (compile the root,
//! load a view, digest the scope, read the markup), so engines are pluggable
//! through [`ViewEngine`]. [`BindingEngine`] is the built-in one: it places
//! the view inside the element marked `data-view` and fills `{{ path }}`
//! bindings from the scope.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::Value as JsonValue;

use crate::error::{PrerenderError, Result};
use crate::html::escape_html;

/// Renders the page for one context.
pub trait ViewEngine: Send {
    /// Prepares the base template.
    fn compile(&mut self, root: &str) -> Result<()>;

    /// Sets the active route's view markup. `None` clears the outlet.
    fn load_view(&mut self, template: Option<&str>);

    /// Renders using `scope` as the binding source.
    fn digest(&mut self, scope: &JsonValue) -> Result<()>;

    /// The most recently rendered markup.
    fn content(&self) -> &str;
}

fn outlet_regex() -> &'static Regex {
    static OUTLET: OnceLock<Regex> = OnceLock::new();
    OUTLET.get_or_init(|| {
        Regex::new(r"(?is)<([a-z][a-z0-9-]*)\b[^>]*\sdata-view\b[^>]*>\s*</([a-z][a-z0-9-]*)\s*>")
            .expect("outlet pattern is valid")
    })
}

fn binding_regex() -> &'static Regex {
    static BINDING: OnceLock<Regex> = OnceLock::new();
    BINDING.get_or_init(|| Regex::new(r"\{\{\s*(.*?)\s*\}\}").expect("binding pattern is valid"))
}

/// The built-in `{{ }}` binding engine.
#[derive(Debug, Default, Clone)]
pub struct BindingEngine {
    has_outlet: bool,
    before: String,
    after: String,
    view: String,
    rendered: String,
}

impl BindingEngine {
    /// A fresh engine.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ViewEngine for BindingEngine {
    fn compile(&mut self, root: &str) -> Result<()> {
        match outlet_regex().find(root) {
            Some(outlet) => {
                let element = outlet.as_str();
                let close = element.rfind("</").unwrap_or(element.len());
                let split = outlet.start() + close;
                self.has_outlet = true;
                self.before = root[..split].to_string();
                self.after = root[split..].to_string();
            }
            None => {
                tracing::debug!("Base template has no data-view outlet");
                self.has_outlet = false;
                self.before = root.to_string();
                self.after.clear();
            }
        }
        self.rendered = format!("{}{}", self.before, self.after);
        Ok(())
    }

    fn load_view(&mut self, template: Option<&str>) {
        self.view = template.unwrap_or_default().to_string();
    }

    fn digest(&mut self, scope: &JsonValue) -> Result<()> {
        let view = if self.has_outlet { self.view.as_str() } else { "" };
        let markup = format!("{}{}{}", self.before, view, self.after);
        let mut failure = None;
        let rendered = binding_regex().replace_all(&markup, |caps: &Captures<'_>| {
            match evaluate(&caps[1], scope) {
                Ok(text) => escape_html(&text),
                Err(err) => {
                    failure.get_or_insert(err);
                    String::new()
                }
            }
        });
        if let Some(err) = failure {
            return Err(err);
        }
        self.rendered = rendered.into_owned();
        Ok(())
    }

    fn content(&self) -> &str {
        &self.rendered
    }
}

fn evaluate(expression: &str, scope: &JsonValue) -> Result<String> {
    let mut parts = expression.split('|').map(str::trim);
    let path = parts.next().unwrap_or_default();
    let value = lookup(path, scope);

    let mut text = None;
    for filter in parts {
        match filter {
            "json" => {
                let pretty = serde_json::to_string_pretty(value.unwrap_or(&JsonValue::Null))
                    .map_err(|e| PrerenderError::Template(e.to_string()))?;
                text = Some(pretty);
            }
            "uppercase" => text = Some(display(value).to_uppercase()),
            "lowercase" => text = Some(display(value).to_lowercase()),
            other => return Err(PrerenderError::Template(format!("Unknown filter: {other}"))),
        }
    }
    Ok(text.unwrap_or_else(|| display(value)))
}

fn lookup<'a>(path: &str, scope: &'a JsonValue) -> Option<&'a JsonValue> {
    if path.is_empty() {
        return None;
    }
    path.split('.').try_fold(scope, |current, segment| match current {
        JsonValue::Object(map) => map.get(segment),
        JsonValue::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn display(value: Option<&JsonValue>) -> String {
    match value {
        None | Some(JsonValue::Null) => String::new(),
        Some(JsonValue::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
