// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Client-style route table.
//!
//! Patterns follow the conventions of client-side routers:
//! - `/users/:id` → one segment named `id`
//! - `/users/:id?` → optional segment
//! - `/files/:path*` → greedy, may span slashes
//!
//! Registering `/a/b` also registers `/a/b/` as a redirect to it (and the
//! other way round). Matching is first-registered-wins.

use std::collections::BTreeMap;
use std::sync::Arc;

use percent_encoding::percent_decode_str;
use regex::Regex;
use thiserror::Error;

use crate::inject::Invocable;

/// Errors raised while building the route table.
#[derive(Debug, Clone, Error)]
pub enum RouteError {
    /// The pattern did not compile to a valid expression.
    #[error("Invalid route pattern '{pattern}': {message}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Compiler message.
        message: String,
    },
    /// A redirect route also names content to render.
    #[error("Route '{0}' has redirectTo together with a template, controller or resolvers")]
    RedirectWithContent(String),
    /// The route definition has the wrong shape.
    #[error("Invalid route definition for '{pattern}': {message}")]
    InvalidDefinition {
        /// The route pattern.
        pattern: String,
        /// What was wrong.
        message: String,
    },
}

/// A named placeholder in a route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamKey {
    /// Placeholder name.
    pub name: String,
    /// Whether the placeholder may be absent.
    pub optional: bool,
}

/// A route pattern compiled to an anchored regular expression.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    regex: Regex,
    keys: Vec<ParamKey>,
}

impl PathMatcher {
    /// Compiles `pattern`.
    pub fn compile(pattern: &str, case_insensitive: bool) -> Result<Self, RouteError> {
        let placeholder = placeholder_regex();
        let mut body = String::with_capacity(pattern.len() * 2);
        let mut keys = Vec::new();
        let mut last = 0;

        for caps in placeholder.captures_iter(pattern) {
            let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
            body.push_str(&regex::escape(&pattern[last..whole.start]));
            last = whole.end;

            let slash = if caps.get(1).is_some() { "/" } else { "" };
            let name = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
            let option = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
            let optional = option == "?" || option == "*?";
            let star = option == "*" || option == "*?";

            keys.push(ParamKey {
                name: name.to_string(),
                optional,
            });

            let capture = if star { "(.+?)" } else { "([^/]+)" };
            if optional {
                body.push_str(&format!("(?:{slash}{capture}?)?"));
            } else {
                body.push_str(&format!("{slash}(?:{capture})"));
            }
        }
        body.push_str(&regex::escape(&pattern[last..]));

        let flags = if case_insensitive { "(?i)" } else { "" };
        let regex = Regex::new(&format!("{flags}^{body}$")).map_err(|e| RouteError::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self { regex, keys })
    }

    /// Placeholders in pattern order.
    pub fn keys(&self) -> &[ParamKey] {
        &self.keys
    }

    /// Matches `path`, returning percent-decoded values for matched placeholders.
    ///
    /// Optional placeholders that did not match are left out.
    pub fn captures(&self, path: &str) -> Option<BTreeMap<String, String>> {
        let caps = self.regex.captures(path)?;
        let mut params = BTreeMap::new();
        for (index, key) in self.keys.iter().enumerate() {
            if let Some(value) = caps.get(index + 1) {
                let decoded = percent_decode_str(value.as_str()).decode_utf8_lossy();
                params.insert(key.name.clone(), decoded.into_owned());
            }
        }
        Some(params)
    }
}

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"(/)?:(\w+)(\*\?|[?*])?").expect("placeholder pattern is valid")
    })
}

/// Where a route's view template comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateSource {
    /// Markup given inline.
    Inline(String),
    /// Markup fetched over the network backend.
    Url(String),
}

/// One entry of a route's `resolve` map.
#[derive(Debug, Clone)]
pub enum Resolver {
    /// Reference to a named service; not run on the server.
    Service(String),
    /// A function run on the server.
    Function(Invocable),
}

/// The controller a route names.
#[derive(Debug, Clone)]
pub enum ControllerRef {
    /// Registered controller.
    Named(String),
    /// Controller function given inline.
    Inline(Invocable),
}

impl ControllerRef {
    /// The name carried in route data; inline controllers have none.
    pub fn name(&self) -> Option<&str> {
        match self {
            ControllerRef::Named(name) => Some(name),
            ControllerRef::Inline(_) => None,
        }
    }
}

/// A registered route.
#[derive(Debug, Clone, Default)]
pub struct RouteDescriptor {
    /// Pattern as registered; `None` for the default route.
    pub original_path: Option<String>,
    /// Compiled pattern; `None` for the default route.
    pub matcher: Option<PathMatcher>,
    /// Redirect target pattern.
    pub redirect_to: Option<String>,
    /// View template.
    pub template: Option<TemplateSource>,
    /// Controller to instantiate.
    pub controller: Option<ControllerRef>,
    /// Named resolvers, in invocation order.
    pub resolve: Vec<(String, Resolver)>,
    /// Match the pattern ignoring case.
    pub case_insensitive: bool,
    /// Carried for client parity; has no effect on the server.
    pub reload_on_search: bool,
}

impl RouteDescriptor {
    /// An empty route with client defaults.
    pub fn new() -> Self {
        Self {
            reload_on_search: true,
            ..Self::default()
        }
    }

    /// Sets an inline template.
    pub fn with_template(mut self, markup: impl Into<String>) -> Self {
        self.template = Some(TemplateSource::Inline(markup.into()));
        self
    }

    /// Sets a template URL.
    pub fn with_template_url(mut self, url: impl Into<String>) -> Self {
        self.template = Some(TemplateSource::Url(url.into()));
        self
    }

    /// Sets a named controller.
    pub fn with_controller(mut self, name: impl Into<String>) -> Self {
        self.controller = Some(ControllerRef::Named(name.into()));
        self
    }

    /// Adds a resolver.
    pub fn with_resolver(mut self, name: impl Into<String>, resolver: Resolver) -> Self {
        self.resolve.push((name.into(), resolver));
        self
    }

    /// Makes this a redirect route.
    pub fn with_redirect(mut self, target: impl Into<String>) -> Self {
        self.redirect_to = Some(target.into());
        self
    }

    /// Matches case-insensitively.
    pub fn case_insensitive(mut self) -> Self {
        self.case_insensitive = true;
        self
    }

    fn validate(&self, pattern: &str) -> Result<(), RouteError> {
        let has_content =
            self.template.is_some() || self.controller.is_some() || !self.resolve.is_empty();
        if self.redirect_to.is_some() && has_content {
            return Err(RouteError::RedirectWithContent(pattern.to_string()));
        }
        Ok(())
    }
}

/// A successful match.
#[derive(Debug, Clone)]
pub struct MatchedRoute {
    /// The descriptor that matched.
    pub descriptor: Arc<RouteDescriptor>,
    /// Values captured from the path.
    pub path_params: BTreeMap<String, String>,
    /// Query parameters overlaid with path parameters.
    pub params: BTreeMap<String, String>,
}

impl MatchedRoute {
    fn new(
        descriptor: Arc<RouteDescriptor>,
        path_params: BTreeMap<String, String>,
        query: &BTreeMap<String, String>,
    ) -> Self {
        let mut params = query.clone();
        params.extend(path_params.clone());
        Self {
            descriptor,
            path_params,
            params,
        }
    }

    /// The pattern that matched.
    pub fn original_path(&self) -> Option<&str> {
        self.descriptor.original_path.as_deref()
    }

    /// For redirect routes: the target path with placeholders filled in,
    /// plus the parameters left over for the query string.
    pub fn redirect_location(&self) -> Option<(String, BTreeMap<String, String>)> {
        let target = self.descriptor.redirect_to.as_deref()?;
        let mut leftover = self.params.clone();
        let mut path = String::new();

        for (index, segment) in target.split(':').enumerate() {
            if index == 0 {
                path.push_str(segment);
                continue;
            }
            let name_len = segment
                .find(|c: char| !(c.is_alphanumeric() || c == '_'))
                .unwrap_or(segment.len());
            let (name, rest) = segment.split_at(name_len);
            let rest = rest.strip_prefix(['?', '*']).unwrap_or(rest);
            if let Some(value) = leftover.remove(name) {
                path.push_str(&value);
            }
            path.push_str(rest);
        }
        Some((path, leftover))
    }
}

/// Ordered route registry.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<(String, Arc<RouteDescriptor>)>,
    fallback: Option<Arc<RouteDescriptor>>,
}

impl RouteTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `descriptor` under `pattern`, plus the trailing-slash twin.
    ///
    /// Re-registering a pattern replaces the earlier entry in place.
    pub fn register(&mut self, pattern: &str, mut descriptor: RouteDescriptor) -> Result<(), RouteError> {
        descriptor.validate(pattern)?;
        descriptor.original_path = Some(pattern.to_string());
        descriptor.matcher = Some(PathMatcher::compile(pattern, descriptor.case_insensitive)?);
        let case_insensitive = descriptor.case_insensitive;
        self.insert(pattern, descriptor);

        let twin = match pattern.strip_suffix('/') {
            Some(stripped) => stripped.to_string(),
            None => format!("{pattern}/"),
        };
        let redirect = RouteDescriptor {
            original_path: Some(twin.clone()),
            matcher: Some(PathMatcher::compile(&twin, case_insensitive)?),
            redirect_to: Some(pattern.to_string()),
            ..RouteDescriptor::new()
        };
        self.insert(&twin, redirect);

        tracing::trace!(pattern, "Registered route");
        Ok(())
    }

    /// Registers the route used for unmatched paths by clients.
    pub fn register_default(&mut self, descriptor: RouteDescriptor) -> Result<(), RouteError> {
        descriptor.validate("otherwise")?;
        self.fallback = Some(Arc::new(descriptor));
        Ok(())
    }

    fn insert(&mut self, pattern: &str, descriptor: RouteDescriptor) {
        let descriptor = Arc::new(descriptor);
        match self.routes.iter_mut().find(|(p, _)| p == pattern) {
            Some(entry) => entry.1 = descriptor,
            None => self.routes.push((pattern.to_string(), descriptor)),
        }
    }

    /// Finds the first route matching `path`.
    pub fn match_path(&self, path: &str, query: &BTreeMap<String, String>) -> Option<MatchedRoute> {
        self.routes.iter().find_map(|(_, descriptor)| {
            let path_params = descriptor.matcher.as_ref()?.captures(path)?;
            Some(MatchedRoute::new(descriptor.clone(), path_params, query))
        })
    }

    /// The default route, for callers that want client-style fallback.
    pub fn fallback(&self, query: &BTreeMap<String, String>) -> Option<MatchedRoute> {
        self.fallback
            .as_ref()
            .map(|descriptor| MatchedRoute::new(descriptor.clone(), BTreeMap::new(), query))
    }

    /// Registered patterns with their descriptors, in match order.
    pub fn routes(&self) -> impl Iterator<Item = (&str, &RouteDescriptor)> {
        self.routes.iter().map(|(p, d)| (p.as_str(), d.as_ref()))
    }

    /// Number of registered entries, including trailing-slash twins.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// True when nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_query() -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    #[test]
    fn test_named_params() {
        let matcher = PathMatcher::compile("/weather/:city/:day", false).unwrap();
        let params = matcher.captures("/weather/Berlin/monday").unwrap();
        assert_eq!(params["city"], "Berlin");
        assert_eq!(params["day"], "monday");
        assert!(matcher.captures("/weather/Berlin").is_none());
        assert!(matcher.captures("/weather/Berlin/monday/extra").is_none());
    }

    #[test]
    fn test_optional_param_omitted() {
        let matcher = PathMatcher::compile("/users/:id?", false).unwrap();
        assert!(matcher.keys()[0].optional);
        assert_eq!(matcher.captures("/users/42").unwrap()["id"], "42");
        let params = matcher.captures("/users").unwrap();
        assert!(!params.contains_key("id"));
    }

    #[test]
    fn test_star_spans_segments() {
        let matcher = PathMatcher::compile("/files/:path*", false).unwrap();
        assert_eq!(matcher.captures("/files/a/b/c").unwrap()["path"], "a/b/c");
    }

    #[test]
    fn test_percent_decoding() {
        let matcher = PathMatcher::compile("/weather/:city", false).unwrap();
        assert_eq!(
            matcher.captures("/weather/S%C3%A3o%20Paulo").unwrap()["city"],
            "São Paulo"
        );
    }

    #[test]
    fn test_literals_are_escaped() {
        let matcher = PathMatcher::compile("/a.b/(x)", false).unwrap();
        assert!(matcher.captures("/a.b/(x)").is_some());
        assert!(matcher.captures("/aXb/(x)").is_none());
    }

    #[test]
    fn test_case_insensitive() {
        let matcher = PathMatcher::compile("/About", true).unwrap();
        assert!(matcher.captures("/about").is_some());
        let strict = PathMatcher::compile("/About", false).unwrap();
        assert!(strict.captures("/about").is_none());
    }

    #[test]
    fn test_first_registered_wins() {
        let mut table = RouteTable::new();
        table
            .register("/items/new", RouteDescriptor::new().with_template("new"))
            .unwrap();
        table
            .register("/items/:id", RouteDescriptor::new().with_template("item"))
            .unwrap();

        let matched = table.match_path("/items/new", &no_query()).unwrap();
        assert_eq!(matched.original_path(), Some("/items/new"));
        let matched = table.match_path("/items/7", &no_query()).unwrap();
        assert_eq!(matched.original_path(), Some("/items/:id"));
    }

    #[test]
    fn test_trailing_slash_twin_redirects() {
        let mut table = RouteTable::new();
        table
            .register("/weather/:city", RouteDescriptor::new().with_template("w"))
            .unwrap();
        assert_eq!(table.len(), 2);

        let matched = table
            .match_path("/weather/Berlin/", &[("units".to_string(), "si".to_string())].into())
            .unwrap();
        assert_eq!(matched.descriptor.redirect_to.as_deref(), Some("/weather/:city"));
        let (path, search) = matched.redirect_location().unwrap();
        assert_eq!(path, "/weather/Berlin");
        assert_eq!(search.get("units").map(String::as_str), Some("si"));
        assert!(!search.contains_key("city"));
    }

    #[test]
    fn test_path_params_override_query() {
        let mut table = RouteTable::new();
        table.register("/u/:id", RouteDescriptor::new()).unwrap();
        let query = [
            ("id".to_string(), "from-query".to_string()),
            ("tab".to_string(), "x".to_string()),
        ]
        .into();
        let matched = table.match_path("/u/7", &query).unwrap();
        assert_eq!(matched.params["id"], "7");
        assert_eq!(matched.params["tab"], "x");
        assert_eq!(matched.path_params.len(), 1);
    }

    #[test]
    fn test_no_match_and_fallback() {
        let mut table = RouteTable::new();
        table.register("/", RouteDescriptor::new()).unwrap();
        assert!(table.match_path("/nope", &no_query()).is_none());
        assert!(table.fallback(&no_query()).is_none());

        table
            .register_default(RouteDescriptor::new().with_redirect("/"))
            .unwrap();
        assert!(table.fallback(&no_query()).is_some());
    }

    #[test]
    fn test_redirect_with_content_rejected() {
        let mut table = RouteTable::new();
        for descriptor in [
            RouteDescriptor::new().with_redirect("/new").with_template("x"),
            RouteDescriptor::new().with_redirect("/new").with_template_url("/x.html"),
            RouteDescriptor::new().with_redirect("/new").with_controller("Ctrl"),
            RouteDescriptor::new()
                .with_redirect("/new")
                .with_resolver("user", Resolver::Service("users".to_string())),
        ] {
            let err = table.register("/old", descriptor).unwrap_err();
            assert!(matches!(err, RouteError::RedirectWithContent(_)));
        }
        assert_eq!(table.routes().count(), 0);
    }
}
