// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! The per-request render lifecycle.
//!
//! [`Prerenderer`] owns the configuration and the network backend and builds
//! a fresh [`ExecutionContext`] for every request. A [`Lifecycle`] walks one
//! request through its states:
//!
//! ```text
//! Created → ScriptsLoading → Bootstrapped → RouteMatching → Resolving
//!         → AwaitingQuiescence → Snapshotting → Responded
//! ```
//!
//! with `ScriptLoadFailed`, `NotFound`, `ResolveFailed` and
//! `RedirectRequested` as the other terminal states. The context is
//! disposed exactly once, whichever state the request ends in.
//!
//! A redirect answers the page endpoint with a 302 and the data endpoint
//! with an empty JSON object.
//!
//! # Early head
//!
//! A lifecycle with a head sink hands the page head out as soon as the
//! controller has run without navigating away, before waiting for
//! outstanding work. The returned body then holds only what follows the
//! head, and a later redirect becomes a client-side navigation script.

use std::path::PathBuf;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use mlua::{DeserializeOptions, LuaSerdeExt, Value};
use serde_json::json;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::backend::HttpBackend;
use crate::context::ExecutionContext;
use crate::error::{diagnostic, PrerenderError, Result, SERIALIZATION_FAILURE_MESSAGE};
use crate::html;
use crate::module::Application;
use crate::request::PrerenderRequest;
use crate::resolve::{route_value, ResolvedRoute, RouteResolver};
use crate::response::PrerenderResponse;
use crate::view::{BindingEngine, ViewEngine};

/// Everything needed to render pages for one application.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Base HTML template markup.
    pub template: String,
    /// Scripts loaded into every context, in order.
    pub server_scripts: Vec<PathBuf>,
    /// Script URLs the client bootstrap loads.
    pub client_scripts: Vec<String>,
    /// Modules to activate.
    pub modules: Vec<String>,
    /// Base that client script URLs resolve against.
    pub static_prefix: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            template: String::new(),
            server_scripts: Vec::new(),
            client_scripts: Vec::new(),
            modules: Vec::new(),
            static_prefix: "/static/".to_string(),
        }
    }
}

/// Which endpoint a request is served by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// The prerendered HTML page.
    Page,
    /// The route data as JSON.
    Data,
}

/// States a request passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Nothing has happened yet.
    Created,
    /// Application scripts are loading.
    ScriptsLoading,
    /// A script failed to load. Terminal.
    ScriptLoadFailed,
    /// Modules activated and request attached.
    Bootstrapped,
    /// Looking the path up in the route table.
    RouteMatching,
    /// No route matched. Terminal.
    NotFound,
    /// Running resolvers.
    Resolving,
    /// Resolution or serialization failed. Terminal.
    ResolveFailed,
    /// Waiting for outstanding work to finish.
    AwaitingQuiescence,
    /// Rendering the final markup.
    Snapshotting,
    /// Response produced. Terminal.
    Responded,
    /// The application navigated away. Terminal.
    RedirectRequested,
}

impl LifecycleState {
    /// Whether no further transitions can follow.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LifecycleState::ScriptLoadFailed
                | LifecycleState::NotFound
                | LifecycleState::ResolveFailed
                | LifecycleState::Responded
                | LifecycleState::RedirectRequested
        )
    }
}

type ViewFactory = Arc<dyn Fn() -> Box<dyn ViewEngine> + Send + Sync>;

/// Renders requests for one application.
#[derive(Clone)]
pub struct Prerenderer {
    config: Arc<RenderConfig>,
    backend: Arc<dyn HttpBackend>,
    views: ViewFactory,
}

impl Prerenderer {
    /// Creates a renderer using the built-in [`BindingEngine`].
    pub fn new(config: RenderConfig, backend: Arc<dyn HttpBackend>) -> Self {
        Self {
            config: Arc::new(config),
            backend,
            views: Arc::new(|| Box::new(BindingEngine::new())),
        }
    }

    /// Replaces the view engine used for page renders.
    pub fn with_view_engine<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn ViewEngine> + Send + Sync + 'static,
    {
        self.views = Arc::new(factory);
        self
    }

    /// The configuration.
    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// A new lifecycle for one request.
    pub fn lifecycle(&self) -> Lifecycle<'_> {
        Lifecycle {
            renderer: self,
            history: vec![LifecycleState::Created],
            head_sink: None,
            head_sent: false,
        }
    }

    /// Renders the prerendered page for `request`.
    pub async fn render_page(&self, request: &PrerenderRequest) -> PrerenderResponse {
        self.lifecycle().run(request, Endpoint::Page).await
    }

    /// Renders the route data for `request`.
    pub async fn render_data(&self, request: &PrerenderRequest) -> PrerenderResponse {
        self.lifecycle().run(request, Endpoint::Data).await
    }

    /// Boots a context, runs `work` inside it, then disposes it.
    ///
    /// Without a request the server module is registered but no location is
    /// attached, which is enough for inspecting routes and services.
    pub async fn run_in_context<T, F>(&self, request: Option<&PrerenderRequest>, work: F) -> Result<T>
    where
        F: for<'c> FnOnce(&'c ExecutionContext, &'c Application) -> BoxFuture<'c, Result<T>>,
    {
        let context = ExecutionContext::new(self.backend.clone())?;
        let outcome = async {
            context.load_scripts(&self.config.server_scripts).await?;
            context.register_server_module()?;
            if let Some(request) = request {
                context.attach_request(request)?;
            }
            let app = context.bootstrap(&self.config.modules)?;
            work(&context, &app).await
        }
        .await;
        context.dispose();
        outcome
    }
}

impl std::fmt::Debug for Prerenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prerenderer")
            .field("config", &self.config)
            .finish()
    }
}

enum Outcome {
    Done(PrerenderResponse),
    Failed(PrerenderError),
}

/// One request's walk through the lifecycle states.
pub struct Lifecycle<'r> {
    renderer: &'r Prerenderer,
    history: Vec<LifecycleState>,
    head_sink: Option<oneshot::Sender<String>>,
    head_sent: bool,
}

impl Lifecycle<'_> {
    /// Sends the page head to `sink` before the page settles.
    ///
    /// The sink is dropped unsent unless the controller ran without
    /// navigating away.
    pub fn with_head_sink(mut self, sink: oneshot::Sender<String>) -> Self {
        self.head_sink = Some(sink);
        self
    }

    /// Whether the head already went out through the sink.
    pub fn head_sent(&self) -> bool {
        self.head_sent
    }

    /// The current state.
    pub fn state(&self) -> LifecycleState {
        self.history
            .last()
            .copied()
            .unwrap_or(LifecycleState::Created)
    }

    /// Every state entered so far, in order.
    pub fn history(&self) -> &[LifecycleState] {
        &self.history
    }

    fn enter(&mut self, next: LifecycleState) {
        debug!(from = ?self.state(), to = ?next, "Lifecycle transition");
        self.history.push(next);
    }

    /// Runs the whole lifecycle for `request` on `endpoint`.
    pub async fn run(&mut self, request: &PrerenderRequest, endpoint: Endpoint) -> PrerenderResponse {
        info!(url = %request.url, ?endpoint, "Prerender request");
        let context = match ExecutionContext::new(self.renderer.backend.clone()) {
            Ok(context) => context,
            Err(err) => return internal_error(&err),
        };

        self.enter(LifecycleState::ScriptsLoading);
        let response = match context.load_scripts(&self.renderer.config.server_scripts).await {
            Err(err) => {
                self.enter(LifecycleState::ScriptLoadFailed);
                error!(error = %err, "Application scripts failed to load");
                PrerenderResponse::internal_error(diagnostic(&err))
            }
            Ok(()) => match self.drive(&context, request, endpoint).await {
                Outcome::Done(response) => response,
                Outcome::Failed(err) => internal_error(&err),
            },
        };

        self.head_sink = None;
        context.dispose();
        debug!(status = response.status(), state = ?self.state(), "Prerender finished");
        response
    }

    async fn drive(&mut self, context: &ExecutionContext, request: &PrerenderRequest, endpoint: Endpoint) -> Outcome {
        let app = match self.bootstrap(context, request) {
            Ok(app) => app,
            Err(err) => return Outcome::Failed(err),
        };

        let mut view = (self.renderer.views)();
        if endpoint == Endpoint::Page {
            if let Err(err) = view.compile(&self.renderer.config.template) {
                return Outcome::Failed(err);
            }
        }

        self.enter(LifecycleState::RouteMatching);
        let Some(matched) = app.routes.match_path(request.path(), &request.query()) else {
            self.enter(LifecycleState::NotFound);
            debug!(path = request.path(), "No route matched");
            return Outcome::Done(match endpoint {
                Endpoint::Page => PrerenderResponse::not_found(),
                Endpoint::Data => PrerenderResponse::json(200, json!({})),
            });
        };

        if let Some((path, search)) = matched.redirect_location() {
            let query = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(search.iter())
                .finish();
            let url = if query.is_empty() { path } else { format!("{path}?{query}") };
            context.request().set_url(&url);
            return self.redirect(context, endpoint).await;
        }

        self.enter(LifecycleState::Resolving);
        let resolved = RouteResolver::new(context.lua(), &app.injector, context.http())
            .resolve(matched)
            .await;

        if context.request().redirect_target().is_some() {
            return self.redirect(context, endpoint).await;
        }

        let resolved = match resolved {
            Ok(resolved) => resolved,
            Err(err) => {
                self.enter(LifecycleState::ResolveFailed);
                warn!(error = %err, "Route resolution failed");
                return match endpoint {
                    Endpoint::Data => Outcome::Done(PrerenderResponse::json(200, json!({}))),
                    Endpoint::Page => Outcome::Failed(err),
                };
            }
        };

        let transport = match resolved.to_transport(context.lua()) {
            Ok(transport) => transport,
            Err(err) => {
                self.enter(LifecycleState::ResolveFailed);
                error!(error = %err, "Route data is not serializable");
                return Outcome::Done(PrerenderResponse::internal_error(SERIALIZATION_FAILURE_MESSAGE));
            }
        };

        if endpoint == Endpoint::Data {
            self.enter(LifecycleState::Responded);
            return Outcome::Done(PrerenderResponse::json(200, json!({ "route": transport })));
        }

        let route_json = match serde_json::to_string(&transport) {
            Ok(json) => json,
            Err(_) => {
                self.enter(LifecycleState::ResolveFailed);
                return Outcome::Done(PrerenderResponse::internal_error(SERIALIZATION_FAILURE_MESSAGE));
            }
        };
        let config = &self.renderer.config;
        let head = html::page_head(&route_json, &config.template, &config.client_scripts, &config.static_prefix);

        match self.render(context, &app, &resolved, view.as_mut(), &head).await {
            Ok(Some(tail)) => {
                self.enter(LifecycleState::Responded);
                let body = if self.head_sent { tail } else { format!("{head}{tail}") };
                Outcome::Done(PrerenderResponse::html(200, body))
            }
            Ok(None) => self.redirect(context, endpoint).await,
            Err(err) => Outcome::Failed(err),
        }
    }

    fn bootstrap(&mut self, context: &ExecutionContext, request: &PrerenderRequest) -> Result<Application> {
        context.register_server_module()?;
        context.attach_request(request)?;
        let app = context.bootstrap(&self.renderer.config.modules)?;
        self.enter(LifecycleState::Bootstrapped);
        Ok(app)
    }

    /// Instantiates the controller, waits for quiescence and snapshots.
    /// Returns `None` when the application navigated away meanwhile.
    async fn render(
        &mut self,
        context: &ExecutionContext,
        app: &Application,
        resolved: &ResolvedRoute,
        view: &mut dyn ViewEngine,
        head: &str,
    ) -> Result<Option<String>> {
        view.load_view(resolved.template.as_deref());

        let scope = context.new_scope()?;
        if let Some(controller) = &resolved.matched.descriptor.controller {
            let controller = app.controller(controller)?;
            let locals = controller_locals(context, app, resolved, &scope)?;
            app.injector
                .invoke(&controller, &locals, Value::Table(scope.clone()))
                .await?;
        }
        if context.request().redirect_target().is_none() {
            self.flush_head(head);
        }

        self.enter(LifecycleState::AwaitingQuiescence);
        context.pending().idle().await;
        if context.request().redirect_target().is_some() {
            return Ok(None);
        }

        self.enter(LifecycleState::Snapshotting);
        let options = DeserializeOptions::new()
            .deny_unsupported_types(false)
            .deny_recursive_tables(false);
        let scope_json: serde_json::Value = context
            .lua()
            .from_value_with(Value::Table(scope), options)
            .map_err(|e| PrerenderError::Template(e.to_string()))?;
        view.digest(&scope_json)?;
        Ok(Some(html::page_tail(view.content())))
    }

    fn flush_head(&mut self, head: &str) {
        if let Some(sink) = self.head_sink.take() {
            self.head_sent = sink.send(head.to_string()).is_ok();
            debug!(sent = self.head_sent, "Early head");
        }
    }

    async fn redirect(&mut self, context: &ExecutionContext, endpoint: Endpoint) -> Outcome {
        self.enter(LifecycleState::RedirectRequested);
        context.pending().idle().await;
        let Some(target) = context.request().redirect_target() else {
            return Outcome::Failed(PrerenderError::Resolution(
                "redirect requested without a target".into(),
            ));
        };
        info!(location = %target, ?endpoint, "Redirecting");
        match endpoint {
            Endpoint::Data => Outcome::Done(PrerenderResponse::json(200, json!({}))),
            Endpoint::Page if self.head_sent => {
                Outcome::Done(PrerenderResponse::html(200, html::redirect_script(&target)))
            }
            Endpoint::Page => Outcome::Done(PrerenderResponse::redirect(target)),
        }
    }
}

fn controller_locals(
    context: &ExecutionContext,
    app: &Application,
    resolved: &ResolvedRoute,
    scope: &mlua::Table,
) -> Result<std::collections::HashMap<String, Value>> {
    let mut locals = resolved.injectable_locals()?;
    for (name, service) in &resolved.local_services {
        if app.injector.has(service) {
            locals.insert(name.clone(), app.injector.get(service)?);
        }
    }
    locals.insert("scope".to_string(), Value::Table(scope.clone()));
    locals.insert("route".to_string(), route_value(context.lua(), &resolved.matched)?);
    Ok(locals)
}

fn internal_error(err: &PrerenderError) -> PrerenderResponse {
    error!(error = %err, "Prerender failed");
    PrerenderResponse::internal_error(diagnostic(err))
}

