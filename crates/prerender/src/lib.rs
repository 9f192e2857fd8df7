// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

// Warn on missing documentation for public items
#![warn(missing_docs)]

// PrerenderError carries boxed script-load chains and Lua errors.
#![allow(clippy::result_large_err)]

//! # prerender
//!
//! Server-side pre-rendering of single-page-application views.
//!
//! Applications declare modules, routes, services and controllers from Lua.
//! For every request a fresh sandbox loads the application scripts, matches
//! the route, runs its resolvers, waits until every outstanding network call
//! and promise continuation has settled, and snapshots the rendered view.
//! The page response carries the route data so the client can take over
//! without resolving the route again.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prerender::{MemoryBackend, PrerenderRequest, Prerenderer, RenderConfig};
//!
//! let config = RenderConfig {
//!     template: "<html><body><main data-view></main></body></html>".into(),
//!     server_scripts: vec!["app.lua".into()],
//!     modules: vec!["app".into()],
//!     ..RenderConfig::default()
//! };
//! let renderer = Prerenderer::new(config, Arc::new(MemoryBackend::new()));
//! let response = renderer.render_page(&PrerenderRequest::new("/weather/Berlin")).await;
//! ```

/// Error types and diagnostics.
pub mod error;
/// Outstanding-work tracking and quiescence.
pub mod pending;
/// Promises bridged between Lua and tokio.
pub mod promise;
/// In-place promise flattening for resolver results.
pub mod flatten;
/// Pluggable network backends.
pub mod backend;
/// HTTP request abstraction for the renderer.
pub mod request;
/// HTTP response abstraction for the renderer.
pub mod response;
/// Request-scoped location state.
pub mod location;
/// Route patterns and the route table.
pub mod router;
/// Dependency injection.
pub mod inject;
/// Module declarations and activation.
pub mod module;
/// Lua runtime extensions.
pub mod extensions;
/// Page markup helpers.
pub mod html;
/// Pluggable view engines.
pub mod view;
/// Per-request execution contexts.
pub mod context;
/// Route resolution and transport.
pub mod resolve;
/// The per-request render lifecycle.
pub mod lifecycle;

pub use backend::{HttpBackend, HttpError, HttpRequest, HttpResponse, MemoryBackend};
pub use context::{ExecutionContext, SERVER_MODULE};
pub use error::{diagnostic, PrerenderError, Result, SERIALIZATION_FAILURE_MESSAGE};
pub use lifecycle::{Endpoint, Lifecycle, LifecycleState, Prerenderer, RenderConfig};
pub use module::Application;
pub use request::PrerenderRequest;
pub use resolve::{ResolvedRoute, RouteTransport};
pub use response::PrerenderResponse;
pub use router::{MatchedRoute, RouteDescriptor, RouteTable};
pub use view::{BindingEngine, ViewEngine};

// Re-export mlua value
pub use mlua::Value;
