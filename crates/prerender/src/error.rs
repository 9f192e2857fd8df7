// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Error types for the prerender library.
//!
//! This module defines [`PrerenderError`], the main error enum, plus the
//! [`diagnostic`] helper used when an error has to be shown to an operator.
//!
//! # Error Categories
//!
//! - **Boot errors**: application scripts failed to load into the sandbox
//! - **Configuration errors**: invalid route definitions, unknown modules
//! - **Resolution errors**: a route resolver rejected
//! - **Serialization errors**: resolved route data is not representable as JSON
//! - **Lua errors**: anything else raised inside the sandbox

use thiserror::Error;

use crate::backend::HttpError;
use crate::router::RouteError;

/// Fixed response body used by both endpoints when route data cannot be serialized.
pub const SERIALIZATION_FAILURE_MESSAGE: &str = "Route data could not be rendered as JSON";

/// The main error type for prerender operations.
#[derive(Error, Debug)]
pub enum PrerenderError {
    /// An application script failed to load into the execution context.
    #[error("Failed to load script {path}: {source}")]
    ScriptLoad {
        /// Path of the script that failed.
        path: String,
        /// The underlying Lua or I/O failure.
        #[source]
        source: Box<PrerenderError>,
    },

    /// Lua runtime error raised inside the sandbox.
    #[error("Lua execution error: {0}")]
    Lua(#[from] mlua::Error),

    /// File I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// `attach_request` was called on a context that already has a request.
    #[error("This context already has a request")]
    RequestAlreadyAttached,

    /// A module was required but never registered.
    #[error("No module: {0}")]
    UnknownModule(String),

    /// An injectable name could not be satisfied.
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// A named controller was referenced but never registered.
    #[error("Unknown controller: {0}")]
    UnknownController(String),

    /// Invalid route pattern or definition.
    #[error(transparent)]
    Route(#[from] RouteError),

    /// A route resolver or template fetch rejected.
    #[error("Route resolution failed: {0}")]
    Resolution(String),

    /// Resolved route data cannot be represented on the wire.
    #[error("{SERIALIZATION_FAILURE_MESSAGE}: {0}")]
    Serialization(String),

    /// The binding engine could not render the view.
    #[error("Template error: {0}")]
    Template(String),

    /// Network backend failure.
    #[error(transparent)]
    Http(#[from] HttpError),

    /// The execution context was used after disposal.
    #[error("Execution context has already been disposed")]
    Disposed,
}

impl PrerenderError {
    /// Returns true if this error means the route data is not serializable.
    pub fn is_serialization(&self) -> bool {
        matches!(self, PrerenderError::Serialization(_))
    }
}

/// Convenience type alias for Results with [`PrerenderError`].
pub type Result<T> = std::result::Result<T, PrerenderError>;

/// Formats an error together with its whole source chain.
///
/// Lua errors already carry their traceback in their display form, so this
/// is the operator-facing "stack" for 500 responses.
pub fn diagnostic(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !out.contains(&text) {
            out.push_str("\nCaused by: ");
            out.push_str(&text);
        }
        source = cause.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialization_message_prefix() {
        let err = PrerenderError::Serialization("recursive table detected".into());
        assert!(err.is_serialization());
        assert!(err.to_string().starts_with(SERIALIZATION_FAILURE_MESSAGE));
    }

    #[test]
    fn test_diagnostic_includes_chain() {
        let inner = PrerenderError::Resolution("No such city".into());
        let err = PrerenderError::ScriptLoad {
            path: "app.lua".into(),
            source: Box::new(inner),
        };
        let text = diagnostic(&err);
        assert!(text.contains("app.lua"));
        assert!(text.contains("No such city"));
    }
}
