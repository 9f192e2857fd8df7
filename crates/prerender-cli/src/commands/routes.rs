// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Route listing command.
//!
//! Boots one context with the configured scripts and prints the route table.

use std::path::Path;
use std::sync::Arc;

use console::style;
use prerender::{MemoryBackend, Prerenderer, RouteDescriptor};

use super::serve::project_root;
use crate::config::Config;

/// One row of the route listing.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteSummary {
    /// Registered pattern.
    pub pattern: String,
    /// Redirect target, for redirect-only routes.
    pub redirect_to: Option<String>,
    /// Controller name, when named.
    pub controller: Option<String>,
    /// Resolver names, in invocation order.
    pub resolvers: Vec<String>,
}

impl RouteSummary {
    fn new(pattern: &str, descriptor: &RouteDescriptor) -> Self {
        Self {
            pattern: pattern.to_string(),
            redirect_to: descriptor.redirect_to.clone(),
            controller: descriptor
                .controller
                .as_ref()
                .and_then(|c| c.name())
                .map(str::to_string),
            resolvers: descriptor.resolve.iter().map(|(name, _)| name.clone()).collect(),
        }
    }
}

/// Collects the route table of the configured application.
///
/// No network calls are made; scripts that fetch at load time see 404s.
pub async fn collect(config: &Config, root: &Path) -> anyhow::Result<Vec<RouteSummary>> {
    let renderer = Prerenderer::new(config.render_config(root)?, Arc::new(MemoryBackend::new()));
    let routes = renderer
        .run_in_context(None, |_, app| {
            Box::pin(async move {
                Ok(app
                    .routes
                    .routes()
                    .map(|(pattern, descriptor)| RouteSummary::new(pattern, descriptor))
                    .collect::<Vec<_>>())
            })
        })
        .await?;
    Ok(routes)
}

/// Prints the route table.
pub async fn run(config_path: &Path) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;
    let root = project_root(config_path);
    let routes = collect(&config, &root).await?;

    println!("{} {} route(s)", style("Found").green(), routes.len());
    for route in routes {
        match route.redirect_to {
            Some(target) => println!("  {} {} {}", route.pattern, style("->").dim(), target),
            None => {
                let controller = route.controller.unwrap_or_else(|| "-".to_string());
                println!(
                    "  {}  {} {}  {} {}",
                    style(&route.pattern).cyan(),
                    style("controller:").dim(),
                    controller,
                    style("resolve:").dim(),
                    route.resolvers.join(", ")
                );
            }
        }
    }
    Ok(())
}
