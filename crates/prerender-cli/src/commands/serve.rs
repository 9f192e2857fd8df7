// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Server command.
//!
//! Serves prerendered pages, route data under the API prefix, and static
//! files under `/static/`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use console::style;
use prerender::Prerenderer;

use crate::backend::ReqwestBackend;
use crate::config::Config;
use crate::server::{build_router, create_server};

/// Runs the server. `host` and `port` override the configuration.
pub async fn run(config_path: &Path, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let mut config = Config::load(config_path)?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    let root = project_root(config_path);

    println!("{}", style("Starting prerender server...").cyan().bold());

    let render_config = config.render_config(&root)?;
    for script in &render_config.server_scripts {
        if !script.exists() {
            println!(
                "{} {}",
                style("Warning: script not found:").yellow(),
                script.display()
            );
        }
    }

    let backend = ReqwestBackend::new(Duration::from_secs(config.http.timeout_secs))?;
    let renderer = Prerenderer::new(render_config, Arc::new(backend));
    let app = build_router(&config, &root, renderer);

    let addr = config.address();
    println!(
        "{} http://{}  {} {}",
        style("Listening on").green(),
        addr,
        style("data endpoint:").dim(),
        config.server.api_prefix
    );
    tracing::info!(%addr, "Server started");

    create_server(&addr, app).await
}

/// Directory holding the config file; relative paths resolve against it.
pub(crate) fn project_root(config_path: &Path) -> std::path::PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    }
}
