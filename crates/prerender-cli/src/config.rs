// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Prerender project configuration.
//!
//! Configuration is loaded from `prerender.toml` at the project root.
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3000
//! api_prefix = "/:"
//! static_dir = "static"
//! stream_head = false
//!
//! [app]
//! template = "src/app.html"
//! server_scripts = ["src/app.lua"]
//! client_scripts = ["app.js"]
//! modules = ["app"]
//!
//! [http]
//! timeout_secs = 30
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use prerender::RenderConfig;
use serde::Deserialize;

/// Default configuration file name.
pub const CONFIG_FILE: &str = "prerender.toml";

/// Main configuration structure loaded from `prerender.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Application scripts, modules and template.
    #[serde(default)]
    pub app: AppConfig,
    /// Outbound network settings.
    #[serde(default)]
    pub http: HttpConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server host (default: "127.0.0.1").
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port (default: 3000).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Mount point of the data-only endpoint (default: "/:").
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
    /// Directory served under `/static/` (default: "static").
    #[serde(default = "default_static_dir")]
    pub static_dir: String,
    /// Send the page head before the page settles (default: false).
    ///
    /// A redirect after the head went out is answered with a client-side
    /// navigation script instead of a 302.
    #[serde(default)]
    pub stream_head: bool,
}

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Base HTML template path (default: "src/app.html").
    #[serde(default = "default_template")]
    pub template: String,
    /// Lua scripts loaded into every context, in order.
    #[serde(default = "default_server_scripts")]
    pub server_scripts: Vec<String>,
    /// Script URLs referenced from the emitted page.
    #[serde(default = "default_client_scripts")]
    pub client_scripts: Vec<String>,
    /// Modules to activate.
    #[serde(default = "default_modules")]
    pub modules: Vec<String>,
}

/// Outbound network configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Per-request timeout in seconds (default: 30).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_api_prefix() -> String {
    "/:".to_string()
}

fn default_static_dir() -> String {
    "static".to_string()
}

fn default_template() -> String {
    "src/app.html".to_string()
}

fn default_server_scripts() -> Vec<String> {
    vec!["src/app.lua".to_string()]
}

fn default_client_scripts() -> Vec<String> {
    vec!["app.js".to_string()]
}

fn default_modules() -> Vec<String> {
    vec!["app".to_string()]
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_prefix: default_api_prefix(),
            static_dir: default_static_dir(),
            stream_head: false,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            template: default_template(),
            server_scripts: default_server_scripts(),
            client_scripts: default_client_scripts(),
            modules: default_modules(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Config {
    /// Loads configuration from `path`.
    ///
    /// If the file does not exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "No config file, using defaults");
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Builds the renderer configuration, reading the template from disk.
    ///
    /// Relative paths are taken relative to `root`.
    pub fn render_config(&self, root: &Path) -> anyhow::Result<RenderConfig> {
        let template_path = root.join(&self.app.template);
        let template = fs::read_to_string(&template_path)
            .with_context(|| format!("Failed to read template {}", template_path.display()))?;

        Ok(RenderConfig {
            template,
            server_scripts: self
                .app
                .server_scripts
                .iter()
                .map(|script| root.join(script))
                .collect::<Vec<PathBuf>>(),
            client_scripts: self.app.client_scripts.clone(),
            modules: self.app.modules.clone(),
            static_prefix: "/static/".to_string(),
        })
    }

    /// The `host:port` the server binds to.
    pub fn address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.api_prefix, "/:");
        assert_eq!(config.app.modules, ["app"]);
        assert_eq!(config.http.timeout_secs, 30);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(
            &path,
            "[server]\nport = 8080\n\n[app]\nmodules = [\"weatherApp\"]\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
        assert!(!config.server.stream_head);
        assert_eq!(config.app.modules, ["weatherApp"]);
        assert_eq!(config.app.template, "src/app.html");
        assert_eq!(config.address(), "127.0.0.1:8080");
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "[server\nport = ").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_render_config_resolves_paths() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/app.html"), "<main data-view></main>").unwrap();

        let render = Config::default().render_config(dir.path()).unwrap();
        assert_eq!(render.template, "<main data-view></main>");
        assert_eq!(render.server_scripts, [dir.path().join("src/app.lua")]);
        assert_eq!(render.static_prefix, "/static/");
    }
}
