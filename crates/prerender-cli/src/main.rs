// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use prerender_cli::commands;
use prerender_cli::config::CONFIG_FILE;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "prerender")]
#[command(author = "Maravilla Labs")]
#[command(version)]
#[command(about = "Server-side pre-rendering for single-page applications", long_about = None)]
struct Cli {
    /// Log level: error, warn, info, debug, trace
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve prerendered pages and route data
    Serve {
        /// Port to run the server on (overrides the config file)
        #[arg(short, long)]
        port: Option<u16>,
        /// Host to bind to (overrides the config file)
        #[arg(long)]
        host: Option<String>,
        /// Path to the config file
        #[arg(short, long, default_value = CONFIG_FILE)]
        config: PathBuf,
    },
    /// List the application's routes
    Routes {
        /// Path to the config file
        #[arg(short, long, default_value = CONFIG_FILE)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with the specified log level
    let filter = EnvFilter::try_new(&cli.log_level)
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .init();

    match cli.command {
        Commands::Serve { port, host, config } => {
            commands::serve::run(&config, host, port).await
        }
        Commands::Routes { config } => {
            commands::routes::run(&config).await
        }
    }
}
