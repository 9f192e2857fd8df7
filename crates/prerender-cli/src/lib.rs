// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

// Warn on missing documentation for public items
#![warn(missing_docs)]

//! Prerender CLI library.
//!
//! This crate provides the command-line interface and HTTP server for the
//! prerender library.
//!
//! # Usage
//!
//! This crate is primarily used through the `prerender` binary:
//!
//! ```bash
//! prerender serve     # Serve pages, route data and static files
//! prerender routes    # List the application's route table
//! ```
//!
//! # Configuration
//!
//! Projects are configured via `prerender.toml` at the project root.

/// Production network backend.
pub mod backend;
/// CLI commands (serve, routes).
pub mod commands;
/// Project configuration from `prerender.toml`.
pub mod config;
/// HTTP server.
pub mod server;
