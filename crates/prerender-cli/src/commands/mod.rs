// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! CLI command implementations.
//!
//! - `serve`: Serve prerendered pages and route data
//! - `routes`: List the application's route table

/// Route listing command.
pub mod routes;
/// Server command.
pub mod serve;
