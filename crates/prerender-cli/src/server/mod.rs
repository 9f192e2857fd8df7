// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! HTTP server components.

/// HTTP server implementation using Axum.
pub mod http;

pub use http::{build_router, create_server, to_axum_response, AppState};
