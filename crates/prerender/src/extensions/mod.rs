// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

/// HTTP client module for Lua.
pub mod http;
/// JSON module for Lua.
pub mod json;

pub use http::{register_http_module, HttpClient};
pub use json::register_json_module;
