// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! JSON module registration for Lua.
//!
//! Provides `json.encode`, `json.decode`, `json.encode_pretty`, and `json.null`.

use mlua::{Lua, LuaSerdeExt, Result as LuaResult, Table, Value};

fn to_json(lua: &Lua, value: Value) -> LuaResult<serde_json::Value> {
    lua.from_value(value)
        .map_err(|err| mlua::Error::external(format!("JSON encode error: {err}")))
}

/// Register the json module as a global on the given Lua instance.
///
/// This makes `json.encode()`, `json.decode()`, `json.encode_pretty()`,
/// and `json.null` available in Lua code, and `require("json")` return
/// the same table.
pub fn register_json_module(lua: &Lua) -> LuaResult<()> {
    let json_module = lua.create_table()?;

    json_module.set(
        "encode",
        lua.create_function(|lua, value: Value| Ok(to_json(lua, value)?.to_string()))?,
    )?;

    json_module.set(
        "encode_pretty",
        lua.create_function(|lua, value: Value| {
            serde_json::to_string_pretty(&to_json(lua, value)?)
                .map_err(|err| mlua::Error::external(format!("JSON encode error: {err}")))
        })?,
    )?;

    json_module.set(
        "decode",
        lua.create_function(|lua, json_str: String| {
            match serde_json::from_str::<serde_json::Value>(&json_str) {
                Ok(json_value) => lua.to_value(&json_value),
                Err(err) => Err(mlua::Error::external(format!("JSON decode error: {err}"))),
            }
        })?,
    )?;

    // Lua has no null; serde maps this sentinel to JSON null both ways.
    json_module.set("null", lua.null())?;

    let globals = lua.globals();
    globals.set("json", json_module.clone())?;

    let package: Table = globals.get("package")?;
    let preload: Table = package.get("preload")?;
    preload.set(
        "json",
        lua.create_function(move |_, ()| Ok(json_module.clone()))?,
    )?;

    Ok(())
}
