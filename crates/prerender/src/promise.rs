// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Deferred values visible to application scripts.
//!
//! A [`Promise`] is an eagerly started, shareable future that settles to a Lua
//! value or a [`Rejection`]. Work behind a promise is always spawned through
//! the context's [`PendingRequests`], so continuations count toward
//! quiescence exactly like network calls do.
//!
//! Scripts see three globals:
//!
//! ```lua
//! local p = http.get("/api/weather")          -- returns a promise
//! local q = p:next(function(res) return res.data end)
//! local data = await(q)                        -- suspends the coroutine
//! local r = promise.resolve(42)
//! ```

use std::future::Future;

use futures_util::future::{self, BoxFuture, FutureExt, Shared};
use mlua::{AnyUserData, Function, Lua, MultiValue, Result as LuaResult, UserData, UserDataMethods, Value};
use thiserror::Error;

use crate::pending::PendingRequests;

/// Why a promise did not produce a value.
#[derive(Debug, Clone, Error)]
pub enum Rejection {
    /// Rejected with a message, from a script or a failed request.
    #[error("{0}")]
    Failed(String),
    /// The owning context was disposed before the work finished.
    #[error("Request aborted")]
    Aborted,
    /// A Lua error escaped a continuation.
    #[error(transparent)]
    Lua(#[from] mlua::Error),
}

impl Rejection {
    /// Converts into an error that can be raised inside the sandbox.
    pub fn into_lua_error(self) -> mlua::Error {
        match self {
            Rejection::Lua(err) => err,
            other => mlua::Error::external(other),
        }
    }
}

/// Result a promise settles to.
pub type Settlement = Result<Value, Rejection>;

/// A cloneable handle to a settlement that may not have happened yet.
#[derive(Clone)]
pub struct Promise {
    shared: Shared<BoxFuture<'static, Settlement>>,
}

impl Promise {
    /// Starts `work` immediately on the runtime, tracked by `pending`.
    pub fn spawn<F>(pending: &PendingRequests, work: F) -> Self
    where
        F: Future<Output = Settlement> + Send + 'static,
    {
        let task = tokio::spawn(pending.track(work));
        let settled = async move {
            match task.await {
                Ok(Some(settlement)) => settlement,
                Ok(None) => Err(Rejection::Aborted),
                Err(join_error) => Err(Rejection::Failed(join_error.to_string())),
            }
        };
        Self {
            shared: settled.boxed().shared(),
        }
    }

    /// An already fulfilled promise.
    pub fn resolved(value: Value) -> Self {
        Self {
            shared: future::ready(Ok(value)).boxed().shared(),
        }
    }

    /// An already rejected promise.
    pub fn rejected(reason: Rejection) -> Self {
        Self {
            shared: future::ready(Err(reason)).boxed().shared(),
        }
    }

    /// Waits for the settlement. Every clone observes the same outcome.
    pub async fn settle(&self) -> Settlement {
        self.shared.clone().await
    }

    /// Chains continuations, like `then` in other promise libraries.
    ///
    /// The continuation itself is tracked work, so quiescence is not reached
    /// until it has run. A continuation returning another promise is followed.
    pub fn next(
        &self,
        pending: &PendingRequests,
        on_fulfilled: Option<Function>,
        on_rejected: Option<Function>,
    ) -> Promise {
        let source = self.clone();
        Promise::spawn(pending, async move {
            match source.settle().await {
                Ok(value) => match on_fulfilled {
                    Some(callback) => run_continuation(callback, value).await,
                    None => Ok(value),
                },
                Err(Rejection::Aborted) => Err(Rejection::Aborted),
                Err(reason) => match on_rejected {
                    Some(callback) => run_continuation(callback, reason.to_string()).await,
                    None => Err(reason),
                },
            }
        })
    }
}

impl std::fmt::Debug for Promise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.shared.peek() {
            None => "pending",
            Some(Ok(_)) => "fulfilled",
            Some(Err(_)) => "rejected",
        };
        f.debug_struct("Promise").field("state", &state).finish()
    }
}

async fn run_continuation(callback: Function, argument: impl mlua::IntoLuaMulti) -> Settlement {
    let value: Value = callback.call_async(argument).await?;
    follow(value).await
}

/// Settles `value` if it is a promise, otherwise returns it unchanged.
pub async fn follow(value: Value) -> Settlement {
    match as_promise(&value) {
        Some(promise) => promise.settle().await,
        None => Ok(value),
    }
}

/// Extracts a [`Promise`] from a Lua value, if it holds one.
pub fn as_promise(value: &Value) -> Option<Promise> {
    match value {
        Value::UserData(ud) => promise_of(ud),
        _ => None,
    }
}

fn promise_of(ud: &AnyUserData) -> Option<Promise> {
    ud.borrow::<Promise>().ok().map(|p| Promise::clone(&p))
}

pub(crate) fn pending_of(lua: &Lua) -> LuaResult<PendingRequests> {
    lua.app_data_ref::<PendingRequests>()
        .map(|pending| pending.clone())
        .ok_or_else(|| mlua::Error::RuntimeError("request tracking is not installed".into()))
}

impl UserData for Promise {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method(
            "next",
            |lua, this, (on_fulfilled, on_rejected): (Option<Function>, Option<Function>)| {
                let pending = pending_of(lua)?;
                Ok(this.next(&pending, on_fulfilled, on_rejected))
            },
        );

        methods.add_method("catch", |lua, this, on_rejected: Function| {
            let pending = pending_of(lua)?;
            Ok(this.next(&pending, None, Some(on_rejected)))
        });

        methods.add_meta_method(mlua::MetaMethod::ToString, |_, this, ()| {
            Ok(format!("{this:?}"))
        });
    }
}

/// Installs `await` and the `promise` table.
///
/// The context's [`PendingRequests`] must already be stored as app data.
pub fn register_promise_module(lua: &Lua) -> LuaResult<()> {
    let globals = lua.globals();

    let await_fn = lua.create_async_function(|_, value: Value| async move {
        follow(value).await.map_err(Rejection::into_lua_error)
    })?;
    globals.set("await", await_fn)?;

    let module = lua.create_table()?;
    module.set(
        "resolve",
        lua.create_function(|_, value: Value| {
            Ok(as_promise(&value).unwrap_or_else(|| Promise::resolved(value)))
        })?,
    )?;
    module.set(
        "reject",
        lua.create_function(|_, reason: Value| {
            let message = match reason {
                Value::String(s) => s.to_string_lossy().to_string(),
                Value::Error(err) => err.to_string(),
                other => format!("{other:?}"),
            };
            Ok(Promise::rejected(Rejection::Failed(message)))
        })?,
    )?;
    module.set(
        "all",
        lua.create_function(|lua, items: mlua::Table| {
            let pending = pending_of(lua)?;
            let values: Vec<Value> = items.sequence_values::<Value>().collect::<LuaResult<_>>()?;
            let lua = lua.clone();
            Ok(Promise::spawn(&pending, async move {
                let settled = future::try_join_all(values.into_iter().map(follow)).await?;
                let list = lua.create_sequence_from(settled)?;
                Ok(Value::Table(list))
            }))
        })?,
    )?;
    module.set(
        "is_promise",
        lua.create_function(|_, args: MultiValue| {
            Ok(args.into_iter().next().and_then(|v| as_promise(&v)).is_some())
        })?,
    )?;
    globals.set("promise", module)?;

    Ok(())
}
