// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Deep promise flattening for resolver results.

use std::collections::HashSet;

use futures_util::future::{BoxFuture, FutureExt};
use futures_util::stream::{FuturesUnordered, StreamExt};
use mlua::{Table, Value};

use crate::promise::{as_promise, Rejection};

type Settled = Result<(Table, Value, Value), Rejection>;

/// Replaces every promise reachable from `root` with its settled value, in place.
///
/// Promises may sit directly in `root`, inside plain nested tables, or inside
/// the value another promise settled to. All of them settle concurrently and
/// the first rejection wins; nothing is written for entries that settle after
/// it. Shared and cyclic tables are visited once.
pub async fn flatten(root: &Table) -> Result<(), Rejection> {
    let mut waiting: FuturesUnordered<BoxFuture<'static, Settled>> = FuturesUnordered::new();
    let mut visited = HashSet::new();

    enqueue(root, &mut waiting, &mut visited)?;

    while let Some(settled) = waiting.next().await {
        let (parent, key, value) = settled?;
        parent.raw_set(key, value.clone())?;
        if let Value::Table(child) = &value {
            enqueue(child, &mut waiting, &mut visited)?;
        }
    }
    Ok(())
}

fn enqueue(
    table: &Table,
    waiting: &mut FuturesUnordered<BoxFuture<'static, Settled>>,
    visited: &mut HashSet<usize>,
) -> mlua::Result<()> {
    if !visited.insert(table.to_pointer() as usize) {
        return Ok(());
    }
    let mut nested = Vec::new();
    for pair in table.clone().pairs::<Value, Value>() {
        let (key, value) = pair?;
        if let Some(promise) = as_promise(&value) {
            let parent = table.clone();
            waiting.push(
                async move {
                    let value = promise.settle().await?;
                    Ok((parent, key, value))
                }
                .boxed(),
            );
        } else if let Value::Table(child) = value {
            nested.push(child);
        }
    }
    for child in nested {
        enqueue(&child, waiting, visited)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pending::PendingRequests;
    use crate::promise::{register_promise_module, Promise};
    use mlua::Lua;
    use std::time::Duration;

    fn sandbox() -> (Lua, PendingRequests) {
        let lua = Lua::new();
        let pending = PendingRequests::new();
        lua.set_app_data(pending.clone());
        register_promise_module(&lua).unwrap();
        (lua, pending)
    }

    fn delayed(pending: &PendingRequests, millis: u64, value: Value) -> Promise {
        Promise::spawn(pending, async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok(value)
        })
    }

    #[tokio::test]
    async fn test_empty_table_completes() {
        let (lua, _) = sandbox();
        let table = lua.create_table().unwrap();
        flatten(&table).await.unwrap();
        assert_eq!(table.raw_len(), 0);
    }

    #[tokio::test]
    async fn test_nested_promises_resolved_in_place() {
        let (lua, pending) = sandbox();
        let inner = lua.create_table().unwrap();
        inner
            .set("deep", delayed(&pending, 3, Value::Integer(3)))
            .unwrap();
        let root = lua.create_table().unwrap();
        root.set("a", delayed(&pending, 5, Value::Integer(1))).unwrap();
        root.set("b", delayed(&pending, 1, Value::Table(inner))).unwrap();
        root.set("c", "plain").unwrap();

        flatten(&root).await.unwrap();

        assert_eq!(root.get::<i64>("a").unwrap(), 1);
        let b: Table = root.get("b").unwrap();
        assert_eq!(b.get::<i64>("deep").unwrap(), 3);
        assert_eq!(root.get::<String>("c").unwrap(), "plain");
    }

    #[tokio::test]
    async fn test_first_rejection_wins() {
        let (lua, pending) = sandbox();
        let root = lua.create_table().unwrap();
        root.set("slow", delayed(&pending, 50, Value::Integer(1))).unwrap();
        root.set(
            "bad",
            Promise::rejected(Rejection::Failed("No such city".into())),
        )
        .unwrap();

        let err = flatten(&root).await.unwrap_err();
        assert_eq!(err.to_string(), "No such city");

        // The slow entry settles later but is never written back.
        pending.idle().await;
        let slow: Value = root.get("slow").unwrap();
        assert!(as_promise(&slow).is_some(), "slow was replaced by {slow:?}");
    }

    #[tokio::test]
    async fn test_cycles_terminate() {
        let (lua, pending) = sandbox();
        let root: Table = lua
            .load("local t = { name = 'loop' }; t.self = t; return t")
            .eval()
            .unwrap();
        root.set("later", delayed(&pending, 1, Value::Table(root.clone())))
            .unwrap();

        flatten(&root).await.unwrap();
        let later: Table = root.get("later").unwrap();
        assert_eq!(later.get::<String>("name").unwrap(), "loop");
    }
}
