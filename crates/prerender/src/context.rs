// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Isolated per-request execution contexts.
//!
//! Every request gets a fresh, sandboxed Lua state with the application
//! scripts loaded into it. Nothing a script does can leak into another
//! request's context, and disposing a context cancels whatever it still has
//! in flight.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use mlua::{Lua, Table, Value};
use tracing::{debug, trace};

use crate::backend::HttpBackend;
use crate::error::{PrerenderError, Result};
use crate::extensions::{register_http_module, register_json_module, HttpClient};
use crate::location::{LocationHandle, RequestContext};
use crate::module::{Application, ModuleRegistry};
use crate::pending::PendingRequests;
use crate::promise::register_promise_module;
use crate::request::PrerenderRequest;

/// Name of the module holding the server-side service overrides.
pub const SERVER_MODULE: &str = "prerender";

type DisposeHook = Box<dyn FnOnce() + Send + 'static>;

/// One isolated sandbox plus the state that belongs to it.
pub struct ExecutionContext {
    lua: Lua,
    pending: PendingRequests,
    request: RequestContext,
    http: HttpClient,
    modules: ModuleRegistry,
    dispose_hooks: Mutex<Vec<DisposeHook>>,
    disposed: AtomicBool,
}

impl ExecutionContext {
    /// Creates a fresh sandbox whose outbound calls go to `backend`.
    pub fn new(backend: Arc<dyn HttpBackend>) -> Result<Self> {
        let lua = Lua::new();
        sandbox_lua(&lua, &lua.globals())?;

        let pending = PendingRequests::new();
        let request = RequestContext::new();
        let http = HttpClient::new(backend, pending.clone(), request.clone());
        lua.set_app_data(pending.clone());
        lua.set_app_data(http.clone());

        register_json_module(&lua)?;
        register_promise_module(&lua)?;
        register_http_module(&lua)?;

        let modules = ModuleRegistry::new();
        modules.install(&lua)?;

        trace!("Created execution context");
        Ok(Self {
            lua,
            pending,
            request,
            http,
            modules,
            dispose_hooks: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        })
    }

    /// The sandbox.
    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    /// Outstanding-work tracker.
    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    /// Request state and current location.
    pub fn request(&self) -> &RequestContext {
        &self.request
    }

    /// Tracked network client.
    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// Declared modules.
    pub fn modules(&self) -> &ModuleRegistry {
        &self.modules
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(PrerenderError::Disposed);
        }
        Ok(())
    }

    /// Runs one script. Top-level code may `await`.
    pub async fn exec(&self, name: &str, source: &str) -> Result<()> {
        self.ensure_live()?;
        self.lua.load(source).set_name(name).exec_async().await?;
        Ok(())
    }

    /// Loads application scripts in order. The first failure stops loading.
    pub async fn load_scripts<P: AsRef<Path>>(&self, paths: &[P]) -> Result<()> {
        for path in paths {
            let path = path.as_ref();
            let label = path.display().to_string();
            let loaded = match tokio::fs::read_to_string(path).await {
                Ok(source) => self.exec(&format!("@{label}"), &source).await,
                Err(err) => Err(err.into()),
            };
            loaded.map_err(|source| PrerenderError::ScriptLoad {
                path: label.clone(),
                source: Box::new(source),
            })?;
            debug!(script = %label, "Loaded script");
        }
        Ok(())
    }

    /// Declares the module that provides `location` and `http` on the server.
    pub fn register_server_module(&self) -> Result<()> {
        self.ensure_live()?;
        let handle = self.modules.define(SERVER_MODULE, Vec::new());
        let location = self.lua.create_userdata(LocationHandle(self.request.clone()))?;
        handle.add_value("location", Value::UserData(location));
        handle.add_value("http", self.lua.globals().get::<Value>("http")?);
        Ok(())
    }

    /// Binds the request this context renders.
    ///
    /// When the server module is declared, the request is also exposed to
    /// it as the `request` injectable.
    pub fn attach_request(&self, request: &PrerenderRequest) -> Result<()> {
        self.ensure_live()?;
        self.request.set_request(request)?;
        if let Some(handle) = self.modules.get(SERVER_MODULE) {
            handle.add_value("request", self.request_table(request)?);
        }
        Ok(())
    }

    fn request_table(&self, request: &PrerenderRequest) -> Result<Value> {
        let table = self.lua.create_table()?;
        table.set("url", request.url.as_str())?;
        table.set("method", request.method.as_str())?;
        table.set("path", request.path())?;
        let headers = self.lua.create_table()?;
        for (name, value) in &request.headers {
            headers.set(name.as_str(), value.as_str())?;
        }
        table.set("headers", headers)?;
        Ok(Value::Table(table))
    }

    /// Activates `modules` followed by the server module when declared.
    pub fn bootstrap(&self, modules: &[String]) -> Result<Application> {
        self.ensure_live()?;
        let mut names = modules.to_vec();
        if self.modules.get(SERVER_MODULE).is_some() && !names.iter().any(|n| n == SERVER_MODULE) {
            names.push(SERVER_MODULE.to_string());
        }
        self.modules.activate(&names)
    }

    /// A new, empty scope table for controllers.
    pub fn new_scope(&self) -> Result<Table> {
        Ok(self.lua.create_table()?)
    }

    /// Registers work to run when the context is disposed.
    pub fn on_dispose(&self, hook: impl FnOnce() + Send + 'static) {
        if self.is_disposed() {
            hook();
            return;
        }
        self.dispose_hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(hook));
    }

    /// Whether [`dispose`](Self::dispose) has run.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Cancels in-flight work and runs dispose hooks. Runs at most once.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.pending.abort_all();
        let hooks = std::mem::take(
            &mut *self
                .dispose_hooks
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for hook in hooks {
            hook();
        }
        debug!("Disposed execution context");
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("pending", &self.pending)
            .field("has_request", &self.request.has_request())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Restricts the global environment available to application scripts.
fn sandbox_lua(lua: &Lua, globals: &Table) -> Result<()> {
    // Save safe os functions before removing the library
    let os_table: Table = globals.get("os")?;
    let safe_os = lua.create_table()?;
    for name in ["date", "time", "clock", "difftime"] {
        safe_os.set(name, os_table.get::<mlua::Function>(name)?)?;
    }

    // Disable dangerous libraries
    globals.set("io", Value::Nil)?;
    globals.set("debug", Value::Nil)?;

    // Disable dangerous functions
    for name in ["load", "loadstring", "loadfile", "dofile"] {
        globals.set(name, Value::Nil)?;
    }
    globals.set("os", safe_os)?;

    // `require` only reaches preloaded modules
    let package: Table = globals.get("package")?;
    package.set("path", "")?;
    package.set("cpath", "")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use std::sync::atomic::AtomicUsize;

    fn context() -> ExecutionContext {
        ExecutionContext::new(Arc::new(MemoryBackend::new())).unwrap()
    }

    #[tokio::test]
    async fn test_sandbox_hides_dangerous_globals() {
        let ctx = context();
        let hidden: bool = ctx
            .lua()
            .load("return io == nil and load == nil and os.execute == nil and type(os.time) == 'function'")
            .eval()
            .unwrap();
        assert!(hidden);
    }

    #[tokio::test]
    async fn test_contexts_are_isolated() {
        let a = context();
        let b = context();
        a.exec("a", "shared = 1").await.unwrap();
        let seen: Value = b.lua().globals().get("shared").unwrap();
        assert!(seen.is_nil());
    }

    #[tokio::test]
    async fn test_script_load_failure_names_script() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.lua");
        let bad = dir.path().join("bad.lua");
        std::fs::write(&good, "loaded_good = true").unwrap();
        std::fs::write(&bad, "error('boom')").unwrap();

        let ctx = context();
        let err = ctx.load_scripts(&[&good, &bad]).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("bad.lua"), "{message}");
        assert!(message.contains("boom"), "{message}");
        assert!(ctx.lua().globals().get::<bool>("loaded_good").unwrap());
    }

    #[tokio::test]
    async fn test_missing_script_is_load_failure() {
        let ctx = context();
        let err = ctx.load_scripts(&["/nonexistent/app.lua"]).await.unwrap_err();
        assert!(matches!(err, PrerenderError::ScriptLoad { .. }));
    }

    #[tokio::test]
    async fn test_server_module_overrides_location() {
        let ctx = context();
        ctx.exec(
            "app",
            r#"prerender.module("app", {}):value("location", "client-side")"#,
        )
        .await
        .unwrap();
        ctx.register_server_module().unwrap();
        ctx.attach_request(&PrerenderRequest::new("/x")).unwrap();
        let app = ctx.bootstrap(&["app".to_string()]).unwrap();
        let location = app.injector.get("location").unwrap();
        assert!(matches!(location, Value::UserData(_)));
        assert_eq!(app.modules(), ["app".to_string(), SERVER_MODULE.to_string()]);
    }

    #[tokio::test]
    async fn test_request_injectable() {
        let ctx = context();
        ctx.register_server_module().unwrap();
        ctx.attach_request(&PrerenderRequest::new("/a?b=1").with_header("X-Trace", "t1"))
            .unwrap();
        let app = ctx.bootstrap(&[]).unwrap();
        let Value::Table(request) = app.injector.get("request").unwrap() else {
            panic!("request is not a table");
        };
        assert_eq!(request.get::<String>("path").unwrap(), "/a");
        let headers: Table = request.get("headers").unwrap();
        assert_eq!(headers.get::<String>("x-trace").unwrap(), "t1");
    }

    #[tokio::test]
    async fn test_dispose_runs_hooks_once() {
        let ctx = context();
        let count = Arc::new(AtomicUsize::new(0));
        let hook_count = count.clone();
        ctx.on_dispose(move || {
            hook_count.fetch_add(1, Ordering::SeqCst);
        });
        ctx.dispose();
        ctx.dispose();
        drop(ctx);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_use_after_dispose_fails() {
        let ctx = context();
        ctx.dispose();
        assert!(ctx.pending().is_aborted());
        let err = ctx.exec("late", "x = 1").await.unwrap_err();
        assert!(matches!(err, PrerenderError::Disposed));
    }
}
