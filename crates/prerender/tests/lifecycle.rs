// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! End-to-end render tests against an in-memory network backend.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use prerender::{
    Endpoint, LifecycleState, MemoryBackend, PrerenderRequest, PrerenderResponse, Prerenderer,
    RenderConfig, SERIALIZATION_FAILURE_MESSAGE,
};
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::oneshot;

const TEMPLATE: &str = "<html><body><main data-view></main></body></html>";

const APP: &str = r#"
local app = prerender.module("weatherApp", {})

app:service("weather", { "http", function(http)
    return {
        forecast = function(city) return http.get("/api/weather/" .. city) end,
    }
end })

app:route("/weather/:city", {
    templateUrl = "/views/weather.html",
    controller = "WeatherCtrl",
    resolve = {
        forecast = { "weather", "route", function(weather, route)
            return weather.forecast(route.params.city):next(function(res) return res.data end)
        end },
    },
})

app:controller("WeatherCtrl", { "scope", "forecast", function(scope, forecast)
    scope.city = forecast.city
    scope.temp = forecast.temp
end })

app:route("/failing", {
    template = "<p>never</p>",
    resolve = { data = function() return promise.reject("No such city") end },
})

app:route("/old", { redirectTo = "/weather/Berlin" })

app:route("/moving", { template = "<p>moving</p>", controller = "MovingCtrl" })

app:controller("MovingCtrl", { "location", "http", function(location, http)
    http.get("/api/slow")
    location:path("/elsewhere")
end })

app:route("/relocating", {
    template = "<p>never</p>",
    resolve = {
        moved = { "location", "http", function(location, http)
            http.get("/api/slow")
            location:path("/elsewhere")
            return true
        end },
    },
})

app:route("/streamed", { template = "<p>{{message}}</p>", controller = "SlowCtrl" })

app:controller("SlowCtrl", { "scope", "http", function(scope, http)
    http.get("/api/slow"):next(function(res) scope.message = res.body end)
end })

app:route("/late", { template = "<p>late</p>", controller = "LateCtrl" })

app:controller("LateCtrl", { "location", "http", function(location, http)
    http.get("/api/slow"):next(function() location:path("/elsewhere") end)
end })

app:route("/cyclic", {
    template = "<p>loop</p>",
    resolve = { loop = function() local t = {}; t.me = t; return t end },
})

app:route("/unbounded", {
    template = "<p>inf</p>",
    resolve = { temp = function() return math.huge end },
})
"#;

struct Fixture {
    _dir: TempDir,
    backend: Arc<MemoryBackend>,
    renderer: Prerenderer,
}

fn fixture(backend: MemoryBackend) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("app.lua");
    std::fs::write(&script, APP).unwrap();
    fixture_with_scripts(dir, vec![script], backend)
}

fn fixture_with_scripts(dir: TempDir, scripts: Vec<PathBuf>, backend: MemoryBackend) -> Fixture {
    let backend = Arc::new(backend);
    let config = RenderConfig {
        template: TEMPLATE.to_string(),
        server_scripts: scripts,
        client_scripts: vec!["app.js".to_string()],
        modules: vec!["weatherApp".to_string()],
        ..RenderConfig::default()
    };
    Fixture {
        _dir: dir,
        renderer: Prerenderer::new(config, backend.clone()),
        backend,
    }
}

fn weather_backend() -> MemoryBackend {
    MemoryBackend::new()
        .with_json(
            "http://app.test/api/weather/Berlin",
            json!({"city": "Berlin", "temp": 21}),
        )
        .with_text("http://app.test/views/weather.html", "<p>{{city}}: {{temp}}</p>")
}

fn slow_backend() -> MemoryBackend {
    MemoryBackend::new()
        .with_latency(Duration::from_millis(50))
        .with_text("http://app.test/api/slow", "done")
}

fn request(url: &str) -> PrerenderRequest {
    PrerenderRequest::new(url).with_header("host", "app.test")
}

#[tokio::test]
async fn test_weather_page_is_prerendered() {
    let fx = fixture(weather_backend());
    let response = fx.renderer.render_page(&request("/weather/Berlin")).await;

    assert_eq!(response.status(), 200, "{}", response.body_text());
    let body = response.body_text();
    assert!(body.starts_with("<script>var initialRoute = "));
    assert!(body.contains("/static/app.js"));
    assert!(body.contains("<plaintext style=\"display:none\">"));
    assert!(body.ends_with("<main data-view><p>Berlin: 21</p></main></body></html>"));
}

#[tokio::test]
async fn test_weather_data_endpoint() {
    let fx = fixture(weather_backend());
    let response = fx.renderer.render_data(&request("/weather/Berlin")).await;

    let PrerenderResponse::Json { status, body } = response else {
        panic!("expected JSON, got {response:?}");
    };
    assert_eq!(status, 200);
    let route = &body["route"];
    assert_eq!(route["originalPath"], "/weather/:city");
    assert_eq!(route["controller"], "WeatherCtrl");
    assert_eq!(route["template"], "<p>{{city}}: {{temp}}</p>");
    assert_eq!(route["locals"], json!({"forecast": {"city": "Berlin", "temp": 21}}));
    assert_eq!(route["pathParams"], json!({"city": "Berlin"}));
}

#[tokio::test]
async fn test_rejected_resolver() {
    let fx = fixture(MemoryBackend::new());

    let data = fx.renderer.render_data(&request("/failing")).await;
    assert_eq!(data, PrerenderResponse::json(200, json!({})));

    let page = fx.renderer.render_page(&request("/failing")).await;
    assert_eq!(page.status(), 500);
    assert!(page.body_text().contains("No such city"), "{}", page.body_text());
}

#[tokio::test]
async fn test_redirect_waits_for_outstanding_requests() {
    let backend = MemoryBackend::new()
        .with_latency(Duration::from_millis(50))
        .with_text("http://app.test/api/slow", "done");
    let fx = fixture(backend);

    let response = fx.renderer.render_page(&request("/moving")).await;

    assert_eq!(
        response,
        PrerenderResponse::redirect("http://app.test/elsewhere")
    );
    assert_eq!(fx.backend.started(), 1);
    assert_eq!(fx.backend.in_flight(), 0);
}

#[tokio::test]
async fn test_resolver_redirect_waits_for_outstanding_requests() {
    let fx = fixture(slow_backend());
    let mut lifecycle = fx.renderer.lifecycle();
    let response = lifecycle.run(&request("/relocating"), Endpoint::Page).await;

    assert_eq!(
        response,
        PrerenderResponse::redirect("http://app.test/elsewhere")
    );
    assert_eq!(fx.backend.started(), 1);
    assert_eq!(fx.backend.in_flight(), 0);
    assert!(!lifecycle.history().contains(&LifecycleState::AwaitingQuiescence));
    assert_eq!(lifecycle.state(), LifecycleState::RedirectRequested);
}

#[tokio::test]
async fn test_redirect_to_route() {
    let fx = fixture(weather_backend());
    let response = fx.renderer.render_page(&request("/old")).await;
    assert_eq!(
        response,
        PrerenderResponse::redirect("http://app.test/weather/Berlin")
    );
}

#[tokio::test]
async fn test_data_endpoint_answers_redirects_with_empty_object() {
    let fx = fixture(slow_backend());

    for path in ["/old", "/weather/Berlin/", "/relocating"] {
        let mut lifecycle = fx.renderer.lifecycle();
        let response = lifecycle.run(&request(path), Endpoint::Data).await;
        assert_eq!(response, PrerenderResponse::json(200, json!({})), "{path}");
        assert_eq!(lifecycle.state(), LifecycleState::RedirectRequested, "{path}");
    }
    assert_eq!(fx.backend.started(), 1);
    assert_eq!(fx.backend.in_flight(), 0);
}

#[tokio::test]
async fn test_cyclic_route_data() {
    let fx = fixture(MemoryBackend::new());

    for response in [
        fx.renderer.render_page(&request("/cyclic")).await,
        fx.renderer.render_data(&request("/cyclic")).await,
    ] {
        assert_eq!(response.status(), 500);
        assert_eq!(response.body_text(), SERIALIZATION_FAILURE_MESSAGE);
    }
}

#[tokio::test]
async fn test_non_finite_route_data() {
    let fx = fixture(MemoryBackend::new());

    for response in [
        fx.renderer.render_page(&request("/unbounded")).await,
        fx.renderer.render_data(&request("/unbounded")).await,
    ] {
        assert_eq!(response.status(), 500);
        assert_eq!(response.body_text(), SERIALIZATION_FAILURE_MESSAGE);
    }
}

#[tokio::test]
async fn test_head_is_sent_before_the_page_settles() {
    let fx = fixture(slow_backend());
    let (sink, mut head) = oneshot::channel();
    let mut lifecycle = fx.renderer.lifecycle().with_head_sink(sink);

    let (head, response) = {
        let req = request("/streamed");
        let render = lifecycle.run(&req, Endpoint::Page);
        tokio::pin!(render);
        let head = tokio::select! {
            head = &mut head => head.unwrap(),
            _ = &mut render => panic!("page settled before the head was sent"),
        };
        (head, render.await)
    };

    assert!(head.starts_with("<script>var initialRoute = "));
    assert!(lifecycle.head_sent());
    assert_eq!(response.status(), 200);
    let tail = response.body_text();
    assert!(tail.starts_with("<script>document.write('<plaintext"), "{tail}");
    assert!(tail.ends_with("<main data-view><p>done</p></main></body></html>"), "{tail}");
    assert_eq!(lifecycle.state(), LifecycleState::Responded);
}

#[tokio::test]
async fn test_redirect_after_head_navigates_on_the_client() {
    let fx = fixture(slow_backend());
    let (sink, head) = oneshot::channel();
    let mut lifecycle = fx.renderer.lifecycle().with_head_sink(sink);

    let response = lifecycle.run(&request("/late"), Endpoint::Page).await;

    assert!(head.await.unwrap().starts_with("<script>var initialRoute = "));
    assert_eq!(
        response,
        PrerenderResponse::html(
            200,
            "<script>window.location.replace(\"http://app.test/elsewhere\");</script>\n"
        )
    );
    assert_eq!(fx.backend.in_flight(), 0);
    assert_eq!(lifecycle.state(), LifecycleState::RedirectRequested);
}

#[tokio::test]
async fn test_head_is_withheld_when_the_controller_redirects() {
    let fx = fixture(slow_backend());
    let (sink, head) = oneshot::channel();
    let mut lifecycle = fx.renderer.lifecycle().with_head_sink(sink);

    let response = lifecycle.run(&request("/moving"), Endpoint::Page).await;

    assert_eq!(
        response,
        PrerenderResponse::redirect("http://app.test/elsewhere")
    );
    assert!(!lifecycle.head_sent());
    assert!(head.await.is_err());
}

#[tokio::test]
async fn test_unknown_path() {
    let fx = fixture(MemoryBackend::new());

    assert_eq!(
        fx.renderer.render_page(&request("/nowhere")).await,
        PrerenderResponse::not_found()
    );
    assert_eq!(
        fx.renderer.render_data(&request("/nowhere")).await,
        PrerenderResponse::json(200, json!({}))
    );
}

#[tokio::test]
async fn test_script_load_failure() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.lua");
    let fx = fixture_with_scripts(dir, vec![missing], MemoryBackend::new());

    let mut lifecycle = fx.renderer.lifecycle();
    let response = lifecycle
        .run(&request("/weather/Berlin"), Endpoint::Page)
        .await;

    assert_eq!(response.status(), 500);
    assert!(response.body_text().contains("missing.lua"));
    assert_eq!(lifecycle.state(), LifecycleState::ScriptLoadFailed);
}

#[tokio::test]
async fn test_lifecycle_history() {
    let fx = fixture(weather_backend());
    let mut lifecycle = fx.renderer.lifecycle();
    lifecycle
        .run(&request("/weather/Berlin"), Endpoint::Page)
        .await;

    assert_eq!(
        lifecycle.history(),
        [
            LifecycleState::Created,
            LifecycleState::ScriptsLoading,
            LifecycleState::Bootstrapped,
            LifecycleState::RouteMatching,
            LifecycleState::Resolving,
            LifecycleState::AwaitingQuiescence,
            LifecycleState::Snapshotting,
            LifecycleState::Responded,
        ]
    );
    assert!(lifecycle.state().is_terminal());
}

#[tokio::test]
async fn test_contexts_do_not_share_state() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("counter.lua");
    std::fs::write(
        &script,
        r#"
        counter = (counter or 0) + 1
        prerender.module("weatherApp", {}):route("/", {
            resolve = { count = function() return counter end },
        })
        "#,
    )
    .unwrap();
    let fx = fixture_with_scripts(dir, vec![script], MemoryBackend::new());

    for _ in 0..2 {
        let PrerenderResponse::Json { body, .. } = fx.renderer.render_data(&request("/")).await else {
            panic!("expected JSON");
        };
        assert_eq!(body["route"]["locals"]["count"], 1);
    }
}

#[tokio::test]
async fn test_run_in_context_lists_routes() {
    let fx = fixture(MemoryBackend::new());
    let patterns = fx
        .renderer
        .run_in_context(None, |_, app| {
            Box::pin(async move {
                Ok(app
                    .routes
                    .routes()
                    .map(|(pattern, _)| pattern.to_string())
                    .collect::<Vec<_>>())
            })
        })
        .await
        .unwrap();
    assert!(patterns.contains(&"/weather/:city".to_string()));
}
