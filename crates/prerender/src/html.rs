// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Markup helpers for the prerendered page.
//!
//! A page response is the head (route data plus the client bootstrap)
//! followed by the tail (a shim that hides everything after it, then the
//! script-free snapshot).

use std::sync::OnceLock;

use regex::Regex;
use url::Url;

/// Escapes text for an HTML text node.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escapes text for a double-quoted attribute value.
pub fn escape_attribute(s: &str) -> String {
    escape_html(s)
}

/// Makes a JSON text safe to embed in an inline `<script>`.
pub fn script_safe_json(json: &str) -> String {
    json.replace('<', "\\u003c")
        .replace('>', "\\u003e")
        .replace('&', "\\u0026")
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
}

fn script_regex() -> &'static Regex {
    static SCRIPT: OnceLock<Regex> = OnceLock::new();
    SCRIPT.get_or_init(|| {
        Regex::new(r"(?is)<script\b[^>]*/>|<script\b[^>]*>.*?</script\s*>").expect("script pattern is valid")
    })
}

/// Removes every script element from `html`.
pub fn strip_scripts(html: &str) -> String {
    script_regex().replace_all(html, "").into_owned()
}

/// Resolves a client script URL against the static prefix.
///
/// Scripts on the same origin come back as a path; others keep their
/// absolute form.
pub fn resolve_script_url(static_prefix: &str, src: &str) -> String {
    const ORIGIN: &str = "http://prerender.invalid";
    let Ok(origin) = Url::parse(ORIGIN) else {
        return src.to_string();
    };
    let Ok(base) = origin.join(static_prefix) else {
        return src.to_string();
    };
    match base.join(src) {
        Ok(url) if url.origin() == origin.origin() => {
            let mut out = url.path().to_string();
            if let Some(query) = url.query() {
                out.push('?');
                out.push_str(query);
            }
            out
        }
        Ok(url) => url.to_string(),
        Err(_) => src.to_string(),
    }
}

/// Builds the head: route data and the client bootstrap.
///
/// The bootstrap writes the base template and one script tag per client
/// script, so the client starts exactly as it would without prerendering.
pub fn page_head(route_json: &str, template: &str, client_scripts: &[String], static_prefix: &str) -> String {
    let mut bootstrap = String::from(template);
    for src in client_scripts {
        bootstrap.push_str(&format!(
            "<script src=\"{}\"></script>",
            escape_attribute(&resolve_script_url(static_prefix, src))
        ));
    }
    let bootstrap = serde_json::Value::String(bootstrap).to_string();

    format!(
        "<script>var initialRoute = {};</script>\n<script>document.write({});</script>\n",
        script_safe_json(route_json),
        script_safe_json(&bootstrap)
    )
}

/// Builds the tail: the hide shim followed by the inert snapshot.
pub fn page_tail(rendered: &str) -> String {
    format!(
        "<script>document.write('<plaintext style=\"display:none\">');</script>\n{}",
        strip_scripts(rendered)
    )
}

/// Client-side navigation for a redirect that arrives after the head was
/// already sent.
pub fn redirect_script(location: &str) -> String {
    let target = serde_json::Value::String(location.to_string()).to_string();
    format!("<script>window.location.replace({});</script>\n", script_safe_json(&target))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_scripts() {
        let html = r#"<p>a</p><script>alert("x")</script><SCRIPT type="x">
            more</SCRIPT ><script src="a.js"/><p>b</p>"#;
        assert_eq!(strip_scripts(html), "<p>a</p><p>b</p>");
    }

    #[test]
    fn test_script_url_resolution() {
        assert_eq!(resolve_script_url("/static/", "app.js"), "/static/app.js");
        assert_eq!(resolve_script_url("/static/", "/lib/x.js"), "/lib/x.js");
        assert_eq!(
            resolve_script_url("/static/", "https://cdn.test/lib.js"),
            "https://cdn.test/lib.js"
        );
    }

    #[test]
    fn test_head_is_script_safe() {
        let head = page_head(
            r#"{"template":"</script><b>"}"#,
            "<html><body><div data-view></div></body></html>",
            &["app.js".to_string()],
            "/static/",
        );
        assert!(head.starts_with("<script>var initialRoute = "));
        // Only our own script tags may close in the head.
        assert_eq!(head.matches("</script>").count(), 2);
        assert!(head.contains("\\u003cscript src=\\\"/static/app.js\\\"\\u003e"));
    }

    #[test]
    fn test_tail_hides_snapshot() {
        let tail = page_tail("<div>hi<script>x()</script></div>");
        assert!(tail.starts_with("<script>document.write('<plaintext"));
        assert!(tail.ends_with("<div>hi</div>"));
    }

    #[test]
    fn test_redirect_script() {
        assert_eq!(
            redirect_script("http://app.test/a?b=<c>"),
            "<script>window.location.replace(\"http://app.test/a?b=\\u003cc\\u003e\");</script>\n"
        );
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html(r#"<a href="x">&'"#), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
    }
}
