//! External-module resolution and fetching.
//!
//! A specifier is either a locator (URL or path), a known short alias, or a
//! bare package name that falls back to the `@latest` convention under the
//! distribution CDN. Fetching goes through the [`ModuleFetcher`] trait so
//! tests and embedders can substitute sources without touching the network.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use anyhow::Context;

/// Public package CDN every bare name resolves under.
pub const CDN_BASE: &str = "https://cdn.jsdelivr.net/npm";

/// The exhaustive alias table: short name → versioned distribution path.
const ALIASES: &[(&str, &str)] = &[
    ("lodash", "lodash@4.17.21/lodash.min.js"),
    ("dayjs", "dayjs@1.11.10/dayjs.min.js"),
    ("rxjs", "rxjs@7/dist/bundles/rxjs.umd.min.js"),
    ("ramda", "ramda@0.29.1/dist/ramda.min.js"),
    ("underscore", "underscore@1.13.6/underscore-min.js"),
    ("decimal.js", "decimal.js@10.4.3/decimal.min.js"),
    ("papaparse", "papaparse@5.4.1/papaparse.min.js"),
];

/// Resolve a specifier against the default CDN base.
pub fn resolve(spec: &str) -> String {
    resolve_with_base(spec, CDN_BASE)
}

/// Resolve a specifier to a locator.
///
/// Absolute network locators and relative/root-relative paths pass through
/// unchanged; known aliases get their pinned versioned path; any other bare
/// name maps to `<base>/<name>@latest`.
pub fn resolve_with_base(spec: &str, base: &str) -> String {
    if spec.starts_with("http://")
        || spec.starts_with("https://")
        || spec.starts_with('/')
        || spec.starts_with("./")
        || spec.starts_with("../")
    {
        return spec.to_string();
    }
    for (alias, path) in ALIASES {
        if spec == *alias {
            return format!("{}/{}", base, path);
        }
    }
    format!("{}/{}@latest", base, spec)
}

type FetchFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>>;

/// Source of module text for a resolved locator.
pub trait ModuleFetcher: Send + Sync {
    fn fetch<'a>(&'a self, url: &'a str) -> FetchFuture<'a>;
}

/// Fetches module source over HTTP.
#[derive(Debug, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ModuleFetcher for HttpFetcher {
    fn fetch<'a>(&'a self, url: &'a str) -> FetchFuture<'a> {
        Box::pin(async move {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .with_context(|| format!("request to {} failed", url))?;
            let response = response
                .error_for_status()
                .with_context(|| format!("{} returned an error status", url))?;
            response
                .text()
                .await
                .with_context(|| format!("reading body from {} failed", url))
        })
    }
}

/// In-memory fetcher keyed by locator. Used by tests and offline embedders.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    modules: HashMap<String, String>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(mut self, url: impl Into<String>, source: impl Into<String>) -> Self {
        self.modules.insert(url.into(), source.into());
        self
    }
}

impl ModuleFetcher for StaticFetcher {
    fn fetch<'a>(&'a self, url: &'a str) -> FetchFuture<'a> {
        let result = self
            .modules
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no module registered for {}", url));
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_table_is_fixed() {
        assert_eq!(
            resolve("lodash"),
            "https://cdn.jsdelivr.net/npm/lodash@4.17.21/lodash.min.js"
        );
        assert_eq!(
            resolve("rxjs"),
            "https://cdn.jsdelivr.net/npm/rxjs@7/dist/bundles/rxjs.umd.min.js"
        );
        assert_eq!(
            resolve("decimal.js"),
            "https://cdn.jsdelivr.net/npm/decimal.js@10.4.3/decimal.min.js"
        );
    }

    #[test]
    fn test_unknown_name_falls_back_to_latest() {
        assert_eq!(
            resolve("some-unknown-pkg"),
            "https://cdn.jsdelivr.net/npm/some-unknown-pkg@latest"
        );
    }

    #[test]
    fn test_locators_pass_through() {
        assert_eq!(
            resolve("https://example.com/lib.js"),
            "https://example.com/lib.js"
        );
        assert_eq!(resolve("/vendor/lib.js"), "/vendor/lib.js");
        assert_eq!(resolve("./local.js"), "./local.js");
        assert_eq!(resolve("../up.js"), "../up.js");
    }

    #[test]
    fn test_custom_base() {
        assert_eq!(
            resolve_with_base("leftpad", "https://mirror.local/npm"),
            "https://mirror.local/npm/leftpad@latest"
        );
    }

    #[tokio::test]
    async fn test_static_fetcher() {
        let fetcher = StaticFetcher::new().with_module("mem://a", "let a = 1");
        assert_eq!(fetcher.fetch("mem://a").await.unwrap(), "let a = 1");
        assert!(fetcher.fetch("mem://missing").await.is_err());
    }
}
