//! Console configuration with builder pattern.

use std::fmt;
use std::sync::Arc;

use crate::sandbox::loader::{HttpFetcher, ModuleFetcher, CDN_BASE};

/// Configuration for the console host and its sandbox instances.
#[derive(Clone)]
pub struct SandboxConfig {
    /// Maximum retained history entries (oldest dropped first).
    pub history_capacity: usize,
    /// Base locator bare module names resolve under.
    pub cdn_base: String,
    /// Optional evaluation step limit per submission. `None` means no limit;
    /// a runaway loop is then cleared only by `reset()`.
    pub max_steps: Option<u64>,
    /// Module source fetcher.
    pub fetcher: Arc<dyn ModuleFetcher>,
}

impl fmt::Debug for SandboxConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxConfig")
            .field("history_capacity", &self.history_capacity)
            .field("cdn_base", &self.cdn_base)
            .field("max_steps", &self.max_steps)
            .field("fetcher", &"<dyn ModuleFetcher>")
            .finish()
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            history_capacity: 300,
            cdn_base: CDN_BASE.to_string(),
            max_steps: None,
            fetcher: Arc::new(HttpFetcher::new()),
        }
    }
}

impl SandboxConfig {
    /// Create a new builder for SandboxConfig.
    pub fn builder() -> SandboxConfigBuilder {
        SandboxConfigBuilder::default()
    }
}

/// Builder for creating SandboxConfig instances.
#[derive(Default)]
pub struct SandboxConfigBuilder {
    history_capacity: Option<usize>,
    cdn_base: Option<String>,
    max_steps: Option<u64>,
    fetcher: Option<Arc<dyn ModuleFetcher>>,
}

impl SandboxConfigBuilder {
    /// Set the history cap.
    pub fn history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = Some(capacity);
        self
    }

    /// Set the CDN base used for bare module names.
    pub fn cdn_base(mut self, base: impl Into<String>) -> Self {
        self.cdn_base = Some(base.into());
        self
    }

    /// Set the per-submission evaluation step limit.
    pub fn max_steps(mut self, steps: u64) -> Self {
        self.max_steps = Some(steps);
        self
    }

    /// Set the module fetcher.
    pub fn fetcher(mut self, fetcher: Arc<dyn ModuleFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Build the SandboxConfig.
    pub fn build(self) -> SandboxConfig {
        let default = SandboxConfig::default();
        SandboxConfig {
            history_capacity: self.history_capacity.unwrap_or(default.history_capacity),
            cdn_base: self.cdn_base.unwrap_or(default.cdn_base),
            max_steps: self.max_steps.or(default.max_steps),
            fetcher: self.fetcher.unwrap_or(default.fetcher),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SandboxConfig::default();
        assert_eq!(config.history_capacity, 300);
        assert_eq!(config.cdn_base, CDN_BASE);
        assert_eq!(config.max_steps, None);
    }

    #[test]
    fn test_builder() {
        let config = SandboxConfig::builder()
            .history_capacity(10)
            .cdn_base("https://mirror.local/npm")
            .max_steps(50_000)
            .build();

        assert_eq!(config.history_capacity, 10);
        assert_eq!(config.cdn_base, "https://mirror.local/npm");
        assert_eq!(config.max_steps, Some(50_000));
    }
}
