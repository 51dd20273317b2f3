use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Environment variable carrying the serialized handoff context into a successor process.
pub const HANDOFF_ENV: &str = "HOTBOOT_HANDOFF";

/// Line a successor prints on stdout once it has accepted the handoff.
pub const HANDSHAKE_READY_LINE: &str = "hotboot:ready";

/// Number of random digits appended to a version to form a cache key.
pub const CACHE_KEY_NONCE_DIGITS: u32 = 6;

/// File name of the durable key-value store inside the state directory.
pub const LOCAL_STORE_FILE: &str = "local_store.json";

/// Directory (under the state directory) holding cache regions.
pub const CACHES_DIR: &str = "caches";

/// Directory (under the state directory) holding activated bundles.
pub const BUNDLES_DIR: &str = "bundles";

/// A large optional asset set stored in its own region.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SecondaryRegion {
    pub name: String,
    #[serde(default)]
    pub assets: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ActivatorConfig {
    /// File name the downloaded bundle is written to before it is started.
    pub bundle_file: String,
    /// Optional program used to run the bundle (e.g. `sh`). When absent the
    /// bundle itself is executed.
    pub interpreter: Option<String>,
}

impl Default for ActivatorConfig {
    fn default() -> Self {
        Self {
            bundle_file: "elemental.js".to_string(),
            interpreter: None,
        }
    }
}

/// Top-level configuration for the bootstrap.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BootConfig {
    /// Origin every relative asset path is resolved against.
    pub base_url: String,
    pub version_path: String,
    pub bundle_path: String,
    /// Well-known path the background agent is registered under.
    pub agent_script: String,
    /// Port the local agent listens on; 0 picks an ephemeral port.
    pub agent_port: u16,
    pub primary_region: String,
    /// Essential static assets stored next to the bundle in the primary region.
    pub primary_assets: Vec<String>,
    pub secondary_regions: Vec<SecondaryRegion>,
    /// Regions left behind by older builds; dropped on every boot.
    pub retired_regions: Vec<String>,
    pub state_dir: PathBuf,
    /// Maximum number of concurrent fetches while populating a region.
    pub max_concurrency: u32,
    /// Non-production installs re-check for updates on every fresh boot.
    /// Overrides the build profile's default.
    pub production: bool,
    pub activator: ActivatorConfig,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            version_path: "/version".to_string(),
            bundle_path: "/elemental.js".to_string(),
            agent_script: "/pwa.js".to_string(),
            agent_port: 0,
            primary_region: "ELEMENTAL".to_string(),
            primary_assets: vec!["/".to_string(), "/game".to_string()],
            secondary_regions: Vec::new(),
            retired_regions: Vec::new(),
            state_dir: PathBuf::from(".hotboot"),
            max_concurrency: 6,
            production: true,
            activator: ActivatorConfig::default(),
        }
    }
}

impl BootConfig {
    /// Load a config from a TOML file. Missing fields take their defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("parsing boot config")
    }

    /// URL of the code bundle for a given cache key.
    pub fn bundle_url(&self, cache_key: &str) -> String {
        format!("{}?v={}", self.bundle_path, cache_key)
    }

    /// Full primary region contents for a given cache key, bundle first.
    pub fn primary_urls(&self, cache_key: &str) -> Vec<String> {
        let mut urls = Vec::with_capacity(self.primary_assets.len() + 1);
        urls.push(self.bundle_url(cache_key));
        urls.extend(self.primary_assets.iter().cloned());
        urls
    }
}

/// Identity of the running build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfo {
    pub version: String,
    pub build_date: String,
    pub production: bool,
}

impl BuildInfo {
    pub fn new(version: impl Into<String>, production: bool) -> Self {
        Self {
            version: version.into(),
            build_date: String::new(),
            production,
        }
    }

    pub fn with_build_date(mut self, date: impl Into<String>) -> Self {
        self.build_date = date.into();
        self
    }

    /// The build token compiled into this binary.
    pub fn embedded() -> Self {
        Self {
            version: option_env!("HOTBOOT_BUILD_VERSION")
                .unwrap_or(env!("CARGO_PKG_VERSION"))
                .to_string(),
            build_date: option_env!("HOTBOOT_BUILD_DATE")
                .unwrap_or_default()
                .to_string(),
            production: !cfg!(debug_assertions),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg = BootConfig::from_toml_str(
            r#"
            base_url = "http://example.test"
            production = false

            [[secondary_regions]]
            name = "secondary_cache_v2"
            assets = ["/p5.min.js"]
            "#,
        )
        .unwrap();

        assert_eq!(cfg.base_url, "http://example.test");
        assert!(!cfg.production);
        assert_eq!(cfg.version_path, "/version");
        assert_eq!(cfg.max_concurrency, 6);
        assert_eq!(cfg.secondary_regions.len(), 1);
        assert_eq!(cfg.secondary_regions[0].assets, vec!["/p5.min.js"]);
    }

    #[test]
    fn test_primary_urls_lead_with_bundle() {
        let cfg = BootConfig {
            primary_assets: vec!["/".into(), "/logo.svg".into()],
            ..BootConfig::default()
        };
        let urls = cfg.primary_urls("v1-123456");
        assert_eq!(urls, vec!["/elemental.js?v=v1-123456", "/", "/logo.svg"]);
    }
}
