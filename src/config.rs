//! Runtime configuration – timeouts, retry policy, backend selection and
//! engine launch settings. Every field has a default, so a config file only
//! needs to name what it changes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::geometry::{DEFAULT_MARGIN_PT, PAGE_BOX_ATTR};
use crate::style::Theme;

/// Top-level configuration for a [`crate::pipeline::Pipeline`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Page margin in points when a document doesn't set one (default: 40).
    pub default_margin_pt: f32,
    pub pagination: PaginationConfig,
    pub conversion: ConversionConfig,
    pub style: StyleConfig,
    pub chromium: ChromiumConfig,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            default_margin_pt: DEFAULT_MARGIN_PT,
            pagination: PaginationConfig::default(),
            conversion: ConversionConfig::default(),
            style: StyleConfig::default(),
            chromium: ChromiumConfig::default(),
        }
    }
}

impl RenderConfig {
    /// Serialise to JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Deserialise from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Read a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Apply `DOCPRESS_*` environment overrides.
    pub fn apply_env(mut self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok());
        self
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("DOCPRESS_REMOTE_URL").filter(|v| !v.is_empty()) {
            self.conversion.remote_url = Some(url);
            self.conversion.backend = BackendKind::Remote;
        }
        if let Some(kind) = var("DOCPRESS_BACKEND") {
            match kind.to_ascii_lowercase().as_str() {
                "remote" => self.conversion.backend = BackendKind::Remote,
                "engine" | "local" => self.conversion.backend = BackendKind::Engine,
                other => log::warn!("ignoring DOCPRESS_BACKEND={other:?}"),
            }
        }
        if let Some(chrome) = var("DOCPRESS_CHROME").filter(|v| !v.is_empty()) {
            self.chromium.executable = Some(PathBuf::from(chrome));
        }
    }
}

/// Pagination orchestrator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    /// Timeout for loading the assembled document.
    pub load_timeout_ms: u64,
    /// Timeout for executing bundles and waiting for every mount.
    pub scripts_timeout_ms: u64,
    /// Timeout for the pagination polyfill pass.
    pub pagination_timeout_ms: u64,
    /// Timeout for reading the page count and capturing markup.
    pub resolve_timeout_ms: u64,
    /// Interval between readiness probes while waiting for mounts.
    pub ready_poll_ms: u64,
    /// Selector matching one element per laid-out page.
    pub page_selector: String,
    pub polyfill: PolyfillConfig,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            load_timeout_ms: 10_000,
            scripts_timeout_ms: 10_000,
            pagination_timeout_ms: 30_000,
            resolve_timeout_ms: 10_000,
            ready_poll_ms: 25,
            page_selector: format!("[{PAGE_BOX_ATTR}]"),
            polyfill: PolyfillConfig::default(),
        }
    }
}

impl PaginationConfig {
    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    pub fn scripts_timeout(&self) -> Duration {
        Duration::from_millis(self.scripts_timeout_ms)
    }

    pub fn pagination_timeout(&self) -> Duration {
        Duration::from_millis(self.pagination_timeout_ms)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }

    pub fn ready_poll(&self) -> Duration {
        Duration::from_millis(self.ready_poll_ms.max(1))
    }
}

/// Which pagination polyfill to inject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PolyfillConfig {
    /// The bundled polyfill.
    #[default]
    Builtin,
    /// A third-party polyfill script (e.g. Paged.js) plus the expression that
    /// runs it. The expression may return a promise.
    Script { path: PathBuf, invoke: String },
}

/// Conversion dispatcher settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    pub backend: BackendKind,
    /// Base URL of the conversion service, e.g. `http://localhost:3000`.
    pub remote_url: Option<String>,
    /// Path of the conversion endpoint on the service.
    pub endpoint: String,
    /// Extra attempts after the first when the backend is unreachable.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Engine,
            remote_url: None,
            endpoint: "/forms/chromium/convert/html".to_string(),
            max_retries: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 4_000,
            request_timeout_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Print through the local rendering engine.
    #[default]
    Engine,
    /// Post to the remote conversion service.
    Remote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleConfig {
    /// Maximum number of compiled class sets kept in the style cache.
    pub cache_capacity: usize,
    pub theme: Option<Theme>,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 256,
            theme: None,
        }
    }
}

/// Headless Chromium launch settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChromiumConfig {
    /// Browser binary; auto-detected when unset.
    pub executable: Option<PathBuf>,
    pub no_sandbox: bool,
    pub args: Vec<String>,
}

impl Default for ChromiumConfig {
    fn default() -> Self {
        Self {
            executable: None,
            no_sandbox: true,
            args: vec![
                "--disable-gpu".to_string(),
                "--disable-dev-shm-usage".to_string(),
                "--hide-scrollbars".to_string(),
                "--force-device-scale-factor=1".to_string(),
            ],
        }
    }
}
