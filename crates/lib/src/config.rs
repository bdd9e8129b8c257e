//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.parivar/config.json`) and environment.
//! The host builds everything from this explicitly; nothing reads it globally.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Backend location and auth.
    #[serde(default)]
    pub api: ApiConfig,

    /// Chat session tunables.
    #[serde(default)]
    pub chat: ChatConfig,

    /// Local fallback cache location.
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Backend base URL, bearer token, and request timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    /// Base URL of the family-health backend (default "http://127.0.0.1:5000").
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token. Overridden by PARIVAR_TOKEN env.
    pub token: Option<String>,

    /// Per-request timeout in seconds (default 30).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Debounce, scroll threshold, and the context activated at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatConfig {
    /// Quiet window before a log write goes out (default 800).
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Distance from the bottom, in px, beyond which new messages raise an indicator (default 160).
    #[serde(default = "default_scroll_threshold_px")]
    pub scroll_threshold_px: f32,

    /// Context activated at startup (default "Self").
    #[serde(default = "default_context")]
    pub default_context: String,
}

/// Local cache settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    /// Cache directory. Relative paths are resolved against the config file's parent.
    /// Omit to use the `memory` subdirectory of the config directory.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

fn default_base_url() -> String {
    "http://127.0.0.1:5000".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_debounce_ms() -> u64 {
    800
}

fn default_scroll_threshold_px() -> f32 {
    160.0
}

fn default_context() -> String {
    "Self".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            scroll_threshold_px: default_scroll_threshold_px(),
            default_context: default_context(),
        }
    }
}

/// Resolve the bearer token: env PARIVAR_TOKEN overrides config. Blank values count as unset.
pub fn resolve_token(config: &Config) -> Option<String> {
    std::env::var("PARIVAR_TOKEN")
        .ok()
        .and_then(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .or_else(|| {
            config
                .api
                .token
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("PARIVAR_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".parivar").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path, PARIVAR_CONFIG_PATH, or the default. Missing file =>
/// default config. Returns the config and the path that was used (for resolving the config
/// directory).
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

fn config_dir(config_path: &Path) -> &Path {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Resolve the local cache directory: `cache.directory` if set (relative paths resolved
/// against the config file's parent), otherwise the `memory` subdirectory.
pub fn resolve_cache_dir(config: &Config, config_path: &Path) -> PathBuf {
    let parent = config_dir(config_path);
    match &config.cache.directory {
        Some(d) if !d.as_os_str().is_empty() => {
            if d.is_absolute() {
                d.clone()
            } else {
                parent.join(d)
            }
        }
        _ => parent.join("memory"),
    }
}
