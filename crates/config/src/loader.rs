use std::{
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::GatelinkConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "gatelink.toml",
    "gatelink.yaml",
    "gatelink.yml",
    "gatelink.json",
];

/// Override for the config directory, set via `set_config_dir()`.
static CONFIG_DIR_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Set a custom config directory. When set, discovery only looks in this
/// directory. Each call replaces the previous override.
pub fn set_config_dir(path: PathBuf) {
    *CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = Some(path);
}

/// Clear the config directory override, restoring default discovery.
pub fn clear_config_dir() {
    *CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = None;
}

fn config_dir_override() -> Option<PathBuf> {
    CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<GatelinkConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./gatelink.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/gatelink/gatelink.{toml,yaml,yml,json}` (user-global)
///
/// Returns `GatelinkConfig::default()` if no config file is found or the
/// file fails to parse.
pub fn discover_and_load() -> GatelinkConfig {
    let Some(path) = find_config_file() else {
        debug!("no config file found, using defaults");
        return GatelinkConfig::default();
    };

    debug!(path = %path.display(), "loading config");
    match load_config(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            GatelinkConfig::default()
        },
    }
}

/// Find the first config file in standard locations.
///
/// When a config dir override is set, only that directory is searched.
fn find_config_file() -> Option<PathBuf> {
    if let Some(dir) = config_dir_override() {
        return first_existing(&dir);
    }

    first_existing(Path::new("."))
        .or_else(|| home_dir().and_then(|h| first_existing(&h.join(".config").join("gatelink"))))
}

fn first_existing(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the config directory: override, or `~/.config/gatelink/`.
pub fn config_dir() -> Option<PathBuf> {
    if let Some(dir) = config_dir_override() {
        return Some(dir);
    }
    home_dir().map(|h| h.join(".config").join("gatelink"))
}

fn home_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}

/// Returns the path of an existing config file, or the default TOML path.
pub fn find_or_default_config_path() -> PathBuf {
    if let Some(path) = find_config_file() {
        return path;
    }
    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gatelink.toml")
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<GatelinkConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
