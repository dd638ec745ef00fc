use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::KestrelConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "kestrel.toml",
    "kestrel.yaml",
    "kestrel.yml",
    "kestrel.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<KestrelConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Load an explicit config file, or discover one in the standard locations.
///
/// An explicit path that cannot be loaded is an error. A discovered file
/// that fails to parse is logged and replaced by defaults.
pub fn load_or_discover(path: Option<&Path>) -> anyhow::Result<KestrelConfig> {
    match path {
        Some(path) => load_config(path),
        None => Ok(discover_and_load()),
    }
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./kestrel.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/kestrel/kestrel.{toml,yaml,yml,json}` (user-global)
///
/// Returns `KestrelConfig::default()` if no config file is found.
pub fn discover_and_load() -> KestrelConfig {
    let Some(path) = find_config_file() else {
        debug!("no config file found, using defaults");
        return KestrelConfig::default();
    };
    debug!(path = %path.display(), "loading config");
    match load_config(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            KestrelConfig::default()
        },
    }
}

fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(".");
    std::iter::once(local)
        .chain(config_dir())
        .find_map(|dir| find_in_dir(&dir))
}

fn find_in_dir(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory: `~/.config/kestrel/`.
pub fn config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().join(".config").join("kestrel"))
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<KestrelConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
