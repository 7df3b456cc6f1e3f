//! Configuration loading
//!
//! Layers, lowest to highest precedence: built-in defaults, a config file
//! (TOML or YAML), `REG_CHXR_*` environment variables, then explicit CLI flags
//! (see [`merge_cli_with_config`]).

mod merge;

pub use merge::{merge_cli_with_config, CliOverrides};

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Toml, Yaml};
use figment::Figment;
use std::path::{Path, PathBuf};

use crate::domain::{Config, PREV_PLUGIN_INSTANCE_ENV};

/// Prefix for environment overrides, e.g. `REG_CHXR_CUBE_URL`.
pub const ENV_PREFIX: &str = "REG_CHXR_";

/// Config file names looked up in the anchor directory when `--config` is absent.
pub const CONFIG_FILE_NAMES: &[&str] = &[
    "reg-chxr.toml",
    ".reg-chxr.toml",
    "reg-chxr.yml",
    ".reg-chxr.yml",
    ".reg-chxr.yaml",
];

/// Load configuration from defaults, an optional file and the environment.
///
/// An explicit `config_path` must exist; otherwise the first of
/// [`CONFIG_FILE_NAMES`] found in `anchor` is used, if any.
pub fn load_config(anchor: &Path, config_path: Option<&Path>) -> Result<Config> {
    let mut figment = Figment::from(Serialized::defaults(Config::default()));

    let file = match config_path {
        Some(path) => {
            if !path.is_file() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            Some(path.to_path_buf())
        }
        None => discover_config_file(anchor),
    };

    if let Some(file) = file.as_deref() {
        tracing::debug!(path = %file.display(), "loading config file");
        figment = if is_yaml(file) {
            figment.merge(Yaml::file(file))
        } else {
            figment.merge(Toml::file(file))
        };
    }

    let config: Config = figment
        .merge(Env::prefixed(ENV_PREFIX))
        .extract()
        .with_context(|| match file.as_deref() {
            Some(path) => format!("Invalid configuration in {}", path.display()),
            None => "Invalid configuration in environment".to_string(),
        })?;

    Ok(normalize(config))
}

/// Fill the plugin instance id from the ChRIS environment when it was not configured.
pub fn resolve_plugin_instance_id(config: &mut Config) -> Result<String> {
    if let Some(id) = config
        .plugin_instance_id
        .as_deref()
        .filter(|id| !id.trim().is_empty())
    {
        return Ok(id.trim().to_string());
    }
    let id = std::env::var(PREV_PLUGIN_INSTANCE_ENV)
        .ok()
        .filter(|id| !id.trim().is_empty())
        .with_context(|| {
            format!(
                "No plugin instance ID given: pass --pluginInstanceID or set {PREV_PLUGIN_INSTANCE_ENV}"
            )
        })?;
    let id = id.trim().to_string();
    config.plugin_instance_id = Some(id.clone());
    Ok(id)
}

/// CUBE endpoints are joined onto the API root, which must end with `/`.
pub fn normalize(mut config: Config) -> Config {
    if !config.cube_url.ends_with('/') {
        config.cube_url.push('/');
    }
    config
}

fn discover_config_file(anchor: &Path) -> Option<PathBuf> {
    CONFIG_FILE_NAMES
        .iter()
        .map(|name| anchor.join(name))
        .find(|p| p.is_file())
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yml" | "yaml")
    )
}
