//! Exocortex configuration.
//!
//! Resolution order for the config file: explicit `--config`, then
//! `EXOCORTEX_CONFIG`, then `<data_dir>/exocortex.toml`. A missing file is not
//! an error; every field has a default.
//!
//! ```toml
//! data_dir = "/home/me/exocortex-data"
//!
//! [collections]
//! recipes = "recipe-manager/recipes"
//! reading = "/mnt/books/reading-list"
//!
//! [audit]
//! enabled = true
//! actor = "dashboard"
//! ```

use crate::core::error::ExocortexError;
use crate::core::store::{Collection, Store};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "exocortex.toml";
pub const ENV_CONFIG: &str = "EXOCORTEX_CONFIG";
pub const ENV_DATA_DIR: &str = "EXOCORTEX_DATA_DIR";
pub const ENV_ACTOR: &str = "EXOCORTEX_ACTOR";
const DEFAULT_DATA_DIR_NAME: &str = "exocortex-data";
const DEFAULT_AUDIT_LOG: &str = ".exocortex/records.events.jsonl";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExocortexConfig {
    /// Data dir; defaults to `$HOME/exocortex-data`.
    pub data_dir: Option<PathBuf>,
    /// Per-collection root overrides, keyed by collection name.
    pub collections: BTreeMap<String, PathBuf>,
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuditConfig {
    pub enabled: bool,
    pub path: Option<PathBuf>,
    pub actor: Option<String>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            actor: None,
        }
    }
}

/// Configuration with every default and environment override applied.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    pub data_dir: PathBuf,
    pub config_file: Option<PathBuf>,
    pub collections: BTreeMap<String, PathBuf>,
    pub audit_log: Option<PathBuf>,
    pub actor: String,
}

impl ResolvedConfig {
    pub fn store(&self, collection: Collection) -> Store {
        let root = self
            .collections
            .get(collection.name())
            .cloned()
            .unwrap_or_else(|| self.data_dir.join(collection.default_subpath()));
        Store { collection, root }
    }
}

pub fn parse_config(content: &str) -> Result<ExocortexConfig, ExocortexError> {
    let config: ExocortexConfig =
        toml::from_str(content).map_err(|e| ExocortexError::ConfigError(e.to_string()))?;
    for name in config.collections.keys() {
        name.parse::<Collection>()
            .map_err(|e| ExocortexError::ConfigError(e.to_string()))?;
    }
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<ExocortexConfig, ExocortexError> {
    let content = fs::read_to_string(path).map_err(|e| {
        ExocortexError::ConfigError(format!("cannot read {}: {}", path.display(), e))
    })?;
    parse_config(&content)
}

fn default_data_dir() -> Result<PathBuf, ExocortexError> {
    if let Some(dir) = std::env::var_os(ENV_DATA_DIR) {
        return Ok(PathBuf::from(dir));
    }
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(DEFAULT_DATA_DIR_NAME))
        .ok_or_else(|| {
            ExocortexError::ConfigError(format!(
                "cannot locate data dir: neither {} nor HOME is set",
                ENV_DATA_DIR
            ))
        })
}

/// Load and resolve configuration.
///
/// `explicit` is the `--config` flag. An explicit or env-named file must exist;
/// the data-dir fallback is optional.
pub fn load_config(explicit: Option<&Path>) -> Result<ResolvedConfig, ExocortexError> {
    let named = explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(ENV_CONFIG).map(PathBuf::from));

    let (config, config_file) = match named {
        Some(path) => (read_config_file(&path)?, Some(path)),
        None => {
            let candidate = default_data_dir()?.join(CONFIG_FILE_NAME);
            if candidate.is_file() {
                (read_config_file(&candidate)?, Some(candidate))
            } else {
                (ExocortexConfig::default(), None)
            }
        }
    };

    resolve(config, config_file)
}

/// Apply defaults and environment overrides to a parsed config.
pub fn resolve(
    config: ExocortexConfig,
    config_file: Option<PathBuf>,
) -> Result<ResolvedConfig, ExocortexError> {
    resolve_with(
        config,
        config_file,
        std::env::var_os(ENV_DATA_DIR).map(PathBuf::from),
        std::env::var(ENV_ACTOR).ok(),
    )
}

/// [`resolve`] with the environment overrides passed in.
pub fn resolve_with(
    config: ExocortexConfig,
    config_file: Option<PathBuf>,
    env_data_dir: Option<PathBuf>,
    env_actor: Option<String>,
) -> Result<ResolvedConfig, ExocortexError> {
    // The env var beats the file so one-off runs can point elsewhere.
    let data_dir = match (env_data_dir, config.data_dir) {
        (Some(env_dir), _) => env_dir,
        (None, Some(dir)) => dir,
        (None, None) => default_data_dir()?,
    };

    let collections = config
        .collections
        .into_iter()
        .map(|(name, root)| {
            let root = if root.is_absolute() {
                root
            } else {
                data_dir.join(root)
            };
            (name.trim().to_ascii_lowercase(), root)
        })
        .collect();

    let audit_log = if config.audit.enabled {
        Some(match config.audit.path {
            Some(p) if p.is_absolute() => p,
            Some(p) => data_dir.join(p),
            None => data_dir.join(DEFAULT_AUDIT_LOG),
        })
    } else {
        None
    };

    let actor = config
        .audit
        .actor
        .or(env_actor)
        .filter(|a| !a.trim().is_empty())
        .unwrap_or_else(|| "exocortex".to_string());

    Ok(ResolvedConfig {
        data_dir,
        config_file,
        collections,
        audit_log,
        actor,
    })
}
