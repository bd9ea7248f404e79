//! Embedding-tool configuration (ambient stack, spec.md §6 "Configuration").
//!
//! Deliberately small next to the teacher's `config.rs`: profile persistence
//! for password generation is out of this crate's scope, so this only
//! loads the handful of fields spec.md names as external-collaborator
//! inputs: vault path, optional repository path, debug flag, optional
//! config file path. Grounded on `original_source/internal/config/load.go`'s
//! permission check (no group/world read bits on the config file).

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

const CONFIG_ENV: &str = "PASSWORDER_CONFIG";
const APP_DIR: &str = "passworder";
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to determine configuration directory")]
    ConfigDirUnavailable,

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config file {0} is readable by group or other; refusing to load")]
    InsecurePermissions(PathBuf),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    repository_path: Option<PathBuf>,
    #[serde(default)]
    debug: bool,
}

#[derive(Debug, Clone)]
pub struct VaultCoreConfig {
    pub vault_path: PathBuf,
    pub repository_path: Option<PathBuf>,
    pub debug: bool,
    pub config_file_path: Option<PathBuf>,
}

/// Resolves the config file path: `PASSWORDER_CONFIG` env var if set,
/// otherwise `<config_dir>/passworder/config.toml`.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    if let Ok(path) = env::var(CONFIG_ENV) {
        return Ok(PathBuf::from(path));
    }
    let mut dir = dirs::config_dir().ok_or(ConfigError::ConfigDirUnavailable)?;
    dir.push(APP_DIR);
    dir.push(CONFIG_FILE_NAME);
    Ok(dir)
}

/// Loads configuration for `vault_path`, optionally reading `config_file_path`
/// (or the default config path if `None` and present on disk). Rejects a
/// config file with group/world read bits set on Unix.
pub fn load(
    vault_path: PathBuf,
    repo_override: Option<PathBuf>,
    debug_override: bool,
    config_file_path: Option<PathBuf>,
) -> Result<VaultCoreConfig, ConfigError> {
    let resolved_path = match config_file_path.clone() {
        Some(p) => Some(p),
        None => {
            let default_path = default_config_path()?;
            default_path.exists().then_some(default_path)
        }
    };

    let file_config = match &resolved_path {
        Some(path) => load_file_config(path)?,
        None => FileConfig::default(),
    };

    Ok(VaultCoreConfig {
        vault_path,
        repository_path: repo_override.or(file_config.repository_path),
        debug: debug_override || file_config.debug,
        config_file_path: resolved_path,
    })
}

fn load_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    check_permissions(path)?;
    let contents = fs::read_to_string(path)?;
    Ok(toml::from_str(&contents)?)
}

fn check_permissions(path: &Path) -> Result<(), ConfigError> {
    #[cfg(unix)]
    {
        let mode = fs::metadata(path)?.permissions().mode();
        if mode & 0o077 != 0 {
            return Err(ConfigError::InsecurePermissions(path.to_path_buf()));
        }
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}
