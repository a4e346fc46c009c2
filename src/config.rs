use std::path::{Path, PathBuf};

use color_eyre::eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// On-disk configuration: credentials and nothing else. Run behavior comes
/// from the CLI and lands in [`RunOptions`].
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Bearer token for the streaming service. Token exchange is handled
    /// outside this tool.
    #[serde(default)]
    pub access_token: Option<String>,
}

impl Config {
    /// Load config from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .wrap_err_with(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Default config file location
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|path| path.join("playlist-migrator").join("config.toml"))
    }

    /// Load the default config file; a missing file is not an error since
    /// the token can also arrive via the CLI.
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Create a default config file, if it doesn't exist
    pub fn create_default() -> Result<()> {
        let path = Self::config_path()
            .ok_or_else(|| color_eyre::eyre::eyre!("No config directory available"))?;
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .wrap_err_with(|| format!("Failed to create {}", parent.display()))?;
        }
        let default = toml::to_string_pretty(&Self::default())
            .wrap_err("Failed to serialize default config")?;
        std::fs::write(&path, default)
            .wrap_err_with(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }
}

/// Everything a run needs, resolved once at startup. Components receive this
/// by reference; none of them reads process environment or other ambient
/// state on its own.
#[derive(Debug)]
pub struct RunOptions {
    pub input: PathBuf,
    pub delimiter: char,
    pub missing_tracks_file: PathBuf,
    pub json_export_file: PathBuf,
    pub rate_limit_log: PathBuf,
    pub retry: RetryPolicy,
    pub export_only: bool,
    pub assume_yes: bool,
}
