use anyhow::{Context, Result};
use dirs::home_dir;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::auth::{TokenSet, TokenUpdateCallback};

/// Session data stored in ~/.tnse.yml
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub region: String,
    #[serde(flatten)]
    pub tokens: TokenSet,
}

/// Get the path to the configuration file (~/.tnse.yml)
pub fn config_path() -> Result<PathBuf> {
    let home = home_dir().context("Failed to determine home directory")?;
    Ok(home.join(".tnse.yml"))
}

/// Load configuration from ~/.tnse.yml
pub fn load_config() -> Result<Config> {
    load_config_from(&config_path()?)
}

pub fn load_config_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Err(anyhow::anyhow!(
            "Not logged in. Run 'tnse login' first."
        ));
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    debug!("Loaded configuration for region: {}", config.region);
    Ok(config)
}

/// Save configuration to ~/.tnse.yml
pub fn save_config(config: &Config) -> Result<()> {
    save_config_to(&config_path()?, config)
}

pub fn save_config_to(path: &Path, config: &Config) -> Result<()> {
    let content = serde_yaml::to_string(config).context("Failed to serialize configuration")?;

    fs::write(path, content)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;

    debug!("Saved configuration to {}", path.display());
    Ok(())
}

/// Clear the configuration file (logout)
pub fn clear_config() -> Result<()> {
    clear_config_at(&config_path()?)
}

pub fn clear_config_at(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path)
            .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        debug!("Configuration file cleared");
    } else {
        warn!("Configuration file does not exist, nothing to clear");
    }

    Ok(())
}

/// Writes every token update back into the config file.
///
/// The tokens belong to the session's region, so that region is written alongside them.
pub struct ConfigTokenSink {
    path: PathBuf,
    email: Option<String>,
    region: String,
}

impl ConfigTokenSink {
    pub fn new(path: PathBuf, email: Option<String>, region: String) -> Self {
        Self {
            path,
            email,
            region,
        }
    }

    fn persist(&self, tokens: &TokenSet) -> Result<()> {
        let mut config = if self.path.exists() {
            load_config_from(&self.path)?
        } else {
            Config::default()
        };
        if config.email.is_none() {
            config.email = self.email.clone();
        }
        if !self.region.is_empty() {
            config.region = self.region.clone();
        }
        config.tokens = tokens.clone();
        save_config_to(&self.path, &config)
    }
}

impl TokenUpdateCallback for ConfigTokenSink {
    fn on_tokens_updated(&self, tokens: &TokenSet) {
        if let Err(e) = self.persist(tokens) {
            warn!("Failed to persist tokens: {:#}", e);
        }
    }
}
