use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::auth::Credentials;
use crate::client::ClientOptions;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "CHARGEAMPS_CONFIG";

/// Configuration data stored as JSON
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    pub username: String,
    pub password: String,
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("username", &self.username)
            .field("api_base_url", &self.api_base_url)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.username, &self.password, &self.api_key)
    }

    pub fn client_options(&self) -> ClientOptions {
        let mut options = ClientOptions::default();
        if let Some(base_url) = &self.api_base_url {
            options.base_url = base_url.clone();
        }
        options
    }
}

/// Default location: `<config dir>/chargeamps/config.json`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("chargeamps").join("config.json"))
}

/// Pick the config file: an explicit path wins, then the default location if
/// it exists.
pub fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    match default_config_path() {
        Some(path) if path.exists() => Ok(path),
        _ => Err(anyhow::anyhow!(
            "No config file given. Use --config or set {}.",
            CONFIG_ENV
        )),
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    if config.username.is_empty() || config.password.is_empty() || config.api_key.is_empty() {
        return Err(anyhow::anyhow!(
            "Configuration incomplete: username, password and api_key are required"
        ));
    }

    debug!("Loaded configuration for user: {}", config.username);
    Ok(config)
}
