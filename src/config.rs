use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

const CONFIG_PATH_VAR: &str = "CONFIG_PATH";
const DEFAULT_CONFIG_PATH: &str = "/etc/filament/config.toml";
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found")]
    NotFound,
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Runtime configuration after resolving the raw file contents
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: String,
    pub controller_addr: String,
    pub database_path: PathBuf,
    pub timezone: String,
    pub log_level: String,
    pub development: bool,
    pub strip_length: u16,
    pub issuer_url: String,
}

impl Config {
    /// Load the configuration, checking `CONFIG_PATH` and then walking up
    /// from the current directory for a `config.toml`.
    pub fn load() -> Result<Config, ConfigError> {
        let path = find_config_path()?;
        Self::read(&path)
    }

    pub fn read(path: &Path) -> Result<Config, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let raw: RawConfig = toml::from_str(&contents)?;

        Ok(Config {
            listen_addr: format!("{}:{}", raw.web.host, raw.web.port),
            controller_addr: raw.controller.address,
            database_path: raw.web.database,
            timezone: raw.web.timezone,
            log_level: raw.log_level,
            development: raw.development,
            strip_length: raw.strip_length * raw.strip_density,
            issuer_url: raw.web.auth.jwt_issuer,
        })
    }
}

/// Locate the configuration file, preferring the explicit override
fn find_config_path() -> Result<PathBuf, ConfigError> {
    let default = env::var(CONFIG_PATH_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
    if default.is_file() {
        return Ok(default);
    }

    // Traverse upwards from the current directory
    let mut candidate = env::current_dir()?;
    loop {
        let test = candidate.join(CONFIG_FILE_NAME);
        if test.is_file() {
            return Ok(test);
        }

        if !candidate.pop() {
            break;
        }
    }

    Err(ConfigError::NotFound)
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default = "default_log_level")]
    log_level: String,
    strip_density: u16,
    strip_length: u16,
    #[serde(default)]
    development: bool,

    controller: RawControllerConfig,
    web: RawWebConfig,
}

#[derive(Debug, Deserialize)]
struct RawControllerConfig {
    address: String,
}

#[derive(Debug, Deserialize)]
struct RawWebConfig {
    host: String,
    port: u16,
    database: PathBuf,
    timezone: String,

    auth: RawAuthConfig,
}

#[derive(Debug, Deserialize)]
struct RawAuthConfig {
    jwt_issuer: String,
}

fn default_log_level() -> String {
    "info".to_owned()
}
