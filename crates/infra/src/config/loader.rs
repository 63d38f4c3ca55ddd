//! Configuration loader
//!
//! Loads the transport configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If incomplete, falls back to loading from file
//! 3. Probes multiple paths for config files
//! 4. Supports JSON and TOML formats
//!
//! ## Environment Variables
//! - `CARELINK_PRIMARY_BASE_URL`: Primary sync base URL (required)
//! - `CARELINK_IDENTITY_BASE_URL`: Identity registry base URL (required)
//! - `CARELINK_REFRESH_PATH`: Token refresh path on the primary backend
//! - `CARELINK_HTTP_LOG_LEVEL`: `none`, `basic`, `headers` or `body`
//! - `CARELINK_PRIMARY_TIMEOUT_SECS`: Read/write deadline for primary sync
//! - `CARELINK_IDENTITY_TIMEOUT_SECS`: Connect/read/write deadline for the
//!   identity registry
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./carelink.json` or `./carelink.toml` (current working directory)
//! 2. `./config.json` or `./config.toml` (current working directory)
//! 3. The same names in the parent directory
//! 4. Relative to executable location

use std::path::{Path, PathBuf};

use carelink_domain::{HttpLogLevel, Result, TimeoutProfile, TransportConfig, TransportError};

pub const ENV_PRIMARY_BASE_URL: &str = "CARELINK_PRIMARY_BASE_URL";
pub const ENV_IDENTITY_BASE_URL: &str = "CARELINK_IDENTITY_BASE_URL";
pub const ENV_REFRESH_PATH: &str = "CARELINK_REFRESH_PATH";
pub const ENV_HTTP_LOG_LEVEL: &str = "CARELINK_HTTP_LOG_LEVEL";
pub const ENV_PRIMARY_TIMEOUT_SECS: &str = "CARELINK_PRIMARY_TIMEOUT_SECS";
pub const ENV_IDENTITY_TIMEOUT_SECS: &str = "CARELINK_IDENTITY_TIMEOUT_SECS";

const CONFIG_FILE_NAMES: [&str; 4] =
    ["carelink.json", "carelink.toml", "config.json", "config.toml"];

/// Load configuration with automatic fallback strategy
///
/// First attempts to load from environment variables. If a required
/// variable is missing, falls back to loading from a config file.
///
/// # Errors
/// Returns `TransportError::Config` if:
/// - Configuration cannot be loaded from either source
/// - File format is invalid
/// - The loaded configuration fails validation
pub fn load() -> Result<TransportConfig> {
    match load_from_env() {
        Ok(config) => {
            tracing::info!("Configuration loaded from environment variables");
            Ok(config)
        }
        Err(e) => {
            tracing::debug!(error = ?e, "Failed to load from environment, trying file");
            load_from_file(None)
        }
    }
}

/// Load configuration from environment variables
///
/// # Errors
/// Returns `TransportError::Config` if a required variable is missing or a
/// variable has an invalid value.
pub fn load_from_env() -> Result<TransportConfig> {
    let primary_base_url = env_var(ENV_PRIMARY_BASE_URL)?;
    let identity_base_url = env_var(ENV_IDENTITY_BASE_URL)?;
    let mut config = TransportConfig::new(primary_base_url, identity_base_url);

    if let Some(path) = optional_env_var(ENV_REFRESH_PATH) {
        config.refresh.path = path;
    }

    if let Some(level) = optional_env_var(ENV_HTTP_LOG_LEVEL) {
        let parsed = HttpLogLevel::parse(&level).ok_or_else(|| {
            TransportError::Config(format!("Invalid {ENV_HTTP_LOG_LEVEL}: {level}"))
        })?;
        config.http_log_level = Some(parsed);
    }

    if let Some(secs) = env_secs(ENV_PRIMARY_TIMEOUT_SECS)? {
        let connect = config.primary.timeouts.connect_secs;
        config.primary.timeouts = TimeoutProfile::new(connect, secs, secs);
    }

    if let Some(secs) = env_secs(ENV_IDENTITY_TIMEOUT_SECS)? {
        config.identity_registry.timeouts = TimeoutProfile::uniform(secs);
    }

    config.validate()?;
    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes multiple locations for config files.
/// Supports both JSON and TOML formats (detected by file extension).
///
/// # Errors
/// Returns `TransportError::Config` if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid
/// - The configuration fails validation
pub fn load_from_file(path: Option<PathBuf>) -> Result<TransportConfig> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(TransportError::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            TransportError::Config(
                "No config file found in any of the standard locations".to_string(),
            )
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| TransportError::Config(format!("Failed to read config file: {e}")))?;

    let config = parse_config(&contents, &config_path)?;
    config.validate()?;
    Ok(config)
}

/// Parse configuration from string content, format by file extension.
fn parse_config(contents: &str, path: &Path) -> Result<TransportConfig> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| TransportError::Config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| TransportError::Config(format!("Invalid JSON format: {e}"))),
        _ => Err(TransportError::Config(format!("Unsupported config format: {extension}"))),
    }
}

/// Probe the standard locations for a configuration file
///
/// Searches the current working directory and its parent, then the
/// executable's directory and its parent.
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut roots = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        roots.push(cwd.clone());
        roots.push(cwd.join(".."));
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            roots.push(exe_dir.to_path_buf());
            roots.push(exe_dir.join(".."));
        }
    }

    roots
        .iter()
        .flat_map(|root| CONFIG_FILE_NAMES.iter().map(move |name| root.join(name)))
        .find(|path| path.exists())
}

fn env_var(key: &str) -> Result<String> {
    optional_env_var(key).ok_or_else(|| {
        TransportError::Config(format!("Missing required environment variable: {key}"))
    })
}

/// Unset and blank variables are treated alike.
fn optional_env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn env_secs(key: &str) -> Result<Option<u64>> {
    optional_env_var(key)
        .map(|s| {
            s.parse::<u64>()
                .map_err(|e| TransportError::Config(format!("Invalid {key}: {e}")))
        })
        .transpose()
}
