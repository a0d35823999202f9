//! qd-config: calculation configuration files.
//!
//! A configuration is a flat key-value document. JSON is the default
//! format; `.yaml`/`.yml` files are read and written as YAML. Path-typed
//! keys are `PathBuf` in [`QuanticsConfig`] and plain strings on disk.

pub mod schema;
pub mod validate;

use std::path::{Path, PathBuf};

pub use schema::*;
pub use validate::{ValidationError, is_valid_calculation_name, validate_config};

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Yaml,
}

fn format_for(path: &Path) -> Format {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
            Format::Yaml
        }
        _ => Format::Json,
    }
}

/// Default file name for an unnamed save: `quantics_config_<timestamp>.json`.
pub fn default_config_path() -> PathBuf {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    PathBuf::from(format!("quantics_config_{}.json", timestamp))
}

pub fn default_config() -> QuanticsConfig {
    QuanticsConfig::default()
}

/// Save `config`, returning the path written.
pub fn save_config(config: &QuanticsConfig, path: Option<&Path>) -> ConfigResult<PathBuf> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    match format_for(&path) {
        Format::Json => save_json(&path, config)?,
        Format::Yaml => save_yaml(&path, config)?,
    }
    Ok(path)
}

pub fn load_config(path: &Path) -> ConfigResult<QuanticsConfig> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    match format_for(path) {
        Format::Json => load_json(path),
        Format::Yaml => load_yaml(path),
    }
}

pub fn load_json(path: &Path) -> ConfigResult<QuanticsConfig> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

pub fn save_json(path: &Path, config: &QuanticsConfig) -> ConfigResult<()> {
    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

pub fn load_yaml(path: &Path) -> ConfigResult<QuanticsConfig> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&content)?)
}

pub fn save_yaml(path: &Path, config: &QuanticsConfig) -> ConfigResult<()> {
    let content = serde_yaml::to_string(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
