//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::KilnConfig;
use std::path::Path;

/// Name of the configuration file looked up in a project directory.
pub const CONFIG_FILE: &str = "kiln.toml";

/// Loads and validates `<project_dir>/kiln.toml`.
pub fn load_config(project_dir: &Path) -> Result<KilnConfig, ConfigError> {
    load_config_file(&project_dir.join(CONFIG_FILE))
}

/// Loads and validates a configuration file at an explicit path.
pub fn load_config_file(path: &Path) -> Result<KilnConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    load_config_from_str(&content)
}

/// Parses and validates a `kiln.toml` configuration from a string.
///
/// Useful for testing without filesystem dependencies.
pub fn load_config_from_str(content: &str) -> Result<KilnConfig, ConfigError> {
    let config: KilnConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Checks values serde cannot: non-empty names and sane extensions.
pub fn validate_config(config: &KilnConfig) -> Result<(), ConfigError> {
    let ext = &config.compile.extension;
    if ext.is_empty() {
        return Err(ConfigError::ValidationError(
            "compile.extension must not be empty".to_string(),
        ));
    }
    if ext.starts_with('.') || ext.contains('/') || ext.contains('\\') {
        return Err(ConfigError::ValidationError(format!(
            "compile.extension '{ext}' must be a bare extension such as \"xxc\""
        )));
    }
    for (field, value) in [("engine.line", &config.engine.line), ("engine.build", &config.engine.build)] {
        if value.as_deref().is_some_and(str::is_empty) {
            return Err(ConfigError::ValidationError(format!("{field} must not be empty")));
        }
    }
    for (name, runtime) in &config.runtimes {
        if runtime.path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "runtimes.{name}.path must not be empty"
            )));
        }
    }
    Ok(())
}
