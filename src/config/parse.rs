use super::settings::StreamSettings;
use super::types::*;
use crate::config::{expand_env_vars, expand_tilde, unexpanded_env_vars};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid pattern: {0}")]
    InvalidRegex(#[from] regex::Error),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let mut config = read_config_file(path)?;

    if let Some(dir) = config.general.additional_configs_dir.clone() {
        merge_additional_configs(&mut config, &dir)?;
    }

    validate_config(&config)?;
    Ok(config)
}

/// Read, expand and parse one YAML file.
fn read_config_file(path: &Path) -> Result<Config, ConfigError> {
    let yaml_string = fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to open config file '{}': {}", path.display(), e),
        ))
    })?;

    // Expand environment variables in the YAML string before parsing
    let yaml_string = expand_env_vars(&yaml_string);
    check_unexpanded_vars(&yaml_string)?;

    let mut config: Config = serde_yaml::from_str(&yaml_string).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), e),
        ))
    })?;

    expand_paths(&mut config);
    Ok(config)
}

/// Checks for unexpanded environment variables and returns a helpful error
fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let unexpanded_vars = unexpanded_env_vars(yaml_string);
    if unexpanded_vars.is_empty() {
        return Ok(());
    }

    let error_msg = if unexpanded_vars.len() == 1 {
        format!(
            "Environment variable $env{{{0}}} is not set.\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variable: export {0}=value\n\
             2. Replace $env{{{0}}} in the config file with an actual value",
            unexpanded_vars[0]
        )
    } else {
        format!(
            "Environment variables are not set: {}\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variables\n\
             2. Replace the variables in the config file with actual values",
            unexpanded_vars.join(", ")
        )
    };

    Err(ConfigError::Validation(error_msg))
}

/// Expands tilde (~) in all PathBuf fields in the config.
fn expand_paths(config: &mut Config) {
    for stream in config.streams.values_mut() {
        stream.file = expand_tilde(&stream.file);
    }
    config.general.state_file = expand_tilde(&config.general.state_file);
    if let Some(dir) = config.general.additional_configs_dir.as_mut() {
        *dir = expand_tilde(dir);
    }
}

/// Merge the stream sections of every file in `dir`, in file name order.
/// Streams already defined keep their definition.
fn merge_additional_configs(config: &mut Config, dir: &Path) -> Result<(), ConfigError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Cannot read additional configs directory");
            return Ok(());
        }
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();

    for file in files {
        let additional = read_config_file(&file)?;
        info!(file = %file.display(), streams = additional.streams.len(), "Loaded additional config");
        for (key, stream) in additional.streams {
            if config.streams.contains_key(&key) {
                warn!(stream = %key, file = %file.display(), "Duplicate stream in additional config, ignoring");
                continue;
            }
            config.streams.insert(key, stream);
        }
    }
    Ok(())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.streams.is_empty() {
        errors.push("at least one stream must be configured".to_string());
    }
    for (key, stream) in &config.streams {
        if let Err(ConfigError::ValidationList(mut stream_errors)) =
            StreamSettings::from_config(key, stream)
        {
            errors.append(&mut stream_errors);
        }
    }
    if let Some(endpoint) = &config.general.endpoint {
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            errors.push(format!("general: endpoint '{}' must be an http(s) URL", endpoint));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

/// Normalise every stream section of a loaded config.
pub fn stream_settings(config: &Config) -> Result<Vec<StreamSettings>, ConfigError> {
    config
        .streams
        .iter()
        .map(|(key, stream)| StreamSettings::from_config(key, stream))
        .collect()
}
