pub mod generate;
pub mod parse;
pub mod settings;
pub mod types;

use regex::Regex;
use std::path::{Path, PathBuf};

pub use parse::{load_config, stream_settings, ConfigError};
pub use settings::StreamSettings;
pub use types::{Config, GeneralConfig, StreamConfig};

const ENV_VAR_PATTERN: &str = r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}";

/// Expands environment variables in a string.
/// Supports $env{VAR_NAME} syntax.
/// If an environment variable is not set, it's left unchanged.
pub fn expand_env_vars(text: &str) -> String {
    let Ok(re) = Regex::new(ENV_VAR_PATTERN) else {
        return text.to_string();
    };

    re.replace_all(text, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    })
    .to_string()
}

/// Names of `$env{...}` references left in `text`, sorted and deduplicated.
pub fn unexpanded_env_vars(text: &str) -> Vec<String> {
    let Ok(re) = Regex::new(ENV_VAR_PATTERN) else {
        return Vec::new();
    };
    let mut names: Vec<String> = re
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .collect();
    names.sort();
    names.dedup();
    names
}

/// Expands tilde (~) in paths to the user's home directory.
/// If the path starts with "~/" or is exactly "~", replaces it with the home directory.
/// Returns the path unchanged if it doesn't start with tilde or home directory cannot be determined.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if let Some(rest) = path_str.strip_prefix("~/") {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir.join(rest);
        }
    } else if path_str == "~" {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir;
        }
    }

    path.to_path_buf()
}

/// Resolves the config file path based on explicit argument or default locations.
/// Returns the first existing path from:
/// 1. Explicit path (if provided, with tilde expansion)
/// 2. ~/.config/logpush/config.yml
/// 3. /etc/logpush/config.yml
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(expand_tilde(path));
    }

    if let Some(home_dir) = dirs::home_dir() {
        let user_config = home_dir.join(".config/logpush/config.yml");
        if user_config.exists() {
            return Some(user_config);
        }
    }

    let system_config = PathBuf::from("/etc/logpush/config.yml");
    if system_config.exists() {
        return Some(system_config);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_expand_env_vars_multiple() {
        std::env::set_var("LOGPUSH_TEST_VAR1", "value1");
        std::env::set_var("LOGPUSH_TEST_VAR2", "value2");
        let result = expand_env_vars("$env{LOGPUSH_TEST_VAR1}/middle/$env{LOGPUSH_TEST_VAR2}");
        assert_eq!(result, "value1/middle/value2");
        std::env::remove_var("LOGPUSH_TEST_VAR1");
        std::env::remove_var("LOGPUSH_TEST_VAR2");
    }

    #[test]
    fn test_expand_env_vars_unset_left_alone() {
        let text = "key: $env{LOGPUSH_TEST_NONEXISTENT}";
        assert_eq!(expand_env_vars(text), text);
        assert_eq!(unexpanded_env_vars(text), vec!["LOGPUSH_TEST_NONEXISTENT"]);
    }

    #[test]
    fn test_placeholders_are_not_env_vars() {
        let text = "log_stream_name: '{hostname}-{ip_address}'";
        assert_eq!(expand_env_vars(text), text);
        assert!(unexpanded_env_vars(text).is_empty());
    }

    #[test]
    fn test_expand_tilde_with_path() {
        let expanded = expand_tilde(Path::new("~/test/path"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expanded, home.join("test/path"));
        }
    }

    #[test]
    fn test_expand_tilde_no_expansion() {
        assert_eq!(expand_tilde(Path::new("/absolute/path")), Path::new("/absolute/path"));
        assert_eq!(expand_tilde(Path::new("relative/path")), Path::new("relative/path"));
    }

    #[test]
    fn test_explicit_config_path_wins() {
        assert_eq!(
            resolve_config_path(Some(Path::new("/tmp/custom.yml"))),
            Some(PathBuf::from("/tmp/custom.yml"))
        );
    }
}
