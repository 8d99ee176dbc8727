use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

pub const DEFAULT_STATE_FILE: &str = "logpush-state.duckdb";
pub const DEFAULT_QUEUE_SIZE: usize = 10;
pub const DEFAULT_BUFFER_DURATION_MS: u64 = 5000;
pub const MIN_BUFFER_DURATION_MS: u64 = 5000;
pub const DEFAULT_ENCODING: &str = "utf_8";
pub const DEFAULT_MULTI_LINE_START_PATTERN: &str = r"^[^\s]";
pub const DATETIME_FORMAT_PLACEHOLDER: &str = "{datetime_format}";
pub const DEFAULT_FILE_FINGERPRINT_LINES: &str = "1";
pub const DEFAULT_BATCH_SIZE: usize = 32 * 1024;
pub const MAX_BATCH_SIZE: usize = 1024 * 1024;
pub const DEFAULT_BATCH_COUNT: usize = 1000;
pub const MAX_BATCH_COUNT: usize = 10000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub streams: BTreeMap<String, StreamConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    #[serde(default)]
    pub queue_size: Option<Setting>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub additional_configs_dir: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
            queue_size: None,
            endpoint: None,
            api_key: None,
            additional_configs_dir: None,
        }
    }
}

fn default_state_file() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_FILE)
}

/// One configured file-pattern to log-group/log-stream mapping, as written in
/// the config file. Values are kept loose here so that a bad value can be
/// reported and replaced by its default instead of failing the whole file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamConfig {
    pub file: PathBuf,
    #[serde(default)]
    pub log_group_name: String,
    #[serde(default)]
    pub log_stream_name: String,
    #[serde(default)]
    pub buffer_duration: Option<Setting>,
    #[serde(default)]
    pub datetime_format: Option<String>,
    #[serde(default)]
    pub time_zone: Option<String>,
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub initial_position: Option<String>,
    #[serde(default)]
    pub multi_line_start_pattern: Option<String>,
    #[serde(default)]
    pub batch_size: Option<Setting>,
    #[serde(default)]
    pub batch_count: Option<Setting>,
    #[serde(default)]
    pub file_fingerprint_lines: Option<Setting>,
}

/// A scalar config value that may have been written as a number or a string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Setting {
    Number(i64),
    Text(String),
}

impl Setting {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Setting::Number(n) => Some(*n),
            Setting::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Setting::Number(n) => write!(f, "{}", n),
            Setting::Text(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeZone {
    #[serde(rename = "UTC")]
    Utc,
    #[default]
    #[serde(rename = "LOCAL")]
    Local,
}

impl TimeZone {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "UTC" => Some(TimeZone::Utc),
            "LOCAL" => Some(TimeZone::Local),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialPosition {
    #[default]
    StartOfFile,
    EndOfFile,
}

impl InitialPosition {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "start_of_file" => Some(InitialPosition::StartOfFile),
            "end_of_file" => Some(InitialPosition::EndOfFile),
            _ => None,
        }
    }
}

/// Inclusive, 1-based range of lines hashed into a file fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FingerprintLines {
    pub start: usize,
    pub end: usize,
}

impl Default for FingerprintLines {
    fn default() -> Self {
        Self { start: 1, end: 1 }
    }
}

impl FingerprintLines {
    /// Parse `N` or `N-M`. `N-` and `N-M` with `M < N` yield an empty range
    /// ending before `N`, which never produces a fingerprint.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let (start, end) = match value.split_once('-') {
            Some((start, end)) => (start, end),
            None => (value, value),
        };
        if start.is_empty() || !start.bytes().all(|b| b.is_ascii_digit()) || start.starts_with('0') {
            return None;
        }
        let start: usize = start.parse().ok()?;
        let end: usize = if end.is_empty() {
            0
        } else if end.bytes().all(|b| b.is_ascii_digit()) {
            end.parse().ok()?
        } else {
            return None;
        };
        Some(Self { start, end })
    }
}
