use super::parse::ConfigError;
use super::types::*;
use crate::pipeline::batch::BatchLimits;
use crate::source::encoding::resolve_encoding;
use crate::source::event::EventContext;
use crate::source::timestamp::DateTimeParser;
use encoding_rs::{Encoding, UTF_8};
use regex::bytes::Regex;
use std::net::UdpSocket;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

const HOSTNAME_PLACEHOLDER: &str = "{hostname}";
const IP_ADDRESS_PLACEHOLDER: &str = "{ip_address}";

/// A stream section after validation and normalisation. Every field holds a
/// usable value; bad values in the file have already been replaced by their
/// defaults.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub stream_key: String,
    pub file: PathBuf,
    pub log_group_name: String,
    pub log_stream_name: String,
    pub buffer_duration: i64,
    pub parser: Option<Arc<DateTimeParser>>,
    pub time_zone: TimeZone,
    pub encoding: &'static Encoding,
    pub initial_position: InitialPosition,
    pub multi_line_start: Regex,
    pub batch_limits: BatchLimits,
    pub fingerprint_lines: FingerprintLines,
}

impl StreamSettings {
    pub fn from_config(stream_key: &str, raw: &StreamConfig) -> Result<Self, ConfigError> {
        let mut missing = Vec::new();
        if raw.file.as_os_str().is_empty() {
            missing.push(format!("stream '{}': 'file' is required", stream_key));
        }
        if raw.log_group_name.trim().is_empty() {
            missing.push(format!("stream '{}': 'log_group_name' is required", stream_key));
        }
        if raw.log_stream_name.trim().is_empty() {
            missing.push(format!("stream '{}': 'log_stream_name' is required", stream_key));
        }
        if !missing.is_empty() {
            return Err(ConfigError::ValidationList(missing));
        }

        let time_zone = normalize_time_zone(stream_key, raw.time_zone.as_deref());
        let parser = raw
            .datetime_format
            .as_deref()
            .and_then(|format| build_parser(stream_key, format, time_zone));

        Ok(Self {
            stream_key: stream_key.to_string(),
            file: raw.file.clone(),
            log_group_name: substitute_placeholders(&raw.log_group_name),
            log_stream_name: substitute_placeholders(&raw.log_stream_name),
            buffer_duration: normalize_buffer_duration(stream_key, raw.buffer_duration.as_ref()),
            multi_line_start: normalize_multi_line_start(
                stream_key,
                raw.multi_line_start_pattern.as_deref(),
                parser.as_deref(),
            )?,
            parser,
            time_zone,
            encoding: normalize_encoding(stream_key, raw.encoding.as_deref()),
            initial_position: normalize_initial_position(stream_key, raw.initial_position.as_deref()),
            batch_limits: BatchLimits {
                max_batch_size: normalize_limit(
                    stream_key,
                    "batch_size",
                    raw.batch_size.as_ref(),
                    DEFAULT_BATCH_SIZE,
                    MAX_BATCH_SIZE,
                ),
                max_events: normalize_limit(
                    stream_key,
                    "batch_count",
                    raw.batch_count.as_ref(),
                    DEFAULT_BATCH_COUNT,
                    MAX_BATCH_COUNT,
                ),
            },
            fingerprint_lines: normalize_fingerprint_lines(
                stream_key,
                raw.file_fingerprint_lines.as_ref(),
            ),
        })
    }

    /// Decoding and timestamp parsing for the events of this stream.
    pub fn event_context(&self) -> EventContext {
        EventContext {
            encoding: self.encoding,
            parser: self.parser.clone(),
        }
    }

    /// The file pattern as a string for glob matching.
    pub fn file_pattern(&self) -> String {
        self.file.to_string_lossy().into_owned()
    }
}

/// Resolve the `general.queue_size` setting.
pub fn normalize_queue_size(value: Option<&Setting>) -> usize {
    match value {
        None => DEFAULT_QUEUE_SIZE,
        Some(setting) => match setting.as_i64() {
            Some(n) if n > 0 => n as usize,
            _ => {
                warn!(
                    value = %setting,
                    default = DEFAULT_QUEUE_SIZE,
                    "Invalid queue_size, using default"
                );
                DEFAULT_QUEUE_SIZE
            }
        },
    }
}

pub fn normalize_buffer_duration(stream_key: &str, value: Option<&Setting>) -> i64 {
    let Some(setting) = value else {
        return DEFAULT_BUFFER_DURATION_MS as i64;
    };
    match setting.as_i64() {
        Some(ms) if ms >= MIN_BUFFER_DURATION_MS as i64 => ms,
        Some(ms) => {
            warn!(
                stream = stream_key,
                value = ms,
                min_buffer_duration = MIN_BUFFER_DURATION_MS,
                "buffer_duration is below the minimum, using the minimum"
            );
            MIN_BUFFER_DURATION_MS as i64
        }
        None => {
            warn!(
                stream = stream_key,
                value = %setting,
                default = DEFAULT_BUFFER_DURATION_MS,
                "Invalid buffer_duration, using default"
            );
            DEFAULT_BUFFER_DURATION_MS as i64
        }
    }
}

pub fn normalize_time_zone(stream_key: &str, value: Option<&str>) -> TimeZone {
    let Some(name) = value else {
        return TimeZone::default();
    };
    TimeZone::from_name(name.trim()).unwrap_or_else(|| {
        warn!(stream = stream_key, value = name, "Invalid time_zone, using LOCAL");
        TimeZone::default()
    })
}

fn build_parser(stream_key: &str, format: &str, time_zone: TimeZone) -> Option<Arc<DateTimeParser>> {
    match DateTimeParser::new(format, time_zone) {
        Ok(parser) => Some(Arc::new(parser)),
        Err(e) => {
            warn!(
                stream = stream_key,
                datetime_format = format,
                error = %e,
                "Invalid datetime_format, events will use the current time"
            );
            None
        }
    }
}

pub fn normalize_encoding(stream_key: &str, value: Option<&str>) -> &'static Encoding {
    let name = value.unwrap_or(DEFAULT_ENCODING);
    resolve_encoding(name).unwrap_or_else(|| {
        warn!(stream = stream_key, encoding = name, "Unknown encoding, using utf_8");
        UTF_8
    })
}

pub fn normalize_initial_position(stream_key: &str, value: Option<&str>) -> InitialPosition {
    let Some(name) = value else {
        return InitialPosition::default();
    };
    InitialPosition::from_name(name.trim()).unwrap_or_else(|| {
        warn!(
            stream = stream_key,
            value = name,
            "Invalid initial_position, using start_of_file"
        );
        InitialPosition::default()
    })
}

/// Compile the multi-line start pattern. A match anywhere in a line starts a
/// new event; `{datetime_format}` stands for the timestamp pattern.
pub fn normalize_multi_line_start(
    stream_key: &str,
    value: Option<&str>,
    parser: Option<&DateTimeParser>,
) -> Result<Regex, regex::Error> {
    let Some(pattern) = value else {
        return Regex::new(DEFAULT_MULTI_LINE_START_PATTERN);
    };

    let pattern = if pattern == DATETIME_FORMAT_PLACEHOLDER {
        match parser {
            Some(parser) => parser.pattern().to_string(),
            None => {
                warn!(
                    stream = stream_key,
                    "multi_line_start_pattern refers to {{datetime_format}} but no valid \
                     datetime_format is set, using default"
                );
                return Regex::new(DEFAULT_MULTI_LINE_START_PATTERN);
            }
        }
    } else {
        pattern.to_string()
    };

    match Regex::new(&pattern) {
        Ok(regex) => Ok(regex),
        Err(e) => {
            warn!(
                stream = stream_key,
                pattern = %pattern,
                error = %e,
                "Invalid multi_line_start_pattern, using default"
            );
            Regex::new(DEFAULT_MULTI_LINE_START_PATTERN)
        }
    }
}

fn normalize_limit(
    stream_key: &str,
    name: &str,
    value: Option<&Setting>,
    default: usize,
    max: usize,
) -> usize {
    let Some(setting) = value else {
        return default;
    };
    match setting.as_i64() {
        Some(n) if n > 0 && n as usize <= max => n as usize,
        Some(n) if n > 0 => {
            warn!(stream = stream_key, setting = name, value = n, max, "Value above maximum, using maximum");
            max
        }
        _ => {
            warn!(stream = stream_key, setting = name, value = %setting, default, "Invalid value, using default");
            default
        }
    }
}

pub fn normalize_fingerprint_lines(stream_key: &str, value: Option<&Setting>) -> FingerprintLines {
    let Some(setting) = value else {
        return FingerprintLines::default();
    };
    FingerprintLines::parse(&setting.to_string()).unwrap_or_else(|| {
        warn!(
            stream = stream_key,
            value = %setting,
            default = DEFAULT_FILE_FINGERPRINT_LINES,
            "Invalid file_fingerprint_lines, using default"
        );
        FingerprintLines::default()
    })
}

/// Replace `{hostname}` and `{ip_address}` in a group or stream name.
pub fn substitute_placeholders(name: &str) -> String {
    let mut name = name.to_string();
    if name.contains(HOSTNAME_PLACEHOLDER) {
        name = name.replace(HOSTNAME_PLACEHOLDER, &local_hostname());
    }
    if name.contains(IP_ADDRESS_PLACEHOLDER) {
        name = name.replace(IP_ADDRESS_PLACEHOLDER, &local_ip_address());
    }
    name
}

fn local_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|e| {
            warn!(error = %e, "Failed to resolve hostname");
            "localhost".to_string()
        })
}

/// Address of the interface used for outbound traffic. Connecting a UDP
/// socket sends nothing.
fn local_ip_address() -> String {
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:80")?;
            socket.local_addr()
        })
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|e| {
            warn!(error = %e, "Failed to resolve local ip address");
            "127.0.0.1".to_string()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> StreamConfig {
        StreamConfig {
            file: PathBuf::from("/var/log/app.log"),
            log_group_name: "group".to_string(),
            log_stream_name: "stream".to_string(),
            ..StreamConfig::default()
        }
    }

    #[test]
    fn test_defaults() {
        let settings = StreamSettings::from_config("app", &raw()).unwrap();
        assert_eq!(settings.buffer_duration, 5000);
        assert_eq!(settings.time_zone, TimeZone::Local);
        assert_eq!(settings.encoding, UTF_8);
        assert_eq!(settings.initial_position, InitialPosition::StartOfFile);
        assert_eq!(settings.batch_limits, BatchLimits::default());
        assert_eq!(settings.fingerprint_lines, FingerprintLines::default());
        assert!(settings.parser.is_none());
        assert!(settings.multi_line_start.is_match(b"start"));
        assert!(!settings.multi_line_start.is_match(b"  continued"));
    }

    #[test]
    fn test_missing_required_fields() {
        let mut config = raw();
        config.log_group_name = String::new();
        config.log_stream_name = " ".to_string();
        match StreamSettings::from_config("app", &config) {
            Err(ConfigError::ValidationList(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected validation errors, got {:?}", other.map(|s| s.stream_key)),
        }
    }

    #[test]
    fn test_bad_values_fall_back() {
        let mut config = raw();
        config.buffer_duration = Some(Setting::Number(100));
        config.time_zone = Some("PST".to_string());
        config.encoding = Some("klingon".to_string());
        config.initial_position = Some("middle".to_string());
        config.multi_line_start_pattern = Some("(unclosed".to_string());
        config.batch_size = Some(Setting::Number(10 * 1024 * 1024));
        config.batch_count = Some(Setting::Text("lots".to_string()));
        config.file_fingerprint_lines = Some(Setting::Text("0".to_string()));
        config.datetime_format = Some("%Q".to_string());

        let settings = StreamSettings::from_config("app", &config).unwrap();
        assert_eq!(settings.buffer_duration, 5000);
        assert_eq!(settings.time_zone, TimeZone::Local);
        assert_eq!(settings.encoding, UTF_8);
        assert_eq!(settings.initial_position, InitialPosition::StartOfFile);
        assert_eq!(settings.batch_limits.max_batch_size, MAX_BATCH_SIZE);
        assert_eq!(settings.batch_limits.max_events, DEFAULT_BATCH_COUNT);
        assert_eq!(settings.fingerprint_lines, FingerprintLines::default());
        assert!(settings.parser.is_none());
        assert!(settings.multi_line_start.is_match(b"x"));
    }

    #[test]
    fn test_valid_values_are_kept() {
        let mut config = raw();
        config.buffer_duration = Some(Setting::Text("15000".to_string()));
        config.time_zone = Some("UTC".to_string());
        config.encoding = Some("latin_1".to_string());
        config.initial_position = Some("end_of_file".to_string());
        config.batch_count = Some(Setting::Number(50));
        config.file_fingerprint_lines = Some(Setting::Text("2-3".to_string()));

        let settings = StreamSettings::from_config("app", &config).unwrap();
        assert_eq!(settings.buffer_duration, 15000);
        assert_eq!(settings.time_zone, TimeZone::Utc);
        assert_ne!(settings.encoding, UTF_8);
        assert_eq!(settings.initial_position, InitialPosition::EndOfFile);
        assert_eq!(settings.batch_limits.max_events, 50);
        assert_eq!(settings.fingerprint_lines, FingerprintLines { start: 2, end: 3 });
    }

    #[test]
    fn test_multi_line_pattern_matches_anywhere_in_line() {
        let mut config = raw();
        config.multi_line_start_pattern = Some(r"\[\d+\]".to_string());
        let settings = StreamSettings::from_config("app", &config).unwrap();
        assert!(settings.multi_line_start.is_match(b"[12] boot"));
        assert!(settings.multi_line_start.is_match(b"see [12]"));
        assert!(!settings.multi_line_start.is_match(b"see twelve"));

        config.multi_line_start_pattern = Some(r"^\[\d+\]".to_string());
        let settings = StreamSettings::from_config("app", &config).unwrap();
        assert!(!settings.multi_line_start.is_match(b"see [12]"));
    }

    #[test]
    fn test_multi_line_pattern_from_datetime_format() {
        let mut config = raw();
        config.datetime_format = Some("%b %d %H:%M:%S".to_string());
        config.multi_line_start_pattern = Some(DATETIME_FORMAT_PLACEHOLDER.to_string());
        let settings = StreamSettings::from_config("app", &config).unwrap();
        assert!(settings.parser.is_some());
        assert!(settings.multi_line_start.is_match(b"MAR 04 05:06:07 kernel: up"));
        assert!(!settings.multi_line_start.is_match(b"Traceback (most recent call last):"));
    }

    #[test]
    fn test_placeholders() {
        let name = substitute_placeholders("app-{hostname}-{ip_address}");
        assert!(!name.contains("{hostname}"));
        assert!(!name.contains("{ip_address}"));
        assert_eq!(substitute_placeholders("plain"), "plain");
    }

    #[test]
    fn test_queue_size() {
        assert_eq!(normalize_queue_size(None), DEFAULT_QUEUE_SIZE);
        assert_eq!(normalize_queue_size(Some(&Setting::Number(25))), 25);
        assert_eq!(normalize_queue_size(Some(&Setting::Number(-1))), DEFAULT_QUEUE_SIZE);
    }
}
