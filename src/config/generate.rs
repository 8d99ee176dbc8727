pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# LOGPUSH CONFIGURATION
# =============================================================================
# This file maps local log files to log groups and log streams.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/logpush/config.yml
#   3. /etc/logpush/config.yml
#
# Values of the form $env{VAR} are replaced with environment variables before
# the file is parsed.

# =============================================================================
# GENERAL
# =============================================================================

general:
  # Database holding read positions and sequence tokens across restarts
  state_file: ~/.local/share/logpush/state.duckdb

  # Events (or batches) buffered between a reader and its publisher
  queue_size: 10

  # Ingestion endpoint and credentials
  endpoint: https://logs.example.com
  # api_key: $env{LOGPUSH_API_KEY}

  # Every file in this directory may add more streams
  # additional_configs_dir: /etc/logpush/conf.d

# =============================================================================
# STREAMS
# =============================================================================
# Each entry tails the newest file matching `file`. Older matches are treated
# as rotated copies; compressed archives are ignored.

streams:
  app:
    file: /var/log/app/app.log*
    # {hostname} and {ip_address} are replaced at startup
    log_group_name: app
    log_stream_name: '{hostname}'

    # Milliseconds to buffer events before publishing (minimum 5000)
    buffer_duration: 5000

    # strftime format of the timestamp inside each event
    datetime_format: '%Y-%m-%d %H:%M:%S,%f'
    # UTC or LOCAL, used when the format has no %z
    time_zone: LOCAL

    # start_of_file or end_of_file, only used the first time a stream is seen
    initial_position: start_of_file

    encoding: utf_8

    # Lines that do not match start a continuation of the previous event.
    # '{datetime_format}' reuses the timestamp pattern.
    multi_line_start_pattern: '{datetime_format}'

    # Batch limits
    batch_size: 32768
    batch_count: 1000

    # Lines hashed to recognise a file across renames: N or N-M
    file_fingerprint_lines: '1'

  syslog:
    file: /var/log/syslog
    log_group_name: system
    log_stream_name: '{hostname}-syslog'
    datetime_format: '%b %d %H:%M:%S'
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::Config;
    use crate::config::StreamSettings;

    #[test]
    fn test_starter_config_parses() {
        let config: Config = serde_yaml::from_str(&generate_starter_config()).unwrap();
        assert_eq!(config.streams.len(), 2);
        for (key, stream) in &config.streams {
            let settings = StreamSettings::from_config(key, stream).unwrap();
            assert!(settings.parser.is_some(), "stream {} has a datetime format", key);
        }
    }
}
