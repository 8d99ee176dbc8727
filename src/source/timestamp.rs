use crate::config::types::TimeZone;
use chrono::{DateTime, Datelike, Local, NaiveDateTime, TimeZone as _, Utc};
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TimestampError {
    #[error("regex compilation failed: {0}")]
    InvalidRegex(#[from] regex::Error),

    #[error("unsupported directive '%{0}' in datetime format")]
    UnsupportedDirective(char),

    #[error("datetime format '{0}' ends with a dangling '%'")]
    DanglingPercent(String),

    #[error("datetime format '{0}' has no directives")]
    NoDirectives(String),

    #[error("failed to parse timestamp '{value}' with format '{format}': {source}")]
    ParseError {
        value: String,
        format: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("local time '{0}' is ambiguous or does not exist")]
    InvalidLocalTime(String),
}

const MONTHS_ABBR: &str = "jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec";
const MONTHS_FULL: &str =
    "january|february|march|april|may|june|july|august|september|october|november|december";
const DAYS_ABBR: &str = "mon|tue|wed|thu|fri|sat|sun";
const DAYS_FULL: &str = "monday|tuesday|wednesday|thursday|friday|saturday|sunday";

/// Finds and parses a timestamp inside a log message using a strftime-style
/// format such as `%Y-%m-%d %H:%M:%S,%f`.
///
/// The format is compiled into a search regex so the timestamp does not have
/// to start the line. Month and weekday names match case-insensitively.
#[derive(Debug)]
pub struct DateTimeParser {
    format: String,
    chrono_format: String,
    pattern: Regex,
    time_zone: TimeZone,
    has_offset: bool,
    has_year: bool,
    has_date: bool,
}

impl DateTimeParser {
    pub fn new(format: &str, time_zone: TimeZone) -> Result<Self, TimestampError> {
        let mut regex = String::from("(?i)");
        let mut chrono_format = String::new();
        let mut directives = 0usize;
        let mut has_offset = false;
        let mut has_year = false;
        let mut has_date = false;

        let mut chars = format.chars();
        while let Some(c) = chars.next() {
            if c != '%' {
                regex.push_str(&regex::escape(&c.to_string()));
                chrono_format.push(c);
                continue;
            }
            let Some(directive) = chars.next() else {
                return Err(TimestampError::DanglingPercent(format.to_string()));
            };
            let fragment = match directive {
                'Y' => {
                    has_year = true;
                    r"\d{4}".to_string()
                }
                'y' => {
                    has_year = true;
                    r"\d{2}".to_string()
                }
                'm' | 'd' | 'H' | 'I' | 'M' | 'S' => r"\d{1,2}".to_string(),
                'e' => r" ?\d{1,2}".to_string(),
                'j' => r"\d{1,3}".to_string(),
                'f' => r"(?P<frac>\d{1,9})".to_string(),
                'p' => "(?:am|pm)".to_string(),
                'b' | 'h' => format!("(?:{})", MONTHS_ABBR),
                'B' => format!("(?:{})", MONTHS_FULL),
                'a' => format!("(?:{})", DAYS_ABBR),
                'A' => format!("(?:{})", DAYS_FULL),
                'z' => {
                    has_offset = true;
                    r"[+-]\d{2}:?\d{2}".to_string()
                }
                'Z' => "[a-z]{1,5}".to_string(),
                '%' => {
                    regex.push('%');
                    chrono_format.push_str("%%");
                    continue;
                }
                other => return Err(TimestampError::UnsupportedDirective(other)),
            };
            if matches!(directive, 'm' | 'd' | 'e' | 'j' | 'b' | 'h' | 'B') {
                has_date = true;
            }
            directives += 1;
            regex.push_str(&fragment);
            if directive == 'f' {
                // Fractions are normalised to nine digits before parsing.
                chrono_format.push_str("%9f");
            } else {
                chrono_format.push('%');
                chrono_format.push(directive);
            }
        }

        if directives == 0 {
            return Err(TimestampError::NoDirectives(format.to_string()));
        }

        Ok(Self {
            format: format.to_string(),
            chrono_format,
            pattern: Regex::new(&regex)?,
            time_zone,
            has_offset,
            has_year,
            has_date,
        })
    }

    /// The search pattern derived from the datetime format.
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    /// Extract a timestamp (epoch millis) from a log message.
    ///
    /// Returns `Ok(None)` when nothing in the message looks like the format.
    pub fn extract(&self, message: &str) -> Result<Option<i64>, TimestampError> {
        let Some(captures) = self.pattern.captures(message) else {
            return Ok(None);
        };
        let Some(whole) = captures.get(0) else {
            return Ok(None);
        };

        let mut value = whole.as_str().to_string();
        if let Some(frac) = captures.name("frac") {
            let digits = frac.as_str();
            let padded = format!("{:0<9}", &digits[..digits.len().min(9)]);
            let start = frac.start() - whole.start();
            value.replace_range(start..start + digits.len(), &padded);
        }

        let mut chrono_format = self.chrono_format.clone();
        let today = match self.time_zone {
            TimeZone::Utc => Utc::now().date_naive(),
            TimeZone::Local => Local::now().date_naive(),
        };
        if !self.has_date {
            value.push_str(&format!(" {:02}-{:02}", today.month(), today.day()));
            chrono_format.push_str(" %m-%d");
        }
        if !self.has_year {
            value.push_str(&format!(" {}", today.year()));
            chrono_format.push_str(" %Y");
        }

        let parse_error = |e: chrono::ParseError| TimestampError::ParseError {
            value: whole.as_str().to_string(),
            format: self.format.clone(),
            source: Box::new(e),
        };

        if self.has_offset {
            let parsed = DateTime::parse_from_str(&value, &chrono_format).map_err(parse_error)?;
            return Ok(Some(parsed.timestamp_millis()));
        }

        let naive = NaiveDateTime::parse_from_str(&value, &chrono_format).map_err(parse_error)?;
        let millis = match self.time_zone {
            TimeZone::Utc => Utc.from_utc_datetime(&naive).timestamp_millis(),
            TimeZone::Local => Local
                .from_local_datetime(&naive)
                .earliest()
                .ok_or_else(|| TimestampError::InvalidLocalTime(value.clone()))?
                .timestamp_millis(),
        };
        Ok(Some(millis))
    }

    /// Parse a message, folding "no match" and "unparseable" into `None`.
    pub fn parse(&self, message: &str) -> Option<i64> {
        self.extract(message).ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;

    fn utc(format: &str) -> DateTimeParser {
        DateTimeParser::new(format, TimeZone::Utc).unwrap()
    }

    fn millis(rfc3339: &str) -> i64 {
        DateTime::parse_from_rfc3339(rfc3339).unwrap().timestamp_millis()
    }

    #[test]
    fn test_iso_like_format() {
        let parser = utc("%Y-%m-%dT%H:%M:%S");
        let ts = parser
            .extract("2025-12-04T02:42:11 some log message")
            .unwrap()
            .unwrap();
        assert_eq!(ts, millis("2025-12-04T02:42:11Z"));
    }

    #[test]
    fn test_timestamp_not_at_line_start() {
        let parser = utc("%d/%b/%Y:%H:%M:%S %z");
        let ts = parser
            .extract("127.0.0.1 - - [04/Dec/2025:02:42:11 +0000] \"GET /index.html\"")
            .unwrap()
            .unwrap();
        assert_eq!(ts, millis("2025-12-04T02:42:11Z"));
    }

    #[test]
    fn test_offset_converted_to_utc() {
        let parser = utc("%Y-%m-%d %H:%M:%S %z");
        let ts = parser
            .extract("2025-12-04 02:42:11 +0530 log message")
            .unwrap()
            .unwrap();
        assert_eq!(ts, millis("2025-12-03T21:12:11Z"));
    }

    #[test]
    fn test_comma_millis() {
        let parser = utc("%Y-%m-%d %H:%M:%S,%f");
        let ts = parser
            .extract("2025-12-04 02:42:11,011 log message")
            .unwrap()
            .unwrap();
        assert_eq!(ts, millis("2025-12-04T02:42:11.011Z"));
    }

    #[test]
    fn test_microsecond_fraction() {
        let parser = utc("%H:%M:%S.%f %Y-%m-%d");
        let ts = parser
            .extract("02:42:11.123456 2025-12-04 message")
            .unwrap()
            .unwrap();
        assert_eq!(ts, millis("2025-12-04T02:42:11.123Z"));
    }

    #[test]
    fn test_month_names_case_insensitive() {
        let parser = utc("%d %b %Y %H:%M:%S");
        let ts = parser.extract("04 DEC 2025 02:42:11 shouting").unwrap().unwrap();
        assert_eq!(ts, millis("2025-12-04T02:42:11Z"));
    }

    #[test]
    fn test_missing_year_uses_current_year() {
        let parser = utc("%b %d %H:%M:%S");
        let ts = parser.extract("Dec 04 02:42:11 host sshd[1]: hi").unwrap().unwrap();
        let parsed = Utc.timestamp_millis_opt(ts).unwrap();
        assert_eq!(parsed.year(), Utc::now().year());
        assert_eq!(parsed.month(), 12);
        assert_eq!(parsed.day(), 4);
    }

    #[test]
    fn test_no_match_returns_none() {
        let parser = utc("%Y-%m-%d %H:%M:%S");
        assert!(parser.extract("this line has no timestamp").unwrap().is_none());
        assert!(parser.parse("this line has no timestamp").is_none());
    }

    #[test]
    fn test_out_of_range_value_is_parse_error() {
        let parser = utc("%Y-%m-%d %H:%M:%S");
        let result = parser.extract("2025-13-45 02:42:11 bogus");
        assert!(matches!(result, Err(TimestampError::ParseError { .. })));
    }

    #[test]
    fn test_unsupported_directive() {
        let result = DateTimeParser::new("%Q", TimeZone::Utc);
        assert!(matches!(result, Err(TimestampError::UnsupportedDirective('Q'))));
    }

    #[test]
    fn test_format_without_directives() {
        let result = DateTimeParser::new("plain text", TimeZone::Utc);
        assert!(matches!(result, Err(TimestampError::NoDirectives(_))));
    }

    #[test]
    fn test_pattern_matches_line_start() {
        let parser = utc("%Y-%m-%d %H:%M:%S");
        let re = Regex::new(parser.pattern()).unwrap();
        assert!(re.is_match("2025-12-04 02:42:11 first"));
        assert!(!re.is_match("    at com.example.Foo"));
    }
}
