use crate::source::encoding;
use crate::source::timestamp::DateTimeParser;
use encoding_rs::{Encoding, UTF_8};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Protocol overhead charged for every event on top of its message bytes.
pub const PER_EVENT_OVERHEAD: usize = 26;
/// Largest event the ingestion API accepts, overhead included.
pub const MAX_EVENT_SIZE: usize = 256 * 1024;

/// How an event's timestamp was obtained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimestampStatus {
    #[default]
    NotEvaluated,
    Valid,
    FallbackCurrentTime,
    FallbackPreviousEventTime,
}

/// The part of the previously read event that a new event may inherit its
/// timestamp from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviousEvent {
    pub timestamp: Option<i64>,
    pub status: TimestampStatus,
}

impl PreviousEvent {
    fn usable_timestamp(&self) -> Option<i64> {
        match self.status {
            TimestampStatus::Valid | TimestampStatus::FallbackPreviousEventTime => self.timestamp,
            TimestampStatus::NotEvaluated | TimestampStatus::FallbackCurrentTime => None,
        }
    }
}

/// Decoding and timestamp parsing shared by every event of one reader.
#[derive(Debug, Clone)]
pub struct EventContext {
    pub encoding: &'static Encoding,
    pub parser: Option<Arc<DateTimeParser>>,
}

impl Default for EventContext {
    fn default() -> Self {
        Self {
            encoding: UTF_8,
            parser: None,
        }
    }
}

/// One (possibly multi-line) log record.
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub timestamp: Option<i64>,
    pub message: String,
    pub size_in_bytes: usize,
    /// File fingerprint, `None` for standard input.
    pub source_id: Option<String>,
    pub sequence_token: Option<String>,
    pub start_position: Option<u64>,
    pub end_position: Option<u64>,
    pub is_replay: bool,
    pub is_last_replay: bool,
    pub timestamp_status: TimestampStatus,
    pub batch_timestamp: Option<i64>,
    pub previous: Option<PreviousEvent>,
    context: EventContext,
    started: bool,
}

impl LogEvent {
    pub fn new(context: EventContext) -> Self {
        Self {
            timestamp: None,
            message: String::new(),
            size_in_bytes: 0,
            source_id: None,
            sequence_token: None,
            start_position: None,
            end_position: None,
            is_replay: false,
            is_last_replay: false,
            timestamp_status: TimestampStatus::NotEvaluated,
            batch_timestamp: None,
            previous: None,
            context,
            started: false,
        }
    }

    /// A UTF-8 event with a known timestamp. Mostly useful in tests.
    pub fn with_message(message: &str, timestamp: i64) -> Self {
        let mut event = Self::new(EventContext::default());
        event.append_text(message);
        event.timestamp = Some(timestamp);
        event
    }

    /// Append raw bytes read from a source, decoding them with the configured
    /// encoding.
    pub fn append_message(&mut self, bytes: &[u8]) {
        let (text, lossy) = encoding::decode(bytes, self.context.encoding);
        if lossy {
            warn!(
                start_position = ?self.start_position,
                end_position = ?self.end_position,
                encoding = self.context.encoding.name(),
                "Decode event with replace, unable to decode with configured encoding"
            );
        }
        self.append_text(&text);
    }

    /// Append already decoded text. The first append opens the message and
    /// charges the per-event overhead; later appends are continuation lines.
    pub fn append_text(&mut self, text: &str) {
        let mut size = text.len();
        let mut content = text;
        let marker;

        if self.exceeds_limit(size) {
            marker = format!("[TRUNCATED MESSAGE] {} bytes are truncated.", size);
            warn!(
                timestamp = ?self.timestamp,
                start_position = ?self.start_position,
                end_position = ?self.end_position,
                "Truncate event, single event exceeds size limit"
            );
            size = marker.len();
            content = &marker;
            if self.started && self.exceeds_limit(size) {
                return;
            }
        }

        if self.started {
            self.message.push('\n');
            self.message.push_str(content);
            self.size_in_bytes += size + 1;
        } else {
            self.message.push_str(content);
            self.size_in_bytes += size + PER_EVENT_OVERHEAD;
            self.started = true;
        }
    }

    fn exceeds_limit(&self, size: usize) -> bool {
        if self.started {
            self.size_in_bytes + size > MAX_EVENT_SIZE - 1
        } else {
            self.size_in_bytes + size > MAX_EVENT_SIZE - PER_EVENT_OVERHEAD
        }
    }

    /// Resolve the event timestamp.
    ///
    /// Returns `false` when the timestamp could not be parsed from the message
    /// and a fallback (previous event time or current time) was used. Calling
    /// it again leaves timestamp and status unchanged.
    ///
    /// A timestamp set before the first call (replayed or constructed events)
    /// is marked valid; a fallback status from an earlier call is kept, so a
    /// repeat call returns `false` again rather than promoting it to valid.
    pub fn complete(&mut self) -> bool {
        if self.timestamp.is_some() {
            if self.timestamp_status == TimestampStatus::NotEvaluated {
                self.timestamp_status = TimestampStatus::Valid;
            }
            return self.timestamp_status == TimestampStatus::Valid;
        }

        let Some(parser) = &self.context.parser else {
            self.timestamp = Some(current_millis());
            self.timestamp_status = TimestampStatus::Valid;
            return true;
        };

        if let Some(timestamp) = parser.parse(&self.message) {
            self.timestamp = Some(timestamp);
            self.timestamp_status = TimestampStatus::Valid;
            return true;
        }

        match self.previous.and_then(|p| p.usable_timestamp()) {
            Some(timestamp) => {
                self.timestamp = Some(timestamp);
                self.timestamp_status = TimestampStatus::FallbackPreviousEventTime;
            }
            None => {
                self.timestamp = Some(current_millis());
                self.timestamp_status = TimestampStatus::FallbackCurrentTime;
            }
        }
        false
    }

    /// The timestamp, or 0 before `complete()` has run.
    pub fn timestamp_or_zero(&self) -> i64 {
        self.timestamp.unwrap_or(0)
    }

    pub fn as_previous(&self) -> PreviousEvent {
        PreviousEvent {
            timestamp: self.timestamp,
            status: self.timestamp_status,
        }
    }
}

impl PartialEq for LogEvent {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp
            && self.message == other.message
            && self.source_id == other.source_id
            && self.sequence_token == other.sequence_token
            && self.start_position == other.start_position
            && self.end_position == other.end_position
            && self.is_replay == other.is_replay
            && self.is_last_replay == other.is_last_replay
            && self.batch_timestamp == other.batch_timestamp
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn current_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
