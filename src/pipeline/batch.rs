use crate::config::types::{DEFAULT_BATCH_COUNT, DEFAULT_BATCH_SIZE};
use crate::source::event::{current_millis, LogEvent, TimestampStatus};
use tracing::warn;

const MILLIS_PER_HOUR: i64 = 60 * 60 * 1000;
const MILLIS_PER_DAY: i64 = 24 * MILLIS_PER_HOUR;

/// All events in a batch must fall within one 24 hour period.
pub const MAX_TIME_RANGE_PER_BATCH: i64 = MILLIS_PER_DAY;
pub const MAX_ALLOWED_INTERVAL_IN_FUTURE: i64 = 2 * MILLIS_PER_HOUR;
pub const MAX_ALLOWED_INTERVAL_IN_PAST: i64 = 14 * MILLIS_PER_DAY;

/// Size and count caps for one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_batch_size: usize,
    pub max_events: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_BATCH_SIZE,
            max_events: DEFAULT_BATCH_COUNT,
        }
    }
}

/// Result of offering an event to a batch.
#[derive(Debug)]
pub enum AddOutcome {
    Accepted,
    /// The event is valid but belongs in a new batch. The batch is now
    /// marked for forced publishing.
    Rejected(LogEvent),
    /// The event was dropped and counted as skipped.
    Invalid,
}

/// Accumulates events for a single `PutLogEvents` call.
#[derive(Debug, Clone)]
pub struct EventBatch {
    pub source_id: Option<String>,
    pub buffer_duration: i64,
    pub batch_timestamp: Option<i64>,
    pub events: Vec<LogEvent>,
    pub smallest_timestamp: Option<i64>,
    pub largest_timestamp: Option<i64>,
    pub batch_size_in_bytes: usize,
    pub force_publish: bool,
    pub is_replay: bool,
    pub sequence_token: Option<String>,
    pub skipped_events_count: usize,
    pub fallback_events_count: usize,
    limits: BatchLimits,
}

impl EventBatch {
    pub fn new(buffer_duration: i64, limits: BatchLimits) -> Self {
        Self {
            source_id: None,
            buffer_duration,
            batch_timestamp: None,
            events: Vec::new(),
            smallest_timestamp: None,
            largest_timestamp: None,
            batch_size_in_bytes: 0,
            force_publish: false,
            is_replay: false,
            sequence_token: None,
            skipped_events_count: 0,
            fallback_events_count: 0,
            limits,
        }
    }

    pub fn limits(&self) -> BatchLimits {
        self.limits
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn first_event(&self) -> Option<&LogEvent> {
        self.events.first()
    }

    pub fn last_event(&self) -> Option<&LogEvent> {
        self.events.last()
    }

    pub fn add_event(&mut self, event: LogEvent) -> AddOutcome {
        self.add_event_at(event, current_millis())
    }

    /// Offer an event, using `now` as the batch timestamp if this is the
    /// first event offered.
    pub fn add_event_at(&mut self, event: LogEvent, now: i64) -> AddOutcome {
        if self.events.is_empty() {
            self.source_id = event.source_id.clone();
            self.is_replay = event.is_replay;
            if event.is_replay {
                self.sequence_token = event.sequence_token.clone();
                self.batch_timestamp = event.batch_timestamp;
            } else {
                self.batch_timestamp = Some(now);
            }
        }

        if !self.validate_event(&event) {
            self.skipped_events_count += 1;
            return AddOutcome::Invalid;
        }
        if !self.can_event_be_added(&event) {
            self.force_publish = true;
            return AddOutcome::Rejected(event);
        }

        if event.timestamp_status != TimestampStatus::Valid {
            self.fallback_events_count += 1;
        }
        self.batch_size_in_bytes += event.size_in_bytes;
        self.update_min_max_timestamp(event.timestamp_or_zero());
        self.events.push(event);
        AddOutcome::Accepted
    }

    pub fn should_publish(&self) -> bool {
        self.should_publish_at(current_millis())
    }

    pub fn should_publish_at(&self, now: i64) -> bool {
        let Some(last) = self.events.last() else {
            return false;
        };
        if self.is_replay {
            return last.is_last_replay || self.force_publish;
        }
        if self.force_publish {
            return true;
        }
        match self.batch_timestamp {
            Some(batch_timestamp) => now - batch_timestamp >= self.buffer_duration,
            None => true,
        }
    }

    fn validate_event(&self, event: &LogEvent) -> bool {
        if event.message.trim().is_empty() {
            return false;
        }
        let Some(batch_timestamp) = self.batch_timestamp else {
            return true;
        };
        let timestamp = event.timestamp_or_zero();
        if timestamp > batch_timestamp + MAX_ALLOWED_INTERVAL_IN_FUTURE {
            warn!(
                timestamp,
                start_position = ?event.start_position,
                end_position = ?event.end_position,
                "Skip event, timestamp is more than 2 hours in future"
            );
            return false;
        }
        if timestamp < batch_timestamp - MAX_ALLOWED_INTERVAL_IN_PAST {
            warn!(
                timestamp,
                start_position = ?event.start_position,
                end_position = ?event.end_position,
                "Skip event, timestamp is more than 14 days in past"
            );
            return false;
        }
        true
    }

    fn can_event_be_added(&self, event: &LogEvent) -> bool {
        if self.events.is_empty() {
            return true;
        }
        if event.source_id != self.source_id || event.is_replay != self.is_replay {
            return false;
        }
        if self.batch_size_in_bytes + event.size_in_bytes > self.limits.max_batch_size {
            return false;
        }
        if self.events.len() + 1 > self.limits.max_events {
            return false;
        }
        if let (Some(smallest), Some(largest)) = (self.smallest_timestamp, self.largest_timestamp) {
            let timestamp = event.timestamp_or_zero();
            let range = largest.max(timestamp) - smallest.min(timestamp);
            if range > MAX_TIME_RANGE_PER_BATCH {
                return false;
            }
        }
        true
    }

    fn update_min_max_timestamp(&mut self, timestamp: i64) {
        self.smallest_timestamp = Some(self.smallest_timestamp.map_or(timestamp, |s| s.min(timestamp)));
        self.largest_timestamp = Some(self.largest_timestamp.map_or(timestamp, |l| l.max(timestamp)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(message: &str, timestamp: i64) -> LogEvent {
        let mut event = LogEvent::with_message(message, timestamp);
        event.complete();
        event
    }

    fn batch() -> EventBatch {
        EventBatch::new(5000, BatchLimits::default())
    }

    #[test]
    fn test_time_range_rejection_forces_publish() {
        let now = 499_000_000;
        let mut batch = batch();
        assert!(matches!(batch.add_event_at(event("a", 1000), now), AddOutcome::Accepted));
        assert!(matches!(batch.add_event_at(event("b", 2000), now), AddOutcome::Accepted));
        assert!(!batch.should_publish_at(now));

        match batch.add_event_at(event("c", 500_000_000), now) {
            AddOutcome::Rejected(rejected) => assert_eq!(rejected.timestamp, Some(500_000_000)),
            other => panic!("expected rejection, got {:?}", other),
        }
        assert_eq!(batch.len(), 2);
        assert!(batch.force_publish);
        assert!(batch.should_publish_at(now));
    }

    #[test]
    fn test_buffer_duration() {
        let mut batch = batch();
        batch.add_event_at(event("a", 0), 0);
        assert!(!batch.should_publish_at(4000));
        assert!(batch.should_publish_at(5001));
    }

    #[test]
    fn test_empty_batch_never_publishes() {
        let batch = batch();
        assert!(!batch.should_publish_at(i64::MAX));
    }

    #[test]
    fn test_size_accounting_and_limit() {
        let mut batch = batch();
        let message = "m".repeat(1000);
        let mut accepted = 0;
        loop {
            match batch.add_event_at(event(&message, 10), 10) {
                AddOutcome::Accepted => accepted += 1,
                AddOutcome::Rejected(_) => break,
                AddOutcome::Invalid => panic!("valid event rejected as invalid"),
            }
        }
        let total: usize = batch.events.iter().map(|e| e.size_in_bytes).sum();
        assert_eq!(total, batch.batch_size_in_bytes);
        assert!(batch.batch_size_in_bytes <= DEFAULT_BATCH_SIZE);
        assert_eq!(accepted, DEFAULT_BATCH_SIZE / 1026);
    }

    #[test]
    fn test_count_limit() {
        let mut batch = EventBatch::new(
            5000,
            BatchLimits {
                max_batch_size: DEFAULT_BATCH_SIZE,
                max_events: 2,
            },
        );
        batch.add_event_at(event("a", 10), 10);
        batch.add_event_at(event("b", 10), 10);
        assert!(matches!(batch.add_event_at(event("c", 10), 10), AddOutcome::Rejected(_)));
    }

    #[test]
    fn test_blank_and_out_of_window_events_are_skipped() {
        let now = 100 * MILLIS_PER_DAY;
        let mut batch = batch();
        assert!(matches!(batch.add_event_at(event("   ", now), now), AddOutcome::Invalid));
        assert!(matches!(
            batch.add_event_at(event("future", now + 3 * MILLIS_PER_HOUR), now),
            AddOutcome::Invalid
        ));
        assert!(matches!(
            batch.add_event_at(event("past", now - 15 * MILLIS_PER_DAY), now),
            AddOutcome::Invalid
        ));
        assert_eq!(batch.skipped_events_count, 3);
        assert!(batch.is_empty());
        assert!(!batch.force_publish);
    }

    #[test]
    fn test_mixed_sources_rejected() {
        let mut batch = batch();
        let mut first = event("a", 10);
        first.source_id = Some("one".to_string());
        let mut second = event("b", 10);
        second.source_id = Some("two".to_string());
        batch.add_event_at(first, 10);
        assert!(matches!(batch.add_event_at(second, 10), AddOutcome::Rejected(_)));
        assert!(batch.events.iter().all(|e| e.source_id == batch.source_id));
    }

    #[test]
    fn test_replay_batch_waits_for_last_replay() {
        let mut batch = batch();
        let mut first = event("a", 10);
        first.is_replay = true;
        first.sequence_token = Some("token-1".to_string());
        first.batch_timestamp = Some(10);
        let mut last = event("b", 11);
        last.is_replay = true;
        last.is_last_replay = true;

        batch.add_event_at(first, 1_000_000);
        assert_eq!(batch.sequence_token.as_deref(), Some("token-1"));
        assert_eq!(batch.batch_timestamp, Some(10));
        assert!(!batch.should_publish_at(1_000_000));

        batch.add_event_at(last, 1_000_000);
        assert!(batch.should_publish_at(1_000_000));
    }

    #[test]
    fn test_fallback_events_counted() {
        let mut batch = batch();
        let mut fallback = event("a", 10);
        fallback.timestamp_status = TimestampStatus::FallbackCurrentTime;
        batch.add_event_at(fallback, 10);
        batch.add_event_at(event("b", 10), 10);
        assert_eq!(batch.fallback_events_count, 1);
        assert_eq!(batch.first_event().map(|e| e.message.as_str()), Some("a"));
        assert_eq!(batch.last_event().map(|e| e.message.as_str()), Some("b"));
    }
}
