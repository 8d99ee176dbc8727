use crate::pipeline::batch::{AddOutcome, BatchLimits, EventBatch};
use crate::pipeline::channel::{send_until_exit, ExitSignal, Sender};
use crate::source::event::{EventContext, LogEvent, PreviousEvent, TimestampStatus};
use crate::storage::{PushState, StreamState};
use async_trait::async_trait;
use regex::bytes::Regex;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long the reader waits at end of file before reading again.
pub const EOF_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Retry interval while the event queue is full.
pub const EVENT_PUT_INTERVAL: Duration = Duration::from_secs(5);
/// Retry interval while the batch queue is full.
pub const BATCH_PUT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid file pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

impl ReaderError {
    /// The source file does not exist (yet).
    pub fn is_not_found(&self) -> bool {
        matches!(self, ReaderError::Open { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Where completed events go.
#[async_trait]
pub trait EventSink: Send {
    /// Hand over one completed event. Returns `false` when the event could not
    /// be delivered because an exit was requested.
    async fn push(&mut self, event: LogEvent, signal: &ExitSignal) -> bool;

    /// Called at end of file when there is no event to push.
    async fn tick(&mut self, _signal: &ExitSignal) -> bool {
        true
    }

    /// Deliver anything still buffered. Called once before a rotated-away
    /// reader stops.
    async fn flush(&mut self, _signal: &ExitSignal) -> bool {
        true
    }
}

/// Sends every event on its own.
pub struct QueueSink {
    tx: Sender<LogEvent>,
}

impl QueueSink {
    pub fn new(tx: Sender<LogEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl EventSink for QueueSink {
    async fn push(&mut self, event: LogEvent, signal: &ExitSignal) -> bool {
        send_until_exit(&self.tx, event, EVENT_PUT_INTERVAL, signal).await
    }
}

/// Accumulates events into batches and sends whole batches.
pub struct BatchingSink {
    tx: Sender<EventBatch>,
    batch: Option<EventBatch>,
    buffer_duration: i64,
    limits: BatchLimits,
}

impl BatchingSink {
    pub fn new(tx: Sender<EventBatch>, buffer_duration: i64, limits: BatchLimits) -> Self {
        Self {
            tx,
            batch: None,
            buffer_duration,
            limits,
        }
    }

    fn current(&mut self) -> &mut EventBatch {
        let (buffer_duration, limits) = (self.buffer_duration, self.limits);
        self.batch
            .get_or_insert_with(|| EventBatch::new(buffer_duration, limits))
    }

    async fn send_batch(&mut self, signal: &ExitSignal) -> bool {
        let Some(mut batch) = self.batch.take() else {
            return true;
        };
        // Every queued batch is published as is.
        batch.force_publish = true;
        send_until_exit(&self.tx, batch, BATCH_PUT_INTERVAL, signal).await
    }
}

#[async_trait]
impl EventSink for BatchingSink {
    async fn push(&mut self, event: LogEvent, signal: &ExitSignal) -> bool {
        let batch = self.current();
        let rejected = match batch.add_event(event) {
            AddOutcome::Rejected(event) => Some(event),
            AddOutcome::Accepted | AddOutcome::Invalid => None,
        };

        if (rejected.is_some() || batch.should_publish()) && !self.send_batch(signal).await {
            return false;
        }
        if let Some(event) = rejected {
            self.current().add_event(event);
        }
        true
    }

    async fn tick(&mut self, signal: &ExitSignal) -> bool {
        match &self.batch {
            Some(batch) if batch.should_publish() => self.send_batch(signal).await,
            _ => true,
        }
    }

    async fn flush(&mut self, signal: &ExitSignal) -> bool {
        match &self.batch {
            Some(batch) if !batch.is_empty() => self.send_batch(signal).await,
            _ => true,
        }
    }
}

/// Everything a reader needs to know about the file it tails.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    pub source_id: String,
    pub path: PathBuf,
    pub context: EventContext,
    pub multi_line_start: Regex,
    pub push_state: Option<PushState>,
    pub stream_state: Option<StreamState>,
}

/// Tails one file, turning its lines into (possibly multi-line) events.
pub struct FileReader<S: EventSink> {
    config: ReaderConfig,
    sink: S,
    signal: ExitSignal,
    exiting: CancellationToken,
    file: BufReader<File>,
    position: u64,
    pending: Vec<u8>,
    open_event: Option<LogEvent>,
    previous: Option<PreviousEvent>,
    poll_interval: Duration,
}

/// A reader that ships whole batches to a pre-batched publisher.
pub type BatchingFileReader = FileReader<BatchingSink>;

impl<S: EventSink> FileReader<S> {
    /// Open the file. Fails if it cannot be opened for reading.
    pub fn open(
        config: ReaderConfig,
        sink: S,
        signal: ExitSignal,
        exiting: CancellationToken,
    ) -> Result<Self, ReaderError> {
        let file = File::open(&config.path).map_err(|source| ReaderError::Open {
            path: config.path.clone(),
            source,
        })?;
        Ok(Self {
            config,
            sink,
            signal,
            exiting,
            file: BufReader::new(file),
            position: 0,
            pending: Vec::new(),
            open_event: None,
            previous: None,
            poll_interval: EOF_POLL_INTERVAL,
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn source_id(&self) -> &str {
        &self.config.source_id
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn locate_initial_position(&mut self) -> Result<(), ReaderError> {
        let position = if let Some(state) = &self.config.push_state {
            self.previous = Some(PreviousEvent {
                timestamp: state.first_timestamp,
                status: state.first_timestamp_status,
            });
            info!(
                source_id = %self.config.source_id,
                end_position = state.end_position,
                "Replay events"
            );
            state.start_position
        } else if let Some(state) = &self.config.stream_state {
            if state.source_id == self.config.source_id {
                state.initial_position
            } else {
                // Files after the first one of a stream are read from the start.
                0
            }
        } else {
            warn!(
                source_id = %self.config.source_id,
                "Both stream state and push state are not available"
            );
            0
        };

        self.position = self.file.seek(SeekFrom::Start(position))?;
        info!(
            source_id = %self.config.source_id,
            path = %self.config.path.display(),
            position = self.position,
            "Start reading file"
        );
        Ok(())
    }

    pub async fn run(mut self) -> Result<(), ReaderError> {
        self.locate_initial_position()?;
        let mut line_start = self.position;
        let mut data = Vec::new();

        loop {
            if self.signal.exit_needed() {
                info!(source_id = %self.config.source_id, "Reader is leaving as requested");
                self.push_open_event().await;
                return Ok(());
            }

            if self.pending.is_empty() {
                line_start = self.position;
            }
            data.clear();
            let read = self.file.read_until(b'\n', &mut data)?;

            if read == 0 {
                self.push_open_event().await;
                if self.exiting.is_cancelled() {
                    self.sink.flush(&self.signal).await;
                    info!(source_id = %self.config.source_id, "No data is left, reader is leaving");
                    return Ok(());
                }
                tokio::select! {
                    _ = self.signal.wait(self.poll_interval) => {}
                    _ = self.exiting.cancelled() => {}
                }
                continue;
            }

            self.position += read as u64;
            self.pending.extend_from_slice(&data);
            if !data.ends_with(b"\n") {
                continue;
            }

            let mut line = std::mem::take(&mut self.pending);
            while matches!(line.last(), Some(b'\n') | Some(b'\r')) {
                line.pop();
            }

            let continues = self.open_event.is_some() && !self.config.multi_line_start.is_match(&line);
            if continues {
                if let Some(event) = self.open_event.as_mut() {
                    event.append_message(&line);
                    event.end_position = Some(self.position);
                }
            } else {
                self.push_open_event().await;
                self.open_event = Some(self.create_event(&line, line_start, self.position));
            }
        }
    }

    fn create_event(&self, line: &[u8], start_position: u64, end_position: u64) -> LogEvent {
        let mut event = LogEvent::new(self.config.context.clone());
        event.source_id = Some(self.config.source_id.clone());
        event.start_position = Some(start_position);
        event.end_position = Some(end_position);
        event.previous = self.previous;
        if let Some(state) = &self.config.push_state {
            if state.end_position >= end_position {
                event.is_replay = true;
                event.is_last_replay = state.end_position == end_position;
                event.batch_timestamp = state.batch_timestamp;
                event.sequence_token = state.sequence_token.clone();
            }
        }
        event.append_message(line);
        event
    }

    /// Complete and hand over the open event, if any.
    async fn push_open_event(&mut self) -> bool {
        let Some(mut event) = self.open_event.take() else {
            return self.sink.tick(&self.signal).await;
        };

        if !event.complete() {
            match event.timestamp_status {
                TimestampStatus::FallbackCurrentTime => warn!(
                    source_id = %self.config.source_id,
                    start_position = ?event.start_position,
                    end_position = ?event.end_position,
                    "Fall back to current time, timestamp could not be parsed from message"
                ),
                _ => warn!(
                    source_id = %self.config.source_id,
                    start_position = ?event.start_position,
                    end_position = ?event.end_position,
                    previous_event_time = ?event.timestamp,
                    "Fall back to previous event time, timestamp could not be parsed from message"
                ),
            }
        }

        self.previous = Some(event.as_previous());
        self.sink.push(event, &self.signal).await
    }
}
