pub mod watcher;

use crate::config::types::InitialPosition;
use crate::config::StreamSettings;
use crate::pipeline::batch::EventBatch;
use crate::pipeline::channel::{create_channel, ExitSignal, Receiver, Sender};
use crate::pipeline::publisher::{PublishObserver, Publisher};
use crate::pipeline::worker::Worker;
use crate::service::retry::Backoff;
use crate::service::LogsService;
use crate::source::fingerprint::{file_fingerprint, resolve_source_file};
use crate::source::reader::{BatchingFileReader, BatchingSink, ReaderConfig, ReaderError};
use crate::storage::{KeyValueStore, PushState, StorageError, StreamState};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use watcher::Watcher;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("stream '{0}' needs a log group name and a log stream name")]
    MissingDestination(String),

    #[error("reader error: {0}")]
    Reader(#[from] ReaderError),

    #[error("state error: {0}")]
    Storage(#[from] StorageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Writes the push state of every batch right before it is attempted.
pub struct StateRecorder {
    store: Arc<dyn KeyValueStore>,
    dry_run: bool,
}

impl StateRecorder {
    pub fn new(store: Arc<dyn KeyValueStore>, dry_run: bool) -> Self {
        Self { store, dry_run }
    }
}

#[async_trait]
impl PublishObserver for StateRecorder {
    async fn before_publish(
        &self,
        batch: &EventBatch,
        sequence_token: Option<&str>,
    ) -> Result<(), StorageError> {
        if self.dry_run {
            return Ok(());
        }
        match PushState::from_batch(batch, sequence_token) {
            Some(state) => state.save(self.store.as_ref()).await,
            None => Ok(()),
        }
    }
}

/// The two state tables a stream reads and writes.
#[derive(Clone)]
pub struct StateTables {
    pub push_state: Arc<dyn KeyValueStore>,
    pub stream_state: Arc<dyn KeyValueStore>,
}

struct ActiveReader {
    worker: Worker,
    exiting: CancellationToken,
}

/// One configured file pattern bound to one log group and log stream.
///
/// Each `refresh` looks for the newest matching file. A new fingerprint means
/// the file rotated: the old reader is asked to finish the file and a new
/// reader starts once it is gone. Both halves share a group stop token; when
/// either fails the pair is torn down and started again from persisted state.
pub struct Stream {
    settings: StreamSettings,
    service: Arc<dyn LogsService>,
    tables: StateTables,
    stop: CancellationToken,
    group_stop: CancellationToken,
    queue_size: usize,
    dry_run: bool,
    tx: Sender<EventBatch>,
    rx: Option<Receiver<EventBatch>>,
    source_id: Option<String>,
    readers: Vec<ActiveReader>,
    publisher: Option<Worker>,
    restart_time: Option<Instant>,
    reader_poll_interval: Option<Duration>,
    publisher_poll_interval: Option<Duration>,
    backoff: Backoff,
}

impl Stream {
    pub fn new(
        settings: StreamSettings,
        service: Arc<dyn LogsService>,
        tables: StateTables,
        stop: CancellationToken,
        queue_size: usize,
    ) -> Self {
        let (tx, rx) = create_channel(queue_size);
        Self {
            settings,
            service,
            tables,
            stop,
            group_stop: CancellationToken::new(),
            queue_size,
            dry_run: false,
            tx,
            rx: Some(rx),
            source_id: None,
            readers: Vec::new(),
            publisher: None,
            restart_time: None,
            reader_poll_interval: None,
            publisher_poll_interval: None,
            backoff: Backoff::default(),
        }
    }

    /// Do not persist push state.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_poll_intervals(mut self, reader: Duration, publisher: Duration) -> Self {
        self.reader_poll_interval = Some(reader);
        self.publisher_poll_interval = Some(publisher);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn stream_key(&self) -> &str {
        &self.settings.stream_key
    }

    /// Fingerprint of the file currently being tailed.
    pub fn source_id(&self) -> Option<&str> {
        self.source_id.as_deref()
    }

    pub fn live_readers(&self) -> usize {
        self.readers.iter().filter(|r| r.worker.is_alive()).count()
    }

    pub fn has_publisher(&self) -> bool {
        self.publisher.as_ref().is_some_and(Worker::is_alive)
    }

    pub fn group_stop(&self) -> &CancellationToken {
        &self.group_stop
    }

    /// Skip refreshes until `delay` from now.
    pub fn delay_restart(&mut self, delay: Duration) {
        self.restart_time = Some(Instant::now() + delay);
    }

    pub fn validate(&self) -> Result<(), StreamError> {
        if self.settings.log_group_name.trim().is_empty()
            || self.settings.log_stream_name.trim().is_empty()
        {
            return Err(StreamError::MissingDestination(self.settings.stream_key.clone()));
        }
        Ok(())
    }

    pub async fn refresh(&mut self) -> Result<(), StreamError> {
        if let Some(restart_time) = self.restart_time {
            if Instant::now() < restart_time {
                return Ok(());
            }
            self.restart_time = None;
        }

        self.clean_up();

        let Some(path) = resolve_source_file(&self.settings.file_pattern())? else {
            return Ok(());
        };
        let source_id = match file_fingerprint(
            &path,
            &self.settings.stream_key,
            self.settings.fingerprint_lines,
        ) {
            Ok(Some(source_id)) => source_id,
            Ok(None) => {
                debug!(
                    stream = %self.settings.stream_key,
                    path = %path.display(),
                    "File does not have enough lines for a fingerprint yet"
                );
                return Ok(());
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        if self.source_id.as_deref() == Some(source_id.as_str()) {
            return Ok(());
        }
        if self.group_stop.is_cancelled() {
            // Still winding down the failed pair.
            return Ok(());
        }

        if self.publisher.is_none() {
            self.start_publisher();
        }

        if !self.readers.is_empty() {
            for reader in &self.readers {
                if !reader.exiting.is_cancelled() {
                    info!(
                        stream = %self.settings.stream_key,
                        previous_source_id = ?self.source_id,
                        source_id = %source_id,
                        path = %path.display(),
                        "File rotated, asking reader to finish"
                    );
                    reader.exiting.cancel();
                }
            }
            if self.live_readers() > 0 {
                return Ok(());
            }
        }

        let stream_state = self.ensure_stream_state(&path, &source_id).await?;
        let push_state = PushState::load(self.tables.push_state.as_ref(), &source_id).await?;

        match self.start_reader(&path, &source_id, push_state, stream_state) {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(path = %path.display(), "File vanished before it could be opened");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
        self.source_id = Some(source_id);
        Ok(())
    }

    /// Forget finished workers. Once both halves of a stopped group are gone,
    /// reset so the next refresh starts over.
    fn clean_up(&mut self) {
        self.readers.retain(|reader| reader.worker.is_alive());
        if self.readers.len() > 1 {
            warn!(
                stream = %self.settings.stream_key,
                readers = self.readers.len(),
                "More than one reader is alive"
            );
        }

        if self.publisher.as_ref().is_some_and(|p| !p.is_alive()) {
            info!(stream = %self.settings.stream_key, "Publisher has stopped");
            self.publisher = None;
        }

        if self.readers.is_empty() && self.publisher.is_none() && self.group_stop.is_cancelled() {
            info!(stream = %self.settings.stream_key, "Resetting stream after group stop");
            self.source_id = None;
            self.group_stop = CancellationToken::new();
            let (tx, rx) = create_channel(self.queue_size);
            self.tx = tx;
            self.rx = Some(rx);
        }
    }

    fn signal(&self) -> ExitSignal {
        ExitSignal::new(self.stop.clone(), self.group_stop.clone())
    }

    fn start_publisher(&mut self) {
        let Some(rx) = self.rx.take() else {
            warn!(stream = %self.settings.stream_key, "Publisher queue is gone, waiting for reset");
            return;
        };

        let recorder = StateRecorder::new(self.tables.push_state.clone(), self.dry_run);
        let mut publisher = Publisher::new(
            self.service.clone(),
            self.settings.log_group_name.clone(),
            self.settings.log_stream_name.clone(),
            self.signal(),
        )
        .with_observer(Arc::new(recorder))
        .with_backoff(self.backoff);
        if let Some(interval) = self.publisher_poll_interval {
            publisher = publisher.with_poll_interval(interval);
        }

        info!(
            stream = %self.settings.stream_key,
            log_group = %self.settings.log_group_name,
            log_stream = %self.settings.log_stream_name,
            "Starting publisher"
        );
        self.publisher = Some(Worker::spawn(
            format!("publisher:{}", self.settings.stream_key),
            self.group_stop.clone(),
            publisher.run_batch_publisher(rx),
        ));
    }

    /// Record where a never-seen stream starts. Returns the stream state in
    /// effect.
    async fn ensure_stream_state(
        &self,
        path: &Path,
        source_id: &str,
    ) -> Result<Option<StreamState>, StreamError> {
        let store = self.tables.stream_state.as_ref();
        if let Some(state) = StreamState::load(store, &self.settings.stream_key).await? {
            return Ok(Some(state));
        }

        let initial_position = match self.settings.initial_position {
            InitialPosition::StartOfFile => 0,
            InitialPosition::EndOfFile => std::fs::metadata(path)?.len(),
        };
        let state = StreamState {
            source_id: source_id.to_string(),
            initial_position,
        };
        state.save(store, &self.settings.stream_key).await?;
        info!(
            stream = %self.settings.stream_key,
            source_id,
            initial_position,
            "Recorded initial stream state"
        );
        Ok(Some(state))
    }

    fn start_reader(
        &mut self,
        path: &Path,
        source_id: &str,
        push_state: Option<PushState>,
        stream_state: Option<StreamState>,
    ) -> Result<(), ReaderError> {
        let config = ReaderConfig {
            source_id: source_id.to_string(),
            path: path.to_path_buf(),
            context: self.settings.event_context(),
            multi_line_start: self.settings.multi_line_start.clone(),
            push_state,
            stream_state,
        };
        let sink = BatchingSink::new(
            self.tx.clone(),
            self.settings.buffer_duration,
            self.settings.batch_limits,
        );
        let exiting = CancellationToken::new();
        let mut reader = BatchingFileReader::open(config, sink, self.signal(), exiting.clone())?;
        if let Some(interval) = self.reader_poll_interval {
            reader = reader.with_poll_interval(interval);
        }

        let worker = Worker::spawn(
            format!("reader:{}", self.settings.stream_key),
            self.group_stop.clone(),
            reader.run(),
        );
        self.readers.push(ActiveReader { worker, exiting });
        Ok(())
    }

    /// Wait for every worker, then close the state tables.
    pub async fn join(self) {
        for reader in self.readers {
            reader.worker.join().await;
        }
        if let Some(publisher) = self.publisher {
            publisher.join().await;
        }
        for table in [&self.tables.push_state, &self.tables.stream_state] {
            if let Err(e) = table.close().await {
                warn!(stream = %self.settings.stream_key, error = %e, "Failed to close state table");
            }
        }
        info!(stream = %self.settings.stream_key, "Stream stopped");
    }
}
