use crate::config::types::MIN_BUFFER_DURATION_MS;
use crate::pipeline::batch::{AddOutcome, BatchLimits, EventBatch};
use crate::pipeline::channel::{ExitSignal, Receiver};
use crate::service::retry::{Backoff, RetryError};
use crate::service::{InputLogEvent, LogsService, PutLogEventsRequest, ServiceError, TokenHint};
use crate::source::event::LogEvent;
use crate::storage::StorageError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Minimum time between the start of two `PutLogEvents` calls.
pub const MIN_PUT_DELAY: Duration = Duration::from_millis(200);
/// Queue poll interval of the per-event publisher.
pub const EVENT_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Queue poll interval of the pre-batched publisher.
pub const BATCH_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("put log events failed: {0}")]
    Service(#[from] ServiceError),

    #[error("failed to create log group or log stream: {0}")]
    Setup(ServiceError),

    #[error("failed to record push state: {0}")]
    State(#[from] StorageError),

    #[error("publishing interrupted by shutdown")]
    Interrupted,
}

/// Called with the batch and the sequence token right before every
/// `PutLogEvents` attempt.
#[async_trait]
pub trait PublishObserver: Send + Sync {
    async fn before_publish(
        &self,
        batch: &EventBatch,
        sequence_token: Option<&str>,
    ) -> Result<(), StorageError>;
}

/// Drains a queue and publishes to one log group / log stream.
pub struct Publisher {
    service: Arc<dyn LogsService>,
    log_group_name: String,
    log_stream_name: String,
    signal: ExitSignal,
    observer: Option<Arc<dyn PublishObserver>>,
    sequence_token: Option<String>,
    last_publish: Option<Instant>,
    backoff: Backoff,
    poll_interval: Option<Duration>,
}

impl Publisher {
    pub fn new(
        service: Arc<dyn LogsService>,
        log_group_name: impl Into<String>,
        log_stream_name: impl Into<String>,
        signal: ExitSignal,
    ) -> Self {
        Self {
            service,
            log_group_name: log_group_name.into(),
            log_stream_name: log_stream_name.into(),
            signal,
            observer: None,
            sequence_token: None,
            last_publish: None,
            backoff: Backoff::default(),
            poll_interval: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn PublishObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Override the queue poll interval of both run loops.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn sequence_token(&self) -> Option<&str> {
        self.sequence_token.as_deref()
    }

    /// Publish `batch` if it is ready, leaving `None` in its place.
    pub async fn publish_event_batch(
        &mut self,
        batch: &mut Option<EventBatch>,
    ) -> Result<(), PublishError> {
        match batch {
            Some(b) if !b.is_empty() && b.should_publish() => {}
            _ => return Ok(()),
        }
        let Some(batch) = batch.take() else {
            return Ok(());
        };

        // Replay batches carry the token that was current when they were
        // first attempted.
        if batch.is_replay {
            self.sequence_token = batch.sequence_token.clone();
        }
        if let Some(observer) = &self.observer {
            observer
                .before_publish(&batch, self.sequence_token.as_deref())
                .await?;
        }

        if let Some(last) = self.last_publish {
            let elapsed = last.elapsed();
            if elapsed < MIN_PUT_DELAY {
                self.signal.wait(MIN_PUT_DELAY - elapsed).await;
            }
        }

        let publish_time = Instant::now();
        self.sequence_token = self.put_log_events(&batch).await?;
        self.last_publish = Some(publish_time);
        Ok(())
    }

    async fn put_log_events(&self, batch: &EventBatch) -> Result<Option<String>, PublishError> {
        let mut events: Vec<InputLogEvent> = batch
            .events
            .iter()
            .map(|e| InputLogEvent {
                timestamp: e.timestamp_or_zero(),
                message: e.message.clone(),
            })
            .collect();
        events.sort_by_key(|e| e.timestamp);

        let mut token = self.sequence_token.clone();
        loop {
            let request = PutLogEventsRequest {
                log_group_name: self.log_group_name.clone(),
                log_stream_name: self.log_stream_name.clone(),
                log_events: events.clone(),
                sequence_token: token.clone(),
            };

            let e = match self.service.put_log_events(request).await {
                Ok(response) => {
                    info!(
                        log_group = %self.log_group_name,
                        log_stream = %self.log_stream_name,
                        source_id = ?batch.source_id,
                        num_of_events = batch.len(),
                        batch_size_in_bytes = batch.batch_size_in_bytes,
                        skipped_events_count = batch.skipped_events_count,
                        fallback_events_count = batch.fallback_events_count,
                        first_position = ?batch.first_event().and_then(|e| e.start_position),
                        last_position = ?batch.last_event().and_then(|e| e.end_position),
                        "Published batch"
                    );
                    return Ok(response.next_sequence_token);
                }
                Err(e) => e,
            };

            warn!(error = %e, "Caught exception from PutLogEvents");
            match e {
                ServiceError::DataAlreadyAccepted { expected, .. } => {
                    match expected {
                        TokenHint::Token(t) => token = Some(t),
                        TokenHint::NoToken => token = None,
                        TokenHint::Unknown => {}
                    }
                    debug!(source_id = ?batch.source_id, "Batch was already accepted, skipping");
                    return Ok(token);
                }
                ServiceError::OperationAborted(_) => {
                    if self.signal.exit_needed() {
                        return Err(PublishError::Interrupted);
                    }
                }
                ServiceError::InvalidSequenceToken { expected, .. } => {
                    match expected {
                        TokenHint::Unknown => {
                            error!("Failed to get sequence token");
                            self.signal.wait(Duration::from_secs(1)).await;
                        }
                        hint => {
                            warn!(
                                log_group = %self.log_group_name,
                                log_stream = %self.log_stream_name,
                                sequence_token = ?token,
                                "Multiple agents might be sending log events to the log stream \
                                 with the same sequence token. This could cause duplicates and \
                                 is not recommended."
                            );
                            token = match hint {
                                TokenHint::Token(t) => Some(t),
                                _ => None,
                            };
                        }
                    }
                    if self.signal.exit_needed() {
                        return Err(PublishError::Interrupted);
                    }
                }
                ServiceError::ResourceNotFound(_) => {
                    self.setup_resources().await?;
                    token = None;
                }
                ServiceError::InvalidParameter(message) => {
                    warn!(
                        source_id = ?batch.source_id,
                        num_of_events = batch.len(),
                        batch_size_in_bytes = batch.batch_size_in_bytes,
                        reason = %message,
                        "Skip batch, invalid parameter exception"
                    );
                    return Ok(token);
                }
                other => return Err(PublishError::Service(other)),
            }
        }
    }

    async fn setup_resources(&self) -> Result<(), PublishError> {
        let result = self
            .backoff
            .retry(self.signal.stop(), || self.create_resources())
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(RetryError::Interrupted) => Err(PublishError::Interrupted),
            Err(RetryError::Exhausted { last, .. }) => Err(PublishError::Setup(last)),
        }
    }

    async fn create_resources(&self) -> Result<(), ServiceError> {
        info!(log_group = %self.log_group_name, "Creating log group");
        match self.service.create_log_group(&self.log_group_name).await {
            Ok(()) | Err(ServiceError::ResourceAlreadyExists(_)) => {}
            Err(e) => {
                warn!(error = %e, "CreateLogGroup failed");
                return Err(e);
            }
        }
        info!(log_stream = %self.log_stream_name, "Creating log stream");
        match self
            .service
            .create_log_stream(&self.log_group_name, &self.log_stream_name)
            .await
        {
            Ok(()) | Err(ServiceError::ResourceAlreadyExists(_)) => Ok(()),
            Err(e) => {
                warn!(error = %e, "CreateLogStream failed");
                Err(e)
            }
        }
    }

    /// Publish if ready. `Ok(false)` means publishing was interrupted by
    /// shutdown and the caller should leave.
    async fn publish_pending(&mut self, batch: &mut Option<EventBatch>) -> Result<bool, PublishError> {
        match self.publish_event_batch(batch).await {
            Ok(()) => Ok(true),
            Err(PublishError::Interrupted) => {
                info!("Publisher is leaving, publish interrupted by shutdown");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Drain single events, batching them here.
    pub async fn run_event_publisher(
        mut self,
        mut rx: Receiver<LogEvent>,
        buffer_duration: i64,
        limits: BatchLimits,
    ) -> Result<(), PublishError> {
        let buffer_duration = if buffer_duration < MIN_BUFFER_DURATION_MS as i64 {
            warn!(
                min_buffer_duration = MIN_BUFFER_DURATION_MS,
                "buffer_duration is set to the minimum"
            );
            MIN_BUFFER_DURATION_MS as i64
        } else {
            buffer_duration
        };
        let poll = self.poll_interval.unwrap_or(EVENT_POLL_INTERVAL);
        let mut batch: Option<EventBatch> = None;

        loop {
            match tokio::time::timeout(poll, rx.recv()).await {
                Ok(Some(event)) => {
                    let current = batch.get_or_insert_with(|| EventBatch::new(buffer_duration, limits));
                    if let AddOutcome::Rejected(event) = current.add_event(event) {
                        if !self.publish_pending(&mut batch).await? {
                            return Ok(());
                        }
                        batch
                            .get_or_insert_with(|| EventBatch::new(buffer_duration, limits))
                            .add_event(event);
                    }
                }
                received => {
                    let closed = matches!(received, Ok(None));
                    if closed || self.signal.exit_needed() {
                        match batch.as_mut() {
                            Some(b) if !b.is_empty() => {
                                b.force_publish = true;
                                self.publish_pending(&mut batch).await?;
                            }
                            _ => info!("Publisher is leaving as requested"),
                        }
                        return Ok(());
                    }
                }
            }
            if !self.publish_pending(&mut batch).await? {
                return Ok(());
            }
        }
    }

    /// Drain batches that were built by a reader.
    pub async fn run_batch_publisher(mut self, mut rx: Receiver<EventBatch>) -> Result<(), PublishError> {
        let poll = self.poll_interval.unwrap_or(BATCH_POLL_INTERVAL);
        loop {
            match tokio::time::timeout(poll, rx.recv()).await {
                Ok(Some(batch)) => {
                    let mut slot = Some(batch);
                    if !self.publish_pending(&mut slot).await? {
                        return Ok(());
                    }
                }
                received => {
                    if matches!(received, Ok(None)) || self.signal.exit_needed() {
                        info!("Publisher is leaving as requested");
                        return Ok(());
                    }
                }
            }
        }
    }
}
