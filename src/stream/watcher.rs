use super::{Stream, StreamError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Time between two refreshes of every stream.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(5);
/// How long a stream is left alone after its refresh failed.
pub const REFRESH_FAILURE_COOLDOWN: Duration = Duration::from_secs(60);

/// Drives the refresh cycle of a set of streams until stop is requested.
pub struct Watcher {
    streams: Vec<Stream>,
    stop: CancellationToken,
    interval: Duration,
}

impl Watcher {
    pub fn new(stop: CancellationToken) -> Self {
        Self {
            streams: Vec::new(),
            stop,
            interval: REFRESH_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn register(&mut self, stream: Stream) {
        info!(stream = %stream.stream_key(), "Registered stream");
        self.streams.push(stream);
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    async fn refresh_stream(stream: &mut Stream) -> Result<(), StreamError> {
        stream.validate()?;
        stream.refresh().await
    }

    /// Refresh every stream once. A failing stream is put on cooldown and
    /// does not affect the others.
    pub async fn refresh_all(&mut self) {
        for stream in &mut self.streams {
            if let Err(e) = Self::refresh_stream(stream).await {
                error!(
                    stream = %stream.stream_key(),
                    error = %e,
                    cooldown_secs = REFRESH_FAILURE_COOLDOWN.as_secs(),
                    "Stream refresh failed"
                );
                stream.delay_restart(REFRESH_FAILURE_COOLDOWN);
            }
        }
    }

    pub async fn run(mut self) {
        info!(streams = self.streams.len(), "Watcher started");
        while !self.stop.is_cancelled() {
            self.refresh_all().await;
            tokio::select! {
                _ = self.stop.cancelled() => {}
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("Watcher is stopping, waiting for streams");
        for stream in self.streams {
            stream.join().await;
        }
        info!("Watcher stopped");
    }
}
