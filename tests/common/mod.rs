#![allow(dead_code)]

use async_trait::async_trait;
use logpush::config::types::StreamConfig;
use logpush::config::StreamSettings;
use logpush::service::{LogsService, PutLogEventsRequest, PutLogEventsResponse, ServiceError};
use logpush::storage::MemoryStore;
use logpush::stream::StateTables;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

/// In-memory ingestion service. Fails the first calls with the scripted
/// errors, then accepts everything and hands out counting tokens.
#[derive(Default)]
pub struct RecordingService {
    failures: Mutex<VecDeque<ServiceError>>,
    attempts: Mutex<Vec<PutLogEventsRequest>>,
    accepted: Mutex<Vec<PutLogEventsRequest>>,
}

impl RecordingService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_with(failures: Vec<ServiceError>) -> Arc<Self> {
        Arc::new(Self {
            failures: Mutex::new(failures.into()),
            ..Default::default()
        })
    }

    pub fn attempts(&self) -> Vec<PutLogEventsRequest> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn accepted(&self) -> Vec<PutLogEventsRequest> {
        self.accepted.lock().unwrap().clone()
    }

    /// Messages of every accepted request, in publish order.
    pub fn messages(&self) -> Vec<String> {
        self.accepted()
            .iter()
            .flat_map(|r| r.log_events.iter().map(|e| e.message.clone()))
            .collect()
    }
}

#[async_trait]
impl LogsService for RecordingService {
    async fn put_log_events(
        &self,
        request: PutLogEventsRequest,
    ) -> Result<PutLogEventsResponse, ServiceError> {
        self.attempts.lock().unwrap().push(request.clone());
        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        let mut accepted = self.accepted.lock().unwrap();
        accepted.push(request);
        Ok(PutLogEventsResponse {
            next_sequence_token: Some(format!("token-{}", accepted.len())),
        })
    }

    async fn create_log_group(&self, _log_group_name: &str) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn create_log_stream(
        &self,
        _log_group_name: &str,
        _log_stream_name: &str,
    ) -> Result<(), ServiceError> {
        Ok(())
    }
}

/// Settings for stream `app` tailing `pattern`, publishing after 50ms.
pub fn settings(pattern: &str) -> StreamSettings {
    let raw = StreamConfig {
        file: pattern.into(),
        log_group_name: "group".to_string(),
        log_stream_name: "stream".to_string(),
        ..StreamConfig::default()
    };
    let mut settings = StreamSettings::from_config("app", &raw).unwrap();
    settings.buffer_duration = 50;
    settings
}

pub fn memory_tables() -> (MemoryStore, MemoryStore, StateTables) {
    let push = MemoryStore::new();
    let stream = MemoryStore::new();
    let tables = StateTables {
        push_state: Arc::new(push.clone()),
        stream_state: Arc::new(stream.clone()),
    };
    (push, stream, tables)
}

pub fn write_file(path: &Path, content: &str, secs_ago: u64) {
    std::fs::write(path, content).unwrap();
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() - Duration::from_secs(secs_ago))
        .unwrap();
}

/// Poll `condition` every 10ms until it holds or 5s pass.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
