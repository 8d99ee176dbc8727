use super::{LogsService, PutLogEventsRequest, PutLogEventsResponse, ServiceError};
use async_trait::async_trait;
use std::io::Write;
use std::sync::Mutex;

/// Writes every event message to an output instead of calling the service.
///
/// Sequence tokens are faked by incrementing the token of the request.
pub struct DryRunService {
    out: Mutex<Box<dyn Write + Send>>,
}

impl DryRunService {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }
}

fn next_token(current: Option<&str>) -> String {
    let current: u64 = current.and_then(|t| t.parse().ok()).unwrap_or(0);
    (current + 1).to_string()
}

#[async_trait]
impl LogsService for DryRunService {
    async fn put_log_events(
        &self,
        request: PutLogEventsRequest,
    ) -> Result<PutLogEventsResponse, ServiceError> {
        let mut out = self.out.lock().map_err(|_| ServiceError::Unexpected {
            kind: "DryRun".to_string(),
            message: "output lock poisoned".to_string(),
        })?;
        for event in &request.log_events {
            writeln!(out, "{}", event.message)
                .map_err(|e| ServiceError::Transport(e.to_string()))?;
        }
        out.flush()
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        Ok(PutLogEventsResponse {
            next_sequence_token: Some(next_token(request.sequence_token.as_deref())),
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
