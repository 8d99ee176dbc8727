use super::{LogsService, PutLogEventsRequest, PutLogEventsResponse, ServiceError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const TARGET_PREFIX: &str = "Logs_20140328";
const CONTENT_TYPE_JSON: &str = "application/x-amz-json-1.1";

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(rename = "__type", default)]
    error_type: String,
    #[serde(alias = "Message", default)]
    message: String,
    #[serde(rename = "expectedSequenceToken", default)]
    expected_sequence_token: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateLogGroupRequest<'a> {
    log_group_name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateLogStreamRequest<'a> {
    log_group_name: &'a str,
    log_stream_name: &'a str,
}

/// JSON-over-HTTP client for the ingestion API.
#[derive(Debug, Clone)]
pub struct HttpLogsClient {
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpLogsClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn headers(&self, operation: &str) -> Result<HeaderMap, ServiceError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_JSON));
        let target = HeaderValue::from_str(&format!("{}.{}", TARGET_PREFIX, operation))
            .map_err(|e| ServiceError::Transport(e.to_string()))?;
        headers.insert("X-Amz-Target", target);
        if let Some(key) = &self.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| ServiceError::Transport(format!("invalid api key: {}", e)))?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }

    async fn call<B: Serialize + ?Sized>(
        &self,
        operation: &str,
        body: &B,
    ) -> Result<String, ServiceError> {
        let payload =
            serde_json::to_vec(body).map_err(|e| ServiceError::Transport(e.to_string()))?;
        let response = self
            .client
            .post(format!("{}/", self.endpoint))
            .headers(self.headers(operation)?)
            .body(payload)
            .send()
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        if status.is_success() {
            return Ok(text);
        }
        Err(map_error(status, &text))
    }
}

fn map_error(status: StatusCode, text: &str) -> ServiceError {
    let body: ErrorBody = serde_json::from_str(text).unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        let message = if body.message.is_empty() {
            status.to_string()
        } else {
            body.message
        };
        return ServiceError::Unauthorized(message);
    }
    if body.error_type.is_empty() {
        return ServiceError::Unexpected {
            kind: format!("HTTP {}", status.as_u16()),
            message: text.to_string(),
        };
    }
    ServiceError::from_wire(
        &body.error_type,
        &body.message,
        body.expected_sequence_token.as_deref(),
    )
}

#[async_trait]
impl LogsService for HttpLogsClient {
    async fn put_log_events(
        &self,
        request: PutLogEventsRequest,
    ) -> Result<PutLogEventsResponse, ServiceError> {
        let body = self.call("PutLogEvents", &request).await?;
        if body.trim().is_empty() {
            return Ok(PutLogEventsResponse::default());
        }
        serde_json::from_str(&body).map_err(|e| ServiceError::Unexpected {
            kind: "MalformedResponse".to_string(),
            message: e.to_string(),
        })
    }

    async fn create_log_group(&self, log_group_name: &str) -> Result<(), ServiceError> {
        self.call("CreateLogGroup", &CreateLogGroupRequest { log_group_name })
            .await
            .map(|_| ())
    }

    async fn create_log_stream(
        &self,
        log_group_name: &str,
        log_stream_name: &str,
    ) -> Result<(), ServiceError> {
        self.call(
            "CreateLogStream",
            &CreateLogStreamRequest {
                log_group_name,
                log_stream_name,
            },
        )
        .await
        .map(|_| ())
    }
}
