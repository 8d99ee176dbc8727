//! The remote log ingestion API as seen by the publisher.

pub mod dry_run;
pub mod http;
pub mod retry;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use thiserror::Error;

pub use dry_run::DryRunService;
pub use http::HttpLogsClient;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputLogEvent {
    pub timestamp: i64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PutLogEventsRequest {
    pub log_group_name: String,
    pub log_stream_name: String,
    pub log_events: Vec<InputLogEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutLogEventsResponse {
    #[serde(default)]
    pub next_sequence_token: Option<String>,
}

/// The sequence token the service said it expected, if it said.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenHint {
    Token(String),
    /// The stream does not expect a token at all.
    NoToken,
    /// No expected token could be found in the error.
    Unknown,
}

impl TokenHint {
    /// Extract the expected token from an error message such as
    /// `The given sequenceToken is invalid. The next expected sequenceToken is: 4962...`.
    pub fn from_message(message: &str) -> Self {
        static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
        let pattern = PATTERN.get_or_init(|| Regex::new(r"sequenceToken(?:\sis)?: ([^\s]+)").ok());
        match pattern.as_ref().and_then(|p| p.captures(message)) {
            Some(captures) => Self::from_token(&captures[1]),
            None => TokenHint::Unknown,
        }
    }

    pub fn from_token(token: &str) -> Self {
        if token == "null" {
            TokenHint::NoToken
        } else {
            TokenHint::Token(token.to_string())
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("resource already exists: {0}")]
    ResourceAlreadyExists(String),

    #[error("invalid sequence token: {message}")]
    InvalidSequenceToken { expected: TokenHint, message: String },

    #[error("data already accepted: {message}")]
    DataAlreadyAccepted { expected: TokenHint, message: String },

    #[error("operation aborted: {0}")]
    OperationAborted(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("{kind}: {message}")]
    Unexpected { kind: String, message: String },
}

impl ServiceError {
    /// Map a wire error type (optionally namespaced, `ns#Name`) to its kind.
    pub fn from_wire(error_type: &str, message: &str, expected_token: Option<&str>) -> Self {
        let name = error_type.rsplit('#').next().unwrap_or(error_type);
        let message = message.to_string();
        let expected = || match expected_token {
            Some(token) => TokenHint::from_token(token),
            None => TokenHint::from_message(&message),
        };
        match name {
            "ResourceNotFoundException" => ServiceError::ResourceNotFound(message),
            "ResourceAlreadyExistsException" => ServiceError::ResourceAlreadyExists(message),
            "InvalidSequenceTokenException" => ServiceError::InvalidSequenceToken {
                expected: expected(),
                message,
            },
            "DataAlreadyAcceptedException" => ServiceError::DataAlreadyAccepted {
                expected: expected(),
                message,
            },
            "OperationAbortedException" => ServiceError::OperationAborted(message),
            "InvalidParameterException" => ServiceError::InvalidParameter(message),
            "UnrecognizedClientException"
            | "AccessDeniedException"
            | "InvalidApiKeyException"
            | "InvalidSignatureException"
            | "ExpiredTokenException" => ServiceError::Unauthorized(message),
            other => ServiceError::Unexpected {
                kind: other.to_string(),
                message,
            },
        }
    }
}

#[async_trait]
pub trait LogsService: Send + Sync {
    async fn put_log_events(
        &self,
        request: PutLogEventsRequest,
    ) -> Result<PutLogEventsResponse, ServiceError>;

    async fn create_log_group(&self, log_group_name: &str) -> Result<(), ServiceError>;

    async fn create_log_stream(
        &self,
        log_group_name: &str,
        log_stream_name: &str,
    ) -> Result<(), ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_hint_from_message() {
        assert_eq!(
            TokenHint::from_message(
                "The given sequenceToken is invalid. The next expected sequenceToken is: 495"
            ),
            TokenHint::Token("495".to_string())
        );
        assert_eq!(
            TokenHint::from_message("The given batch of log events has already been accepted. The next batch can be sent with sequenceToken: abc123"),
            TokenHint::Token("abc123".to_string())
        );
        assert_eq!(
            TokenHint::from_message("The next expected sequenceToken is: null"),
            TokenHint::NoToken
        );
        assert_eq!(TokenHint::from_message("no token here"), TokenHint::Unknown);
    }

    #[test]
    fn test_from_wire_strips_namespace() {
        let err = ServiceError::from_wire(
            "com.amazonaws.logs#ResourceNotFoundException",
            "The specified log group does not exist.",
            None,
        );
        assert!(matches!(err, ServiceError::ResourceNotFound(_)));
    }

    #[test]
    fn test_from_wire_prefers_explicit_token() {
        let err = ServiceError::from_wire(
            "InvalidSequenceTokenException",
            "The next expected sequenceToken is: from-message",
            Some("from-field"),
        );
        match err {
            ServiceError::InvalidSequenceToken { expected, .. } => {
                assert_eq!(expected, TokenHint::Token("from-field".to_string()))
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_from_wire_unknown_kind() {
        let err = ServiceError::from_wire("ThrottlingException", "slow down", None);
        assert!(matches!(err, ServiceError::Unexpected { ref kind, .. } if kind == "ThrottlingException"));
    }

    #[test]
    fn test_request_serialization_omits_missing_token() {
        let request = PutLogEventsRequest {
            log_group_name: "g".to_string(),
            log_stream_name: "s".to_string(),
            log_events: vec![InputLogEvent {
                timestamp: 1,
                message: "m".to_string(),
            }],
            sequence_token: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["logGroupName"], "g");
        assert_eq!(json["logEvents"][0]["timestamp"], 1);
        assert!(json.get("sequenceToken").is_none());
    }
}
