use logpush::service::{
    HttpLogsClient, InputLogEvent, LogsService, PutLogEventsRequest, ServiceError, TokenHint,
};
use mockito::Matcher;
use std::time::Duration;

fn request(token: Option<&str>) -> PutLogEventsRequest {
    PutLogEventsRequest {
        log_group_name: "group".to_string(),
        log_stream_name: "stream".to_string(),
        log_events: vec![InputLogEvent {
            timestamp: 1_000,
            message: "hello".to_string(),
        }],
        sequence_token: token.map(str::to_string),
    }
}

fn client(url: &str) -> HttpLogsClient {
    HttpLogsClient::new(url, Some("secret".to_string()), Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_put_log_events_success() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .match_header("x-amz-target", "Logs_20140328.PutLogEvents")
        .match_header("authorization", "Bearer secret")
        .match_body(Matcher::PartialJson(serde_json::json!({
            "logGroupName": "group",
            "logStreamName": "stream",
            "sequenceToken": "t0",
            "logEvents": [{"timestamp": 1000, "message": "hello"}]
        })))
        .with_status(200)
        .with_body(r#"{"nextSequenceToken": "t1"}"#)
        .create_async()
        .await;

    let response = client(&server.url())
        .put_log_events(request(Some("t0")))
        .await
        .unwrap();
    assert_eq!(response.next_sequence_token.as_deref(), Some("t1"));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_data_already_accepted_carries_token() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/")
        .with_status(400)
        .with_body(
            r#"{"__type": "DataAlreadyAcceptedException",
                "message": "The given batch of log events has already been accepted. The next batch can be sent with sequenceToken: abc123"}"#,
        )
        .create_async()
        .await;

    let err = client(&server.url())
        .put_log_events(request(None))
        .await
        .unwrap_err();
    match err {
        ServiceError::DataAlreadyAccepted { expected, .. } => {
            assert_eq!(expected, TokenHint::Token("abc123".to_string()))
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_invalid_sequence_token_null() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/")
        .with_status(400)
        .with_body(
            r#"{"__type": "com.amazonaws.logs#InvalidSequenceTokenException",
                "message": "The given sequenceToken is invalid. The next expected sequenceToken is: null"}"#,
        )
        .create_async()
        .await;

    let err = client(&server.url())
        .put_log_events(request(Some("stale")))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::InvalidSequenceToken {
            expected: TokenHint::NoToken,
            ..
        }
    ));
}

#[tokio::test]
async fn test_unauthorized_status() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/")
        .with_status(403)
        .with_body("forbidden")
        .create_async()
        .await;

    let err = client(&server.url())
        .put_log_events(request(None))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Unauthorized(_)));
}

#[tokio::test]
async fn test_untyped_error_is_unexpected() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/")
        .with_status(502)
        .with_body("bad gateway")
        .create_async()
        .await;

    let err = client(&server.url())
        .put_log_events(request(None))
        .await
        .unwrap_err();
    match err {
        ServiceError::Unexpected { kind, .. } => assert_eq!(kind, "HTTP 502"),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_create_resources() {
    let mut server = mockito::Server::new_async().await;
    let group = server
        .mock("POST", "/")
        .match_header("x-amz-target", "Logs_20140328.CreateLogGroup")
        .match_body(Matcher::PartialJson(serde_json::json!({"logGroupName": "group"})))
        .with_status(200)
        .with_body("")
        .create_async()
        .await;
    let stream = server
        .mock("POST", "/")
        .match_header("x-amz-target", "Logs_20140328.CreateLogStream")
        .with_status(400)
        .with_body(r#"{"__type": "ResourceAlreadyExistsException", "message": "exists"}"#)
        .create_async()
        .await;

    let client = client(&server.url());
    client.create_log_group("group").await.unwrap();
    let err = client.create_log_stream("group", "stream").await.unwrap_err();
    assert!(matches!(err, ServiceError::ResourceAlreadyExists(_)));
    group.assert_async().await;
    stream.assert_async().await;
}
