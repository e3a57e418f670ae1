//! Retry, completeness and error classification end to end.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use common::{OWNER, Recording, SEQUENCE_HEADER, client, config};
use httpmock::prelude::*;
use sequoia_client::{
    BackoffConfig, BrowseOptions, Client, ClientConfig, CredentialProvider, ErrorKind, RetrySpec,
    SdkError, ServiceFailure,
};
use sequoia_utils::ManualClock;
use serde_json::json;
use url::Url;

fn retry_on(codes: &[u16], max_tries: u32) -> BackoffConfig {
    BackoffConfig {
        max_tries,
        interval: Duration::from_secs(1),
        retry_status_codes: codes.iter().copied().collect::<BTreeSet<_>>(),
        ..BackoffConfig::default()
    }
}

#[tokio::test]
async fn configured_statuses_are_retried_until_success() {
    let server = MockServer::start();
    let first_miss = server.mock(|when, then| {
        when.method(GET)
            .path("/data/contents")
            .header(SEQUENCE_HEADER, "1");
        then.status(404)
            .json_body(json!({"statusCode": 404, "error": "Not Found"}));
    });
    let second_miss = server.mock(|when, then| {
        when.method(GET)
            .path("/data/contents")
            .header(SEQUENCE_HEADER, "2");
        then.status(404)
            .json_body(json!({"statusCode": 404, "error": "Not Found"}));
    });
    let found = server.mock(|when, then| {
        when.method(GET)
            .path("/data/contents")
            .header(SEQUENCE_HEADER, "3");
        then.status(200)
            .json_body(json!({"meta": {}, "contents": [{"ref": "testmock:1"}]}));
    });

    let config = config(&server).with_backoff(retry_on(&[404, 409], 5));
    let transport = Recording::new();
    let (client, clock) = client(&config, transport.clone());
    let cursor = client
        .service("metadata")
        .unwrap()
        .resource("contents")
        .unwrap()
        .browse(OWNER, BrowseOptions::default())
        .await
        .unwrap();

    assert!(cursor.first().status().is_success());
    assert_eq!(cursor.first().resources().len(), 1);
    assert_eq!(transport.requests().len(), 3);
    first_miss.assert_calls(1);
    second_miss.assert_calls(1);
    found.assert_calls(1);
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(1); 2]);
}

#[tokio::test]
async fn persistent_retriable_status_becomes_service_error() {
    let server = MockServer::start();
    let not_found = server.mock(|when, then| {
        when.method(GET).path("/data/contents/testmock:missing");
        then.status(404)
            .json_body(json!({"statusCode": 404, "error": "Not Found"}));
    });

    let config = config(&server).with_backoff(retry_on(&[404, 409], 3));
    let (client, _) = client(&config, Recording::new());
    let err = client
        .service("metadata")
        .unwrap()
        .resource("contents")
        .unwrap()
        .read(OWNER, "testmock:missing")
        .await
        .unwrap_err();

    not_found.assert_calls(3);
    assert_eq!(err.kind(), ErrorKind::Service);
    assert!(matches!(err, SdkError::Service { attempts: 3, .. }));
    assert_eq!(err.status(), Some(http::StatusCode::NOT_FOUND));
    assert_eq!(err.page().unwrap().json()["error"], "Not Found");
}

#[tokio::test]
async fn unconfigured_client_error_is_not_retried() {
    let server = MockServer::start();
    let not_found = server.mock(|when, then| {
        when.method(GET).path("/data/contents/testmock:missing");
        then.status(404).json_body(json!({
            "statusCode": 404,
            "error": "Not Found",
            "message": "No content found"
        }));
    });

    let (client, clock) = client(&config(&server), Recording::new());
    let err = client
        .service("metadata")
        .unwrap()
        .resource("contents")
        .unwrap()
        .read(OWNER, "testmock:missing")
        .await
        .unwrap_err();

    not_found.assert_calls(1);
    assert_eq!(err.kind(), ErrorKind::Client);
    assert!(err.to_string().contains("No content found"));
    assert!(clock.sleeps().is_empty());
}

#[tokio::test]
async fn server_unavailable_is_retried_by_default() {
    let server = MockServer::start();
    let unavailable = server.mock(|when, then| {
        when.method(GET).path("/data/contents/testmock:1");
        then.status(503);
    });

    let config = config(&server).with_backoff(retry_on(&[], 4));
    let (client, _) = client(&config, Recording::new());
    let err = client
        .service("metadata")
        .unwrap()
        .resource("contents")
        .unwrap()
        .read(OWNER, "testmock:1")
        .await
        .unwrap_err();

    unavailable.assert_calls(4);
    assert!(matches!(err, SdkError::Service { attempts: 4, .. }));
}

#[tokio::test]
async fn empty_result_is_retried_then_returned() {
    let server = MockServer::start();
    let empty = server.mock(|when, then| {
        when.method(GET).path("/data/contents");
        then.status(200)
            .json_body(json!({"meta": {}, "contents": []}));
    });

    let mut config = config(&server).with_backoff(retry_on(&[], 3));
    config.retry_when_empty_result = Some(RetrySpec::AllGroups(true));
    let (client, _) = client(&config, Recording::new());
    let cursor = client
        .service("metadata")
        .unwrap()
        .resource("contents")
        .unwrap()
        .browse(OWNER, BrowseOptions::default())
        .await
        .unwrap();

    empty.assert_calls(3);
    assert!(cursor.first().status().is_success());
    assert!(cursor.first().resources().is_empty());
}

#[tokio::test]
async fn per_group_spec_checks_only_flagged_groups() {
    let server = MockServer::start();
    let partial = server.mock(|when, then| {
        when.method(GET).path("/data/contents");
        then.status(200).json_body(json!({
            "meta": {},
            "contents": [{"ref": "testmock:1"}],
            "linked": {"assets": []}
        }));
    });

    let config = config(&server).with_backoff(retry_on(&[], 3));
    let (client, _) = client(&config, Recording::new());
    let contents = client.service("metadata").unwrap().resource("contents").unwrap();

    contents
        .browse(
            OWNER,
            BrowseOptions::default()
                .query_string("include=assets")
                .retry_spec(RetrySpec::per_group([("contents", true), ("assets", false)])),
        )
        .await
        .unwrap();
    partial.assert_calls(1);

    contents
        .browse(
            OWNER,
            BrowseOptions::default()
                .query_string("include=assets")
                .retry_spec(RetrySpec::per_group([("assets", true)])),
        )
        .await
        .unwrap();
    partial.assert_calls(4);
}

#[tokio::test]
async fn per_call_spec_replaces_client_default() {
    let server = MockServer::start();
    let empty = server.mock(|when, then| {
        when.method(GET).path("/data/contents");
        then.status(200)
            .json_body(json!({"meta": {}, "contents": []}));
    });

    let mut config = config(&server).with_backoff(retry_on(&[], 3));
    config.retry_when_empty_result = Some(RetrySpec::per_group([("contents", true)]));
    let (client, _) = client(&config, Recording::new());
    client
        .service("metadata")
        .unwrap()
        .resource("contents")
        .unwrap()
        .browse(
            OWNER,
            BrowseOptions::default().retry_spec(RetrySpec::AllGroups(false)),
        )
        .await
        .unwrap();

    empty.assert_calls(1);
}

#[tokio::test]
async fn refused_connection_exhausts_retries() {
    let config = ClientConfig {
        allow_insecure_http: true,
        ..ClientConfig::default()
    }
    .with_service("metadata", Url::parse("http://127.0.0.1:1").unwrap())
    .with_backoff(retry_on(&[], 3));
    let transport = Recording::new();
    let clock = ManualClock::new();
    let client = Client::with_transport(
        &config,
        transport.clone(),
        CredentialProvider::no_auth(),
        Arc::new(clock.clone()),
    )
    .unwrap();

    let err = client
        .service("metadata")
        .unwrap()
        .resource("contents")
        .unwrap()
        .read(OWNER, "testmock:1")
        .await
        .unwrap_err();

    assert_eq!(transport.requests().len(), 3);
    assert!(matches!(
        err,
        SdkError::Service {
            attempts: 3,
            cause: ServiceFailure::Transport(_)
        }
    ));
    assert_eq!(clock.sleeps().len(), 2);
}

#[tokio::test]
async fn media_type_headers_follow_configuration() {
    let server = MockServer::start();
    let default_type = server.mock(|when, then| {
        when.method(GET)
            .path("/data/contents/testmock:1")
            .header("accept", "application/vnd.piksel+json")
            .header("content-type", "application/vnd.piksel+json")
            .header_exists("x-correlation-id");
        then.status(200).json_body(json!({"contents": [{"ref": "testmock:1"}]}));
    });
    let custom_type = server.mock(|when, then| {
        when.method(GET)
            .path("/data/contents/testmock:2")
            .header("accept", "application/json");
        then.status(200).json_body(json!({"contents": [{"ref": "testmock:2"}]}));
    });

    let (client, _) = client(&config(&server), Recording::new());
    let contents = client.service("metadata").unwrap().resource("contents").unwrap();
    contents.read(OWNER, "testmock:1").await.unwrap();
    default_type.assert_calls(1);

    let mut custom = config(&server);
    custom.content_type = "application/json".to_owned();
    let (client, _) = common::client(&custom, Recording::new());
    client
        .service("metadata")
        .unwrap()
        .resource("contents")
        .unwrap()
        .read(OWNER, "testmock:2")
        .await
        .unwrap();
    custom_type.assert_calls(1);
}
