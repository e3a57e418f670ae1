//! Read, store, delete, update and business endpoints.

mod common;

use common::{OWNER, Recording, client, config};
use httpmock::prelude::*;
use sequoia_client::{ErrorKind, SdkError};
use serde_json::json;

#[tokio::test]
async fn read_gets_one_reference() {
    let server = MockServer::start();
    let read = server.mock(|when, then| {
        when.method(GET)
            .path("/data/contents/testmock:abc")
            .query_param("owner", OWNER);
        then.status(200).json_body(json!({
            "contents": [{"ref": "testmock:abc", "name": "abc"}],
            "linked": {"assets": [{"ref": "testmock:asset"}]}
        }));
    });

    let (client, _) = client(&config(&server), Recording::new());
    let page = client
        .service("metadata")
        .unwrap()
        .resource("contents")
        .unwrap()
        .read(OWNER, "testmock:abc")
        .await
        .unwrap();

    read.assert_calls(1);
    assert_eq!(page.resource_name(), Some("contents"));
    assert_eq!(page.resources()[0]["name"], "abc");
    assert_eq!(page.linked_resources("assets").len(), 1);
}

#[tokio::test]
async fn store_posts_to_collection() {
    let server = MockServer::start();
    let document = json!({"contents": [{"ref": "testmock:new", "owner": "testmock", "name": "new"}]});
    let store = server.mock(|when, then| {
        when.method(POST)
            .path("/data/contents/")
            .query_param("owner", OWNER)
            .json_body(document.clone());
        then.status(201).json_body(document.clone());
    });

    let (client, _) = client(&config(&server), Recording::new());
    let page = client
        .service("metadata")
        .unwrap()
        .resource("contents")
        .unwrap()
        .store(OWNER, &document)
        .await
        .unwrap();

    store.assert_calls(1);
    assert_eq!(page.status().as_u16(), 201);
    assert_eq!(page.resources()[0]["ref"], "testmock:new");
}

#[tokio::test]
async fn delete_joins_references() {
    let server = MockServer::start();
    let delete = server.mock(|when, then| {
        when.method(DELETE)
            .path("/data/contents/testmock:a,testmock:b")
            .query_param("owner", OWNER);
        then.status(204);
    });

    let (client, _) = client(&config(&server), Recording::new());
    let contents = client.service("metadata").unwrap().resource("contents").unwrap();
    let page = contents
        .delete(OWNER, &["testmock:a", "testmock:b"])
        .await
        .unwrap();

    delete.assert_calls(1);
    assert_eq!(page.status().as_u16(), 204);
    assert!(page.resources().is_empty());

    let err = contents.delete(OWNER, &[]).await.unwrap_err();
    assert!(matches!(err, SdkError::Payload(_)));
}

#[tokio::test]
async fn update_sends_version_precondition() {
    let server = MockServer::start();
    let document = r#"[{"ref": "testmock:item", "owner": "testmock", "name": "item", "title": "New"}]"#;
    let update = server.mock(|when, then| {
        when.method(PUT)
            .path("/data/contents/testmock:item")
            .query_param("owner", OWNER)
            .header("if-match", "\"3b2f\"")
            .body(document);
        then.status(200)
            .json_body(json!({"contents": [{"ref": "testmock:item", "version": "9c1e"}]}));
    });

    let (client, _) = client(&config(&server), Recording::new());
    let page = client
        .service("metadata")
        .unwrap()
        .resource("contents")
        .unwrap()
        .update(OWNER, document, "testmock:item", "3b2f")
        .await
        .unwrap();

    update.assert_calls(1);
    assert_eq!(page.resources()[0]["version"], "9c1e");
}

#[tokio::test]
async fn stale_version_is_reported_as_not_matching() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(PUT).path("/data/contents/testmock:item");
        then.status(412).json_body(json!({
            "statusCode": 412,
            "error": "Precondition Failed",
            "message": "document cannot be changed - versions do not match"
        }));
    });

    let (client, _) = client(&config(&server), Recording::new());
    let err = client
        .service("metadata")
        .unwrap()
        .resource("contents")
        .unwrap()
        .update(
            OWNER,
            r#"{"ref": "testmock:item", "owner": "testmock", "name": "item"}"#,
            "testmock:item",
            "old",
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SdkError::NotMatchingVersion { .. }));
    assert_eq!(err.kind(), ErrorKind::Client);
    assert_eq!(err.status(), Some(http::StatusCode::PRECONDITION_FAILED));
}

#[tokio::test]
async fn other_precondition_failures_stay_client_errors() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(PUT).path("/data/contents/testmock:item");
        then.status(412).json_body(json!({
            "statusCode": 412,
            "error": "Precondition Failed",
            "message": "something else"
        }));
    });

    let (client, _) = client(&config(&server), Recording::new());
    let err = client
        .service("metadata")
        .unwrap()
        .resource("contents")
        .unwrap()
        .update(
            OWNER,
            r#"{"ref": "testmock:item", "owner": "testmock", "name": "item"}"#,
            "testmock:item",
            "old",
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SdkError::Client { .. }));
}

#[tokio::test]
async fn mismatched_reference_is_rejected_before_sending() {
    let server = MockServer::start();
    let update = server.mock(|when, then| {
        when.method(PUT);
        then.status(200);
    });

    let transport = Recording::new();
    let (client, _) = client(&config(&server), transport.clone());
    let contents = client.service("metadata").unwrap().resource("contents").unwrap();

    let err = contents
        .update(
            OWNER,
            r#"[{"ref": "testmock:other", "owner": "testmock", "name": "other"}]"#,
            "testmock:item",
            "v1",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SdkError::ReferenceMismatch(_)));

    let err = contents
        .update(OWNER, "not json", "testmock:item", "v1")
        .await
        .unwrap_err();
    assert!(matches!(err, SdkError::Payload(_)));

    update.assert_calls(0);
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn business_endpoint_renders_template() {
    let server = MockServer::start();
    let store = server.mock(|when, then| {
        when.method(POST)
            .path("/ingest/workflow/testmock/testmock:job")
            .query_param("priority", "high")
            .json_body(json!({"job": "transcode"}));
        then.status(202).json_body(json!({"accepted": true}));
    });
    let browse = server.mock(|when, then| {
        when.method(GET).path("/status/workflow/testmock:job");
        then.status(200).json_body(json!({"state": "running"}));
    });

    let (client, _) = client(&config(&server), Recording::new());
    let metadata = client.service("metadata").unwrap();

    let page = metadata
        .business("/ingest/${service}/${owner}/${ref}${params}")
        .store(
            "workflow",
            OWNER,
            &json!({"job": "transcode"}),
            "testmock:job",
            &[("priority", "high")],
        )
        .await
        .unwrap();
    store.assert_calls(1);
    assert_eq!(page.json()["accepted"], true);
    assert_eq!(page.resource_name(), None);

    let page = metadata
        .business("/status/$service/${ref}")
        .browse("workflow", &[("ref", "testmock:job")])
        .await
        .unwrap();
    browse.assert_calls(1);
    assert_eq!(page.json()["state"], "running");
}
