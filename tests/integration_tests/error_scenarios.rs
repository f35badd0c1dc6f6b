//! Error classification and probes on the HTTP surface

use std::sync::Arc;

use curator::archive::MemoryArchive;
use curator::models::{Labeling, Record};
use curator::orchestrator::Orchestrator;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

use super::fixtures::{labeler_pool, pipeline, CallLog, CountingLabeler, TestServer, TEXT};

async fn post(url: &str, body: Value) -> (StatusCode, Value) {
    let response = Client::new().post(url).json(&body).send().await.unwrap();
    let status = response.status();
    (status, response.json().await.unwrap())
}

async fn get(url: &str) -> (StatusCode, Value) {
    let response = Client::new().get(url).send().await.unwrap();
    let status = response.status();
    (status, response.json().await.unwrap())
}

#[tokio::test]
async fn test_provide_over_http() {
    let p = pipeline();
    let server = TestServer::start(p.orchestrator.clone()).await;

    let (status, body) = post(
        &format!("{}/api/provide", server.url),
        json!({ "view_name": "chunk", "text": TEXT }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["raw_text"], TEXT);
    assert!(body["data"]["label_views"]["chunk"].is_object());
    assert_eq!(p.chunk.calls(), 1);
}

#[tokio::test]
async fn test_blank_text_is_bad_request() {
    let server = TestServer::start(pipeline().orchestrator).await;

    let (status, body) = post(
        &format!("{}/api/provide", server.url),
        json!({ "view_name": "pos", "text": "  \n" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["kind"], "input_rejected");
}

#[tokio::test]
async fn test_unknown_view_is_service_unavailable() {
    let server = TestServer::start(pipeline().orchestrator).await;

    let (status, body) = post(
        &format!("{}/api/provide", server.url),
        json!({ "view_name": "srl", "text": TEXT }),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["kind"], "service_unavailable");
    assert!(body["error"].as_str().unwrap().starts_with("srl unavailable"));
}

#[tokio::test]
async fn test_unknown_identifier_is_unprocessable() {
    let server = TestServer::start(pipeline().orchestrator).await;

    let (status, body) = get(&format!("{}/api/record/deadbeef", server.url)).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["kind"], "annotation_failed");
}

#[tokio::test]
async fn test_store_record_requires_write_access() {
    let server = TestServer::start(pipeline().orchestrator).await;
    let record = Record::new(TEXT, false);

    let response = Client::new()
        .put(format!("{}/api/record", server.url))
        .json(&record)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["kind"], "security");
}

#[tokio::test]
async fn test_store_record_with_write_access() {
    let log = CallLog::default();
    let pos = CountingLabeler::new("pos", "pos-1.0", &log);
    let orchestrator = Orchestrator::builder(Arc::new(MemoryArchive::new()))
        .write_access(true)
        .pool(labeler_pool("pos", pos.clone()), ["pos"], Vec::<String>::new())
        .build()
        .unwrap();
    let server = TestServer::start(Arc::new(orchestrator)).await;
    let client = Client::new();

    let mut record = Record::new(TEXT, false);
    record.insert_labeling("pos", Labeling::new(vec![], "pos-1.0"));
    let response = client
        .put(format!("{}/api/record", server.url))
        .json(&record)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"], record.identifier.as_str());

    // Stored view is served without calling the backend
    let (status, _) = post(
        &format!("{}/api/provide", server.url),
        json!({ "view_name": "pos", "text": TEXT }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pos.calls(), 0);

    // Identifier must match the text
    record.identifier = "forged".to_string();
    let response = client
        .put(format!("{}/api/record", server.url))
        .json(&record)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_probes() {
    let server = TestServer::start(pipeline().orchestrator).await;

    let (_, ping) = get(&format!("{}/api/ping", server.url)).await;
    let (_, name) = get(&format!("{}/api/name", server.url)).await;
    let (_, version) = get(&format!("{}/api/version", server.url)).await;
    let (_, source) = get(&format!("{}/api/source-identifier", server.url)).await;

    assert_eq!(ping["data"], true);
    assert_eq!(name["data"], "Curator");
    assert_eq!(version["data"], "0.6");
    assert_eq!(source["data"], "curator-0.6");
}

#[tokio::test]
async fn test_introspection_endpoints() {
    let server = TestServer::start(pipeline().orchestrator).await;

    let (status, annotations) = get(&format!("{}/api/annotations", server.url)).await;
    assert_eq!(status, StatusCode::OK);
    let views = annotations["data"].as_object().unwrap();
    for view in ["sentence", "token", "pos", "ner", "chunk"] {
        assert!(views.contains_key(view), "missing {view}");
    }

    let (status, health) = get(&format!("{}/api/health", server.url)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["data"]["status"], "healthy");
    assert_eq!(health["data"]["replica"], false);
    assert_eq!(health["data"]["pools"].as_array().unwrap().len(), 4);

    let response = Client::new()
        .get(format!("{}/metrics", server.url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
