//! Network backends reached through remote worker pools

use std::sync::Arc;
use std::time::Duration;

use curator::annotator::BackendRole;
use curator::archive::MemoryArchive;
use curator::error::ErrorKind;
use curator::orchestrator::Orchestrator;
use curator::pool::WorkerPool;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::fixtures::TEXT;

fn remote_pool(name: &str, role: BackendRole, server: &MockServer) -> WorkerPool {
    WorkerPool::remote(name, role, &[server.uri()], 2, Duration::from_secs(5)).unwrap()
}

fn single_view(pool: WorkerPool, view: &str) -> Orchestrator {
    Orchestrator::builder(Arc::new(MemoryArchive::new()))
        .pool(pool, [view], Vec::<String>::new())
        .build()
        .unwrap()
}

async fn mount_identity(server: &MockServer, name: &str, source: &str) {
    Mock::given(method("GET"))
        .and(path("/api/identity"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": name,
            "source_identifier": source,
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_remote_labeler_called_once_per_record() {
    let server = MockServer::start().await;
    mount_identity(&server, "POS Tagger", "pos-1.0").await;
    Mock::given(method("POST"))
        .and(path("/api/label"))
        .and(body_partial_json(json!({ "raw_text": TEXT })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "labels": [
                { "start": 0, "ending": 3, "label": "DT" },
                { "start": 4, "ending": 9, "label": "JJ" }
            ],
            "source": "pos-1.0"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let orchestrator = single_view(remote_pool("pos", BackendRole::Labeler, &server), "pos");
    assert_eq!(orchestrator.refresh_identities().await, 1);

    let first = orchestrator.provide("pos", TEXT, false).await.unwrap();
    let second = orchestrator.provide("pos", TEXT, false).await.unwrap();

    assert_eq!(first.label_views["pos"].labels.len(), 2);
    assert_eq!(first, second);

    let described = orchestrator.describe_annotations().await;
    assert_eq!(described["pos"], "POS Tagger identifies as pos-1.0");
}

#[tokio::test]
async fn test_unstamped_output_takes_backend_identity() {
    let server = MockServer::start().await;
    mount_identity(&server, "NER", "ner-3.1").await;
    Mock::given(method("POST"))
        .and(path("/api/label"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "labels": [{ "start": 4, "ending": 9, "label": "ORG" }],
            "source": ""
        })))
        .mount(&server)
        .await;

    let orchestrator = single_view(remote_pool("ner", BackendRole::Labeler, &server), "ner");
    let record = orchestrator.provide("ner", TEXT, false).await.unwrap();

    assert_eq!(record.source_of("ner"), Some("ner-3.1"));
}

#[tokio::test]
async fn test_annotation_failure_reported_by_backend() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/label"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "error": "sentence too long",
            "kind": "annotation_failed"
        })))
        .mount(&server)
        .await;

    let orchestrator = single_view(remote_pool("pos", BackendRole::Labeler, &server), "pos");
    let err = orchestrator.provide("pos", TEXT, false).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::AnnotationFailed);
    assert!(err.to_string().contains("sentence too long"));
}

#[tokio::test]
async fn test_server_error_is_service_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/label"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
        .mount(&server)
        .await;

    let orchestrator = single_view(remote_pool("pos", BackendRole::Labeler, &server), "pos");
    let err = orchestrator.provide("pos", TEXT, false).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ServiceUnavailable);
    assert!(err.is_recoverable());

    let status = orchestrator.pools()[0].status();
    assert_eq!(status.in_use, 0);
}

#[tokio::test]
async fn test_unreachable_backend_is_service_unavailable() {
    let pool = WorkerPool::remote(
        "pos",
        BackendRole::Labeler,
        &["127.0.0.1:1".to_string()],
        1,
        Duration::from_secs(2),
    )
    .unwrap();
    let orchestrator = single_view(pool, "pos");

    let err = orchestrator.provide("pos", TEXT, false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServiceUnavailable);
    assert_eq!(orchestrator.refresh_identities().await, 0);
}

#[tokio::test]
async fn test_multi_parser_fills_fields_in_order() {
    let server = MockServer::start().await;
    mount_identity(&server, "Dual Parser", "dualparse-2.0").await;
    Mock::given(method("POST"))
        .and(path("/api/parses"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "trees": [{ "nodes": [{ "label": "S" }], "top": 0 }],
                "source": "dualparse-2.0"
            },
            {
                "trees": [{ "nodes": [{ "label": "ROOT" }, { "label": "jumped" }], "top": 0 }],
                "source": "dualparse-2.0"
            }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let orchestrator = Orchestrator::builder(Arc::new(MemoryArchive::new()))
        .pool(
            remote_pool("parser", BackendRole::MultiParser, &server),
            ["constituency", "dependency"],
            Vec::<String>::new(),
        )
        .build()
        .unwrap();

    let record = orchestrator.provide("dependency", TEXT, false).await.unwrap();
    assert_eq!(record.parse_views["constituency"].trees[0].nodes[0].label, "S");
    assert_eq!(record.parse_views["dependency"].trees[0].nodes.len(), 2);

    // Sibling came from the same call
    let record = orchestrator.provide("constituency", TEXT, false).await.unwrap();
    assert!(record.contains_view("dependency"));
}
