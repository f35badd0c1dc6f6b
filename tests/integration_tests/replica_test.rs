//! A replica forwarding to a master curator over HTTP

use std::sync::Arc;
use std::time::Duration;

use curator::archive::{Archive, MemoryArchive};
use curator::error::ErrorKind;
use curator::models::{record_identifier, Labeling, Record, Span};
use curator::orchestrator::{HttpMaster, Orchestrator};

use super::fixtures::{pipeline, Pipeline, TestServer, TEXT};

fn replica_of(url: &str) -> Orchestrator {
    let master = HttpMaster::new(url, Duration::from_secs(5)).unwrap();
    Orchestrator::builder(Arc::new(MemoryArchive::new()))
        .master(Arc::new(master))
        .build()
        .unwrap()
}

async fn master_and_replica() -> (Pipeline, TestServer, Orchestrator) {
    let master = pipeline();
    let server = TestServer::start(master.orchestrator.clone()).await;
    let replica = replica_of(&server.url);
    (master, server, replica)
}

#[tokio::test]
async fn test_replica_forwards_and_keeps_result() {
    let (master, server, replica) = master_and_replica().await;
    assert!(replica.is_replica());

    let record = replica.provide("pos", TEXT, false).await.unwrap();
    assert!(record.contains_view("pos"));
    assert_eq!(record.identifier, record_identifier(TEXT, false));
    assert_eq!(master.pos.calls(), 1);

    server.stop().await;

    // Served from the replica's own archive once the master is gone
    let cached = replica.get_record(TEXT).await.unwrap();
    assert!(cached.contains_view("pos"));
    let again = replica.provide("pos", TEXT, false).await.unwrap();
    assert_eq!(again.source_of("pos"), Some("pos-1.0"));
}

#[tokio::test]
async fn test_forced_update_reaches_master() {
    let (master, _server, replica) = master_and_replica().await;

    replica.provide("pos", TEXT, false).await.unwrap();
    replica.provide("pos", TEXT, true).await.unwrap();

    assert_eq!(master.pos.calls(), 2);
}

#[tokio::test]
async fn test_get_record_by_id_falls_through_to_master() {
    let (master, _server, replica) = master_and_replica().await;
    let computed = master.orchestrator.provide("ner", TEXT, false).await.unwrap();

    let record = replica.get_record_by_id(&computed.identifier).await.unwrap();
    assert!(record.contains_view("ner"));

    let stored = replica.archive().get_by_id(&computed.identifier).await.unwrap();
    assert!(stored.is_some());

    let err = replica.get_record_by_id("no-such-record").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AnnotationFailed);
}

#[tokio::test]
async fn test_master_error_kind_preserved() {
    let (_master, _server, replica) = master_and_replica().await;

    let err = replica.provide("srl", TEXT, false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServiceUnavailable);

    let err = replica.provide("pos", "   ", false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InputRejected);
}

#[tokio::test]
async fn test_replica_adopts_master_identities() {
    let (master, _server, replica) = master_and_replica().await;
    master.orchestrator.refresh_identities().await;

    assert_eq!(replica.refresh_identities().await, 5);
    assert_eq!(replica.refresh_identities().await, 0);

    let described = replica.describe_annotations().await;
    assert_eq!(described["pos"], "POS identifies as pos-1.0");
    assert_eq!(described.len(), 5);
}

#[tokio::test]
async fn test_master_upgrade_invalidates_replica_cache() {
    let (master, _server, replica) = master_and_replica().await;
    replica.provide("pos", TEXT, false).await.unwrap();

    master.pos.set_source("pos-2.0");
    master.orchestrator.refresh_identities().await;
    replica.refresh_identities().await;

    let record = replica.provide("pos", TEXT, false).await.unwrap();
    assert_eq!(record.source_of("pos"), Some("pos-2.0"));
    assert_eq!(master.pos.calls(), 2);
}

#[tokio::test]
async fn test_ws_provide_forwarded() {
    let (master, _server, replica) = master_and_replica().await;
    let sentences = vec!["Colorless green ideas sleep .".to_string()];

    let record = replica.ws_provide("pos", &sentences, false).await.unwrap();

    assert!(record.whitespaced);
    assert!(record.contains_view("pos"));
    assert_eq!(record.label_views["token"].labels.len(), 5);
    assert_eq!(master.pos.calls(), 1);
}

#[tokio::test]
async fn test_replica_accepts_stored_records() {
    let (_master, _server, replica) = master_and_replica().await;
    let mut record = Record::new("Computed elsewhere.", false);
    record.insert_labeling("pos", Labeling::new(vec![Span::labelled(0, 8, "VBN")], "pos-1.0"));

    replica.store_record(&record).await.unwrap();

    let loaded = replica.get_record("Computed elsewhere.").await.unwrap();
    assert_eq!(loaded, record);
}

#[tokio::test]
async fn test_unreachable_master_is_service_unavailable() {
    let replica = replica_of("127.0.0.1:1");

    let err = replica.provide("pos", TEXT, false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServiceUnavailable);
    assert_eq!(replica.refresh_identities().await, 0);
    assert_eq!(replica.pool_report(), "pool status: replica of http://127.0.0.1:1");
}
