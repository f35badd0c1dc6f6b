//! Resolution, caching and invalidation through the orchestrator

use std::sync::Arc;
use std::time::Duration;

use curator::annotator::WHITESPACE_SOURCE;
use curator::archive::{Archive, MemoryArchive, SqliteArchive};
use curator::error::ErrorKind;
use curator::models::{record_identifier, SENTENCE_VIEW, TOKEN_VIEW};
use curator::orchestrator::{CascadeMode, Orchestrator};

use super::fixtures::{labeler_pool, pipeline, pipeline_with, CallLog, CountingLabeler, TEXT};

// ============================================================================
// Caching
// ============================================================================

#[tokio::test]
async fn test_identical_text_addresses_same_record() {
    let p = pipeline();

    let provided = p.orchestrator.provide("pos", TEXT, false).await.unwrap();
    let loaded = p.orchestrator.get_record(TEXT).await.unwrap();
    let again = p.orchestrator.provide("ner", TEXT, false).await.unwrap();

    assert_eq!(provided.identifier, loaded.identifier);
    assert_eq!(provided.identifier, again.identifier);
    assert_eq!(provided.identifier, record_identifier(TEXT, false));
    assert!(again.contains_view("pos"));
}

#[tokio::test]
async fn test_second_provide_is_served_from_cache() {
    let p = pipeline();

    let first = p.orchestrator.provide("pos", TEXT, false).await.unwrap();
    let second = p.orchestrator.provide("pos", TEXT, false).await.unwrap();

    assert_eq!(p.pos.calls(), 1);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_sqlite_archive_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("curator.db");

    {
        let archive = Arc::new(SqliteArchive::open(&path).unwrap());
        let p = pipeline_with(archive, CascadeMode::SingleLevel);
        p.orchestrator.provide("chunk", TEXT, false).await.unwrap();
        assert_eq!(p.chunk.calls(), 1);
    }

    let archive = Arc::new(SqliteArchive::open(&path).unwrap());
    let p = pipeline_with(archive, CascadeMode::SingleLevel);
    let record = p.orchestrator.provide("chunk", TEXT, false).await.unwrap();

    assert!(record.contains_view("chunk"));
    assert_eq!(p.chunk.calls(), 0);
    assert_eq!(p.pos.calls(), 0);
}

// ============================================================================
// Requirements
// ============================================================================

#[tokio::test]
async fn test_requirements_computed_before_view() {
    let p = pipeline();
    let record = p.orchestrator.provide("chunk", TEXT, false).await.unwrap();

    for view in [SENTENCE_VIEW, TOKEN_VIEW, "pos", "ner", "chunk"] {
        assert!(record.contains_view(view), "missing {view}");
    }
    assert_eq!(*p.log.lock().unwrap(), vec!["pos", "ner", "chunk"]);
}

#[tokio::test]
async fn test_present_requirement_not_recomputed() {
    let p = pipeline();
    p.orchestrator.provide("pos", TEXT, false).await.unwrap();
    p.orchestrator.provide("ner", TEXT, false).await.unwrap();

    p.orchestrator.provide("chunk", TEXT, false).await.unwrap();

    assert_eq!(p.pos.calls(), 1);
    assert_eq!(p.ner.calls(), 1);
    assert_eq!(p.chunk.calls(), 1);
}

#[tokio::test]
async fn test_force_update_recomputes_every_requirement() {
    let p = pipeline();
    p.orchestrator.provide("chunk", TEXT, false).await.unwrap();
    p.log.lock().unwrap().clear();

    p.orchestrator.provide("chunk", TEXT, true).await.unwrap();

    assert_eq!(p.pos.calls(), 2);
    assert_eq!(p.ner.calls(), 2);
    assert_eq!(p.chunk.calls(), 2);
    assert_eq!(*p.log.lock().unwrap(), vec!["pos", "ner", "chunk"]);
}

#[tokio::test]
async fn test_failed_requirement_aborts_request() {
    let p = pipeline();
    p.ner.set_failing(true);

    let err = p.orchestrator.provide("chunk", TEXT, false).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ServiceUnavailable);
    assert!(err.to_string().starts_with("ner unavailable"));
    assert_eq!(p.chunk.calls(), 0);
}

// ============================================================================
// Invalidation
// ============================================================================

#[tokio::test]
async fn test_backend_upgrade_invalidates_view_and_dependents() {
    let p = pipeline();
    p.orchestrator.refresh_identities().await;
    p.orchestrator.provide("chunk", TEXT, false).await.unwrap();

    p.pos.set_source("pos-2.0");
    p.orchestrator.refresh_identities().await;

    let record = p.orchestrator.get_record(TEXT).await.unwrap();
    assert!(!record.contains_view("pos"));
    assert!(!record.contains_view("chunk"));
    assert!(record.contains_view("ner"));

    let record = p.orchestrator.provide("chunk", TEXT, false).await.unwrap();
    assert_eq!(record.source_of("pos"), Some("pos-2.0"));
    assert_eq!(p.pos.calls(), 2);
    assert_eq!(p.chunk.calls(), 2);
}

#[tokio::test]
async fn test_older_backend_does_not_invalidate() {
    let p = pipeline();
    p.orchestrator.refresh_identities().await;
    p.orchestrator.provide("pos", TEXT, false).await.unwrap();

    // Rolled back to an older version of the same annotator
    p.pos.set_source("pos-0.9");
    p.orchestrator.refresh_identities().await;

    let record = p.orchestrator.provide("pos", TEXT, false).await.unwrap();
    assert_eq!(record.source_of("pos"), Some("pos-1.0"));
    assert_eq!(p.pos.calls(), 1);
}

#[tokio::test]
async fn test_transitive_cascade() {
    let log = CallLog::default();
    let pos = CountingLabeler::new("pos", "pos-1.0", &log);
    let chunk = CountingLabeler::new("chunk", "chunk-1.0", &log);
    let srl = CountingLabeler::new("srl", "srl-1.0", &log);

    let orchestrator = Orchestrator::builder(Arc::new(MemoryArchive::new()))
        .cascade(CascadeMode::Transitive)
        .pool(labeler_pool("pos", pos.clone()), ["pos"], Vec::<String>::new())
        .pool(labeler_pool("chunk", chunk), ["chunk"], ["pos"])
        .pool(labeler_pool("srl", srl), ["srl"], ["chunk"])
        .build()
        .unwrap();

    orchestrator.refresh_identities().await;
    orchestrator.provide("srl", TEXT, false).await.unwrap();

    pos.set_source("pos-1.1");
    orchestrator.refresh_identities().await;

    let record = orchestrator.get_record(TEXT).await.unwrap();
    assert!(record.view_names().is_empty());
}

// ============================================================================
// Pre-tokenized input
// ============================================================================

#[tokio::test]
async fn test_ws_provide_uses_caller_segmentation() {
    let p = pipeline();
    let sentences = vec![
        "The quick brown fox jumped .".to_string(),
        "It was lazy .".to_string(),
    ];

    let record = p.orchestrator.ws_provide("pos", &sentences, false).await.unwrap();

    assert!(record.whitespaced);
    assert_ne!(record.identifier, record_identifier(&record.raw_text, false));
    assert_eq!(record.source_of(SENTENCE_VIEW), Some(WHITESPACE_SOURCE));
    assert_eq!(record.source_of(TOKEN_VIEW), Some(WHITESPACE_SOURCE));
    assert_eq!(record.label_views[TOKEN_VIEW].labels.len(), 10);

    // Forcing the segmentation regenerates it from the sentences, not a backend
    let forced = p.orchestrator.ws_provide(TOKEN_VIEW, &sentences, true).await.unwrap();
    assert_eq!(forced.label_views[SENTENCE_VIEW].labels.len(), 2);
    assert_eq!(p.pos.calls(), 1);
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn test_concurrent_requests_compute_once() {
    let log = CallLog::default();
    let slow = CountingLabeler::with_delay("pos", "pos-1.0", &log, Duration::from_millis(50));
    let orchestrator = Arc::new(
        Orchestrator::builder(Arc::new(MemoryArchive::new()))
            .pool(labeler_pool("pos", slow.clone()), ["pos"], Vec::<String>::new())
            .build()
            .unwrap(),
    );

    let requests = (0..4).map(|_| {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.provide("pos", TEXT, false).await })
    });
    let records = futures::future::join_all(requests).await;

    for record in records {
        assert!(record.unwrap().unwrap().contains_view("pos"));
    }
    assert_eq!(slow.calls(), 1);
}

#[tokio::test]
async fn test_concurrent_dependents_compute_requirement_once() {
    let log = CallLog::default();
    let pos = CountingLabeler::with_delay("pos", "pos-1.0", &log, Duration::from_millis(50));
    let chunk = CountingLabeler::with_delay("chunk", "chunk-1.0", &log, Duration::from_millis(50));
    let orchestrator = Arc::new(
        Orchestrator::builder(Arc::new(MemoryArchive::new()))
            .pool(labeler_pool("pos", pos.clone()), ["pos"], Vec::<String>::new())
            .pool(labeler_pool("chunk", chunk.clone()), ["chunk"], ["pos"])
            .build()
            .unwrap(),
    );

    let requests = (0..4).map(|_| {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.provide("chunk", TEXT, false).await })
    });
    let records = futures::future::join_all(requests).await;

    for record in records {
        let record = record.unwrap().unwrap();
        assert!(record.contains_view("pos"));
        assert!(record.contains_view("chunk"));
    }
    assert_eq!(pos.calls(), 1);
    assert_eq!(chunk.calls(), 1);
}

#[tokio::test]
async fn test_concurrent_views_both_persisted() {
    let log = CallLog::default();
    let pos = CountingLabeler::with_delay("pos", "pos-1.0", &log, Duration::from_millis(50));
    let ner = CountingLabeler::with_delay("ner", "ner-1.0", &log, Duration::from_millis(100));
    let orchestrator = Arc::new(
        Orchestrator::builder(Arc::new(MemoryArchive::new()))
            .pool(labeler_pool("pos", pos.clone()), ["pos"], Vec::<String>::new())
            .pool(labeler_pool("ner", ner.clone()), ["ner"], Vec::<String>::new())
            .build()
            .unwrap(),
    );

    let (tagged, named) = tokio::join!(
        orchestrator.provide("pos", TEXT, false),
        orchestrator.provide("ner", TEXT, false)
    );
    tagged.unwrap();
    named.unwrap();

    let stored = orchestrator
        .archive()
        .get_by_id(&record_identifier(TEXT, false))
        .await
        .unwrap()
        .unwrap();
    assert!(stored.contains_view("pos"));
    assert!(stored.contains_view("ner"));

    orchestrator.provide("pos", TEXT, false).await.unwrap();
    assert_eq!(pos.calls(), 1);
    assert_eq!(ner.calls(), 1);
}

#[tokio::test]
async fn test_handles_released_after_failures() {
    let p = pipeline();
    p.pos.set_failing(true);

    let texts: Vec<String> = (0..8).map(|i| format!("{TEXT} #{i}")).collect();
    let requests = texts
        .iter()
        .map(|text| p.orchestrator.provide("pos", text, false));
    let results = futures::future::join_all(requests).await;
    assert!(results.iter().all(|r| r.is_err()));

    for pool in p.orchestrator.pools() {
        let status = pool.status();
        assert_eq!(status.in_use, 0, "{} leaked a handle", status.name);
        assert_eq!(status.acquired_total, status.released_total);
    }
}
