//! Test fixtures shared by the integration tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use curator::annotator::{
    AnnotatorBackend, BackendError, BackendIdentity, BackendRole, WhitespaceTokenizer,
};
use curator::archive::{Archive, MemoryArchive};
use curator::config::Config;
use curator::models::{Labeling, Record, Span, SENTENCE_VIEW, TOKEN_VIEW};
use curator::orchestrator::{CascadeMode, Orchestrator};
use curator::pool::WorkerPool;
use curator::server::{CuratorServer, ServerError};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub const TEXT: &str = "The quick brown fox jumped over the lazy dog.";

/// Order in which labelers were called, shared across labelers
pub type CallLog = Arc<Mutex<Vec<String>>>;

/// Labeler that counts its calls and tags one span per record
pub struct CountingLabeler {
    view: String,
    source: Mutex<String>,
    calls: AtomicUsize,
    fail: AtomicBool,
    delay: Duration,
    log: CallLog,
}

impl CountingLabeler {
    pub fn new(view: &str, source: &str, log: &CallLog) -> Arc<Self> {
        Self::with_delay(view, source, log, Duration::ZERO)
    }

    pub fn with_delay(view: &str, source: &str, log: &CallLog, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            view: view.to_string(),
            source: Mutex::new(source.to_string()),
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            delay,
            log: log.clone(),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Simulate a backend upgrade
    pub fn set_source(&self, source: &str) {
        *self.source.lock().unwrap() = source.to_string();
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn source(&self) -> String {
        self.source.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnnotatorBackend for CountingLabeler {
    async fn identity(&self) -> Result<BackendIdentity, BackendError> {
        Ok(BackendIdentity::new(self.view.to_uppercase(), self.source()))
    }

    async fn label_record(&self, record: &Record) -> Result<Labeling, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(self.view.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(BackendError::Transport("connection refused".to_string()));
        }
        Ok(Labeling::new(
            vec![Span::labelled(0, record.raw_text.len(), &self.view)],
            self.source(),
        ))
    }
}

pub fn labeler_pool(name: &str, backend: Arc<CountingLabeler>) -> WorkerPool {
    WorkerPool::in_process(name, BackendRole::Labeler, backend, 4, Duration::from_secs(5))
}

pub fn tokenizer_pool() -> WorkerPool {
    WorkerPool::in_process(
        "tokenizer",
        BackendRole::MultiLabeler,
        Arc::new(WhitespaceTokenizer),
        4,
        Duration::from_secs(5),
    )
}

/// ```text
/// sentence+token <- pos  <-+
///                <- ner  <-+- chunk
/// ```
pub struct Pipeline {
    pub orchestrator: Arc<Orchestrator>,
    pub pos: Arc<CountingLabeler>,
    pub ner: Arc<CountingLabeler>,
    pub chunk: Arc<CountingLabeler>,
    pub log: CallLog,
}

pub fn pipeline() -> Pipeline {
    pipeline_with(Arc::new(MemoryArchive::new()), CascadeMode::SingleLevel)
}

pub fn pipeline_with(archive: Arc<dyn Archive>, cascade: CascadeMode) -> Pipeline {
    let log = CallLog::default();
    let pos = CountingLabeler::new("pos", "pos-1.0", &log);
    let ner = CountingLabeler::new("ner", "ner-1.0", &log);
    let chunk = CountingLabeler::new("chunk", "chunk-1.0", &log);

    let orchestrator = Orchestrator::builder(archive)
        .cascade(cascade)
        .pool(tokenizer_pool(), [SENTENCE_VIEW, TOKEN_VIEW], Vec::<String>::new())
        .pool(labeler_pool("pos", pos.clone()), ["pos"], [SENTENCE_VIEW, TOKEN_VIEW])
        .pool(labeler_pool("ner", ner.clone()), ["ner"], [TOKEN_VIEW])
        .pool(labeler_pool("chunk", chunk.clone()), ["chunk"], ["pos", "ner"])
        .build()
        .unwrap();

    Pipeline {
        orchestrator: Arc::new(orchestrator),
        pos,
        ner,
        chunk,
        log,
    }
}

/// A curator server listening on an ephemeral local port
pub struct TestServer {
    pub url: String,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    pub async fn start(orchestrator: Arc<Orchestrator>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let mut config = Config::default();
        config.server.enable_request_logging = false;
        let server = CuratorServer::with_orchestrator(config, orchestrator);

        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            server
                .serve(listener, async {
                    rx.await.ok();
                })
                .await
        });

        Self {
            url,
            shutdown: Some(tx),
            handle,
        }
    }

    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            tx.send(()).ok();
        }
        self.handle.await.unwrap().unwrap();
    }
}
