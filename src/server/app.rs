//! Curator server implementation
//!
//! Owns the shared [`Orchestrator`], mounts the API router and runs the
//! background refreshers alongside the HTTP listener.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::orchestrator::background::{start_background_tasks, BackgroundTasks};
use crate::orchestrator::Orchestrator;

use super::api::create_router;

// ============================================================================
// App State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,

    /// Server start time
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            start_time: Instant::now(),
            started_at: Utc::now(),
        }
    }
}

// ============================================================================
// Curator Server
// ============================================================================

/// HTTP front end of one curator instance
pub struct CuratorServer {
    config: Config,
    state: AppState,
}

impl CuratorServer {
    /// Validate `config` and build the orchestrator it describes
    pub fn new(config: Config) -> Result<Self, ServerError> {
        config
            .validate()
            .map_err(|e| ServerError::Config(format!("{e:#}")))?;

        let orchestrator = Orchestrator::from_config(&config)
            .map_err(|e| ServerError::Init(e.to_string()))?;

        Ok(Self::with_orchestrator(config, Arc::new(orchestrator)))
    }

    /// Serve an already-built orchestrator
    pub fn with_orchestrator(config: Config, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            config,
            state: AppState::new(orchestrator),
        }
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let mut router = create_router(self.state.clone());

        if self.config.server.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        if self.config.server.enable_request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Bind the configured address and serve until `shutdown_signal` resolves
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let addr = self.config.server.bind_address;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(addr, e.to_string()))?;
        self.serve(listener, shutdown_signal).await
    }

    /// Serve on an already-bound listener until `shutdown_signal` resolves
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown_signal: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let router = self.build_router();
        let addr = listener
            .local_addr()
            .unwrap_or(self.config.server.bind_address);

        tracing::info!(
            "Starting {} {} on {} ({})",
            self.state.orchestrator.name(),
            self.state.orchestrator.version(),
            addr,
            if self.state.orchestrator.is_replica() { "replica" } else { "master" }
        );

        let tasks = self.start_background_tasks();

        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ServerError::Serve(e.to_string()));

        tasks.abort();
        tracing::info!("Curator server shutdown complete");
        served
    }

    fn start_background_tasks(&self) -> BackgroundTasks {
        start_background_tasks(
            self.state.orchestrator.clone(),
            self.config.version_interval(),
            self.config.report_interval(),
        )
    }

    /// Get server info
    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            bind_address: self.config.server.bind_address,
            threads: self.config.server.threads,
            master: self.config.curator.master_url.clone(),
            views: self
                .state
                .orchestrator
                .pools()
                .iter()
                .map(|p| p.name().to_string())
                .collect(),
            cors_enabled: self.config.server.enable_cors,
            request_logging_enabled: self.config.server.enable_request_logging,
        }
    }
}

/// Server information
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub bind_address: SocketAddr,
    pub threads: usize,
    pub master: Option<String>,
    /// Pool names, one per registered annotator
    pub views: Vec<String>,
    pub cors_enabled: bool,
    pub request_logging_enabled: bool,
}

impl ServerInfo {
    /// Format as display string
    pub fn display(&self) -> String {
        format!(
            "Curator Server\n\
             {:-<40}\n\
             Bind Address: {}\n\
             Threads: {}\n\
             Mode: {}\n\
             Pools: {}\n\
             CORS: {}\n\
             Request Logging: {}",
            "",
            self.bind_address,
            self.threads,
            match &self.master {
                Some(master) => format!("replica of {master}"),
                None => "master".to_string(),
            },
            if self.views.is_empty() { "none".to_string() } else { self.views.join(", ") },
            if self.cors_enabled { "enabled" } else { "disabled" },
            if self.request_logging_enabled { "enabled" } else { "disabled" }
        )
    }
}

// ============================================================================
// Server Errors
// ============================================================================

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Initialization error: {0}")]
    Init(String),

    #[error("Failed to bind {0}: {1}")]
    Bind(SocketAddr, String),

    #[error("Server error: {0}")]
    Serve(String),
}
