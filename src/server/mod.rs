//! HTTP surface of the curator
//!
//! ```text
//!   POST /api/provide            GET /api/annotations
//!   POST /api/ws-provide         GET /api/identities
//!   POST /api/record             GET /api/health
//!   PUT  /api/record             GET /api/ping | name | version | source-identifier
//!   GET  /api/record/{id}        GET /metrics
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use curator::config::Config;
//! use curator::server::CuratorServer;
//!
//! let config = Config::from_file("curator.toml".as_ref())?;
//! let server = CuratorServer::new(config)?;
//! server.start_with_shutdown(shutdown_signal()).await?;
//! ```

pub mod api;
pub mod app;

pub use api::{create_router, ApiResponse, ProvideRequest, RecordRequest, WsProvideRequest};
pub use app::{AppState, CuratorServer, ServerError, ServerInfo};
