//! Configuration management for the curator
//!
//! Configuration is read from a TOML file and/or `CURATOR_*` environment
//! variables. Environment values override file values.
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0:9010"
//! threads = 8
//!
//! [curator]
//! client_timeout_secs = 45
//!
//! [archive]
//! backend = "sqlite"
//! sqlite_path = "data/curator.db"
//!
//! [[annotators]]
//! role = "multilabeler"
//! local = "whitespace"
//! fields = ["sentence", "token"]
//!
//! [[annotators]]
//! role = "labeler"
//! hosts = ["localhost:9091"]
//! fields = ["pos"]
//! requirements = ["sentence", "token"]
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::annotator::{self, BackendRole};
use crate::orchestrator::dependency::DependencyGraph;
use crate::orchestrator::invalidation::CascadeMode;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub curator: CuratorConfig,
    pub archive: ArchiveConfig,
    pub logging: LoggingConfig,
    pub annotators: Vec<AnnotatorConfig>,
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_address: SocketAddr,

    /// Request worker threads; 1 runs everything on a single thread
    pub threads: usize,

    /// Enable request logging
    pub enable_request_logging: bool,

    /// Enable CORS for API
    pub enable_cors: bool,
}

/// Orchestration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CuratorConfig {
    /// Master curator; setting this makes this instance a replica
    pub master_url: Option<String>,

    /// Accept `store_record` from clients even when not a replica
    pub write_access: bool,

    /// Connect/read timeout for backend and master connections
    pub client_timeout_secs: u64,

    /// Interval between usage reports
    pub report_interval_secs: u64,

    /// Interval between backend identity polls
    pub version_interval_secs: u64,

    /// Drop every transitive dependent of a stale view, not only direct ones
    pub transitive_invalidation: bool,
}

/// Record store selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveBackend {
    #[default]
    Memory,
    Sqlite,
}

impl std::str::FromStr for ArchiveBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "sqlite" => Ok(Self::Sqlite),
            other => anyhow::bail!("unknown archive backend: {other}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub backend: ArchiveBackend,

    /// SQLite database path
    pub sqlite_path: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

/// One backend annotator registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotatorConfig {
    pub role: BackendRole,

    /// `host:port` endpoints serving this annotator
    #[serde(default)]
    pub hosts: Vec<String>,

    /// Name of an in-process backend, used instead of `hosts`
    #[serde(default)]
    pub local: Option<String>,

    /// Views produced; multi-output roles fill them positionally
    pub fields: Vec<String>,

    /// Views that must be present before this annotator runs
    #[serde(default)]
    pub requirements: Vec<String>,

    #[serde(default = "default_clients_per_host")]
    pub clients_per_host: usize,
}

fn default_clients_per_host() -> usize {
    1
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 9010)),
            threads: 8,
            enable_request_logging: true,
            enable_cors: true,
        }
    }
}

impl Default for CuratorConfig {
    fn default() -> Self {
        Self {
            master_url: None,
            write_access: false,
            client_timeout_secs: 45,
            report_interval_secs: 300,
            version_interval_secs: 1800,
            transitive_invalidation: false,
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            backend: ArchiveBackend::Memory,
            sqlite_path: PathBuf::from("data/curator.db"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Layer `CURATOR_*` environment variables over the current values
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(addr) = env_var("CURATOR_BIND_ADDRESS") {
            self.server.bind_address = addr
                .parse()
                .with_context(|| format!("CURATOR_BIND_ADDRESS is not a socket address: {addr}"))?;
        }
        if let Some(threads) = env_parse("CURATOR_THREADS")? {
            self.server.threads = threads;
        }
        if let Some(master) = env_var("CURATOR_MASTER_URL") {
            self.curator.master_url = Some(master);
        }
        if let Some(write) = env_parse("CURATOR_WRITE_ACCESS")? {
            self.curator.write_access = write;
        }
        if let Some(secs) = env_parse("CURATOR_CLIENT_TIMEOUT")? {
            self.curator.client_timeout_secs = secs;
        }
        if let Some(secs) = env_parse("CURATOR_REPORT_INTERVAL")? {
            self.curator.report_interval_secs = secs;
        }
        if let Some(secs) = env_parse("CURATOR_VERSION_INTERVAL")? {
            self.curator.version_interval_secs = secs;
        }
        if let Some(transitive) = env_parse("CURATOR_TRANSITIVE_INVALIDATION")? {
            self.curator.transitive_invalidation = transitive;
        }
        if let Some(backend) = env_parse("CURATOR_ARCHIVE")? {
            self.archive.backend = backend;
        }
        if let Some(path) = env_var("CURATOR_SQLITE_PATH") {
            self.archive.sqlite_path = path.into();
        }
        if let Some(level) = env_var("CURATOR_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = env_var("CURATOR_LOG_FORMAT") {
            self.logging.format = format;
        }
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.server.threads == 0 {
            anyhow::bail!("threads must be greater than 0");
        }
        if self.curator.client_timeout_secs == 0 {
            anyhow::bail!("client_timeout_secs must be greater than 0");
        }
        if self.curator.report_interval_secs == 0 || self.curator.version_interval_secs == 0 {
            anyhow::bail!("report and version intervals must be greater than 0");
        }

        let mut registered = HashSet::new();
        for (i, annotator) in self.annotators.iter().enumerate() {
            if annotator.fields.is_empty() {
                anyhow::bail!("annotator #{i} ({}) declares no fields", annotator.role);
            }
            match &annotator.local {
                Some(name) if annotator::builtin(name).is_none() => anyhow::bail!(
                    "annotator #{i}: unknown local backend '{name}' (known: {})",
                    annotator::BUILTIN_BACKENDS.join(", ")
                ),
                None if annotator.hosts.is_empty() => {
                    anyhow::bail!("annotator #{i} ({}) has neither hosts nor local", annotator.role)
                }
                _ => {}
            }
            if annotator.clients_per_host == 0 {
                anyhow::bail!("annotator #{i}: clients_per_host must be greater than 0");
            }
            for field in &annotator.fields {
                if !registered.insert(field.as_str()) {
                    anyhow::bail!("field '{field}' is registered by more than one annotator");
                }
            }
        }

        for annotator in &self.annotators {
            for requirement in &annotator.requirements {
                if !registered.contains(requirement.as_str()) {
                    anyhow::bail!(
                        "{} requires '{requirement}', which no annotator provides",
                        annotator.fields.join(", ")
                    );
                }
            }
        }

        if let Some(cycle) = self.dependency_graph().find_cycle() {
            anyhow::bail!("cyclic requirements: {}", cycle.join(" -> "));
        }

        Ok(())
    }

    /// Requirement graph declared by the annotator registrations
    pub fn dependency_graph(&self) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for annotator in &self.annotators {
            for field in &annotator.fields {
                graph.add_requirements(field, annotator.requirements.iter().cloned());
            }
        }
        graph
    }

    pub fn is_replica(&self) -> bool {
        self.curator.master_url.is_some()
    }

    pub fn cascade_mode(&self) -> CascadeMode {
        if self.curator.transitive_invalidation {
            CascadeMode::Transitive
        } else {
            CascadeMode::SingleLevel
        }
    }

    /// Get client timeout as Duration
    #[must_use]
    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.curator.client_timeout_secs)
    }

    #[must_use]
    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.curator.report_interval_secs)
    }

    #[must_use]
    pub fn version_interval(&self) -> Duration {
        Duration::from_secs(self.curator.version_interval_secs)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    env_var(name)
        .map(|v| {
            v.trim()
                .parse::<T>()
                .map_err(|e| anyhow::anyhow!("{name}={v} is invalid: {e}"))
        })
        .transpose()
}
