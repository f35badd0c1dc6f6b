//! `curator serve`

use anyhow::{Context, Result};
use curator::config::Config;
use curator::server::CuratorServer;

/// Command-line values that take precedence over file and environment
#[derive(Debug, Default)]
pub struct ServeOverrides {
    pub port: Option<u16>,
    pub threads: Option<usize>,
    pub master: Option<String>,
    pub write_access: bool,
}

impl ServeOverrides {
    pub fn apply(self, config: &mut Config) {
        if let Some(port) = self.port {
            config.server.bind_address.set_port(port);
        }
        if let Some(threads) = self.threads {
            config.server.threads = threads;
        }
        if let Some(master) = self.master {
            config.curator.master_url = Some(master);
        }
        if self.write_access {
            config.curator.write_access = true;
        }
    }
}

/// Run the curator until Ctrl+C
pub async fn serve(config: Config) -> Result<()> {
    if let Err(e) = curator::metrics::init_metrics() {
        tracing::warn!("Metrics initialization failed, continuing without metrics: {}", e);
    }

    let server = CuratorServer::new(config).context("Failed to create curator server")?;

    println!("{}", server.info().display());
    println!();
    println!("API Endpoints:");
    println!("  POST /api/provide             - Provide a view for raw text");
    println!("  POST /api/ws-provide          - Provide a view for pre-tokenized sentences");
    println!("  POST /api/record              - Cached record for text");
    println!("  PUT  /api/record              - Store an externally computed record");
    println!("  GET  /api/record/{{id}}         - Cached record by identifier");
    println!("  GET  /api/annotations         - Describe served annotations");
    println!("  GET  /api/identities          - Backend identities per view");
    println!("  GET  /api/health              - Health check");
    println!("  GET  /metrics                 - Prometheus metrics endpoint");
    println!();
    println!("Press Ctrl+C to stop.\n");

    server
        .start_with_shutdown(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Shutdown signal received");
                }
                Err(e) => {
                    tracing::error!("Failed to wait for Ctrl+C: {}", e);
                }
            }
        })
        .await?;

    println!("Curator server stopped.");
    Ok(())
}
