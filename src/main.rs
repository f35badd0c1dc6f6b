use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(
    name = "curator",
    version,
    about = "Annotation orchestration service with version-aware caching",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); defaults to the configured format
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the curator server
    Serve {
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the listening port
        #[arg(short, long)]
        port: Option<u16>,

        /// Request worker threads (1 = single-threaded)
        #[arg(short, long)]
        threads: Option<usize>,

        /// Run as a replica of this master curator
        #[arg(short, long)]
        master: Option<String>,

        /// Accept records stored by clients
        #[arg(long)]
        write_access: bool,
    },

    /// Validate a configuration file and print the requirement graph
    CheckConfig {
        /// TOML configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            port,
            threads,
            master,
            write_access,
        } => {
            let mut config = commands::load_config(config.as_deref())?;
            commands::ServeOverrides {
                port,
                threads,
                master,
                write_access,
            }
            .apply(&mut config);

            let format = cli.log_format.as_deref().unwrap_or(&config.logging.format);
            setup_tracing(&config.logging.level, format, cli.verbose)?;

            let runtime = build_runtime(config.server.threads)?;
            runtime.block_on(commands::serve(config))
        }
        Commands::CheckConfig { config } => {
            setup_tracing("warn", cli.log_format.as_deref().unwrap_or("text"), cli.verbose)?;
            let config = commands::load_config(Some(&config))?;
            commands::check_config(&config)
        }
    }
}

/// One worker thread runs everything on the current thread
fn build_runtime(threads: usize) -> Result<tokio::runtime::Runtime> {
    let runtime = if threads <= 1 {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
    } else {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(threads)
            .thread_name("curator-worker")
            .enable_all()
            .build()
    };
    runtime.context("Failed to build tokio runtime")
}

fn setup_tracing(level: &str, format: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("curator=debug,tower_http=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("curator={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()?;
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()?;
        }
    }

    Ok(())
}
