//! `curator check-config`

use anyhow::Result;
use curator::config::Config;

/// Validate `config` and print what it would run
pub fn check_config(config: &Config) -> Result<()> {
    config.validate()?;

    println!("Configuration OK");
    println!("================");
    println!("  Bind Address: {}", config.server.bind_address);
    println!("  Threads: {}", config.server.threads);
    println!("  Archive: {:?}", config.archive.backend);

    if let Some(master) = &config.curator.master_url {
        println!("  Mode: replica of {master}");
        if !config.annotators.is_empty() {
            println!("  ({} annotators configured but ignored)", config.annotators.len());
        }
        return Ok(());
    }
    println!("  Mode: master");
    println!();

    println!("Annotators:");
    for annotator in &config.annotators {
        let endpoint = match &annotator.local {
            Some(local) => format!("local:{local}"),
            None => annotator.hosts.join(", "),
        };
        println!(
            "  {:<14} {:<24} {}",
            annotator.role.as_str(),
            annotator.fields.join(", "),
            endpoint
        );
    }
    println!();

    println!("Requirements:");
    let graph = config.dependency_graph();
    let edges = graph.edges();
    if edges.iter().all(|(_, requirements)| requirements.is_empty()) {
        println!("  (none)");
    }
    for (view, requirements) in edges {
        if !requirements.is_empty() {
            println!("  {view} <- {}", requirements.join(", "));
        }
    }
    Ok(())
}
