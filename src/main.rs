//! Strata - an incremental static site generator.

mod build;
mod cli;
mod config;
mod data;
mod discovery;
mod engine;
mod graph;
mod logger;
mod passthrough;
mod source;
mod template;
mod watch;

use anyhow::{Result, bail};
use build::{BuildError, BuildSummary, Orchestrator};
use clap::Parser;
use cli::{Cli, Commands};
use config::{ConfigError, SiteConfig};
use discovery::WalkDiscovery;
use engine::ExtensionRegistry;
use graph::MapGraph;
use passthrough::CopyGate;
use std::path::Path;
use std::sync::Arc;
use watch::watch_for_changes_blocking;

fn main() -> Result<()> {
    let cli: &'static Cli = Box::leak(Box::new(Cli::parse()));
    let config: &'static SiteConfig = Box::leak(Box::new(load_config(cli)?));

    match &cli.command {
        Commands::Build { .. } => {
            let orchestrator = make_orchestrator(config, true)?;
            report(&orchestrator.run_full_build()?)
        }
        Commands::Watch { .. } => {
            let orchestrator = make_orchestrator(config, true)?;
            report(&orchestrator.run_full_build()?)?;
            watch_for_changes_blocking(&orchestrator, config)
        }
        Commands::Data {} => {
            // Pure content generation leaves no trace on disk, the
            // dependency cache included
            let orchestrator = make_orchestrator(config, false)?;
            print_as_data(&orchestrator)
        }
    }
}

/// Load and validate configuration from CLI arguments.
///
/// A missing config file is fatal: no run is possible without one.
fn load_config(cli: &'static Cli) -> Result<SiteConfig> {
    let root = cli.root.as_deref().unwrap_or(Path::new("./"));
    let config_path = root.join(&cli.config);

    let mut config = SiteConfig::from_path(&config_path).map_err(|err| match err {
        ConfigError::Missing(_) => anyhow::Error::from(BuildError::ConfigMissing),
        other => other.into(),
    })?;
    config.update_with_cli(cli);
    config.validate()?;
    Ok(config)
}

/// Wire up the default collaborators around the orchestrator.
fn make_orchestrator(config: &SiteConfig, persistent_graph: bool) -> Result<Orchestrator> {
    let registry = Arc::new(ExtensionRegistry::with_basic(&config.build.extensions));
    let graph = Box::new(if persistent_graph {
        MapGraph::load(config.cache_root().join("graph.json"))
    } else {
        MapGraph::in_memory()
    });
    let gate = Box::new(CopyGate::new(
        config.content_root(),
        config.output_root(),
        &config.build.passthrough_extensions,
        &config.build.passthrough_dirs,
        config.build.dry_run,
    ));
    let discovery = Box::new(WalkDiscovery::new(config.content_root()));

    Ok(Orchestrator::from_config(
        Some(config),
        registry,
        graph,
        gate,
        discovery,
    )?)
}

/// Report a run's aggregate result; a run with failures exits non-zero.
fn report(summary: &BuildSummary) -> Result<()> {
    for failure in &summary.failures {
        log!("error"; "{}", failure.chain());
    }
    log!("build"; "{} written, {} skipped", summary.written, summary.skipped);

    if !summary.is_success() {
        bail!("build failed with {} error(s)", summary.failures.len());
    }
    Ok(())
}

/// Print every generated output as a JSON array on stdout.
fn print_as_data(orchestrator: &Orchestrator) -> Result<()> {
    let outputs = orchestrator.generate_as_data()?;
    let entries: Vec<serde_json::Value> = outputs
        .iter()
        .map(|o| {
            serde_json::json!({
                "input": o.input.as_str(),
                "output": o.output.display().to_string(),
                "content": &*o.content,
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}
