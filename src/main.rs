use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, ensure};
use clap::{Parser, Subcommand};

use searchlight::config::Settings;
use searchlight::feed::{ChangeSource, FeedRef, RestSource};
use searchlight::pipeline::paths::{builtin_specs, retention_cutoff};
use searchlight::pipeline::{ChildPathMonitor, NestedPathMonitor, PathSpec};
use searchlight::sink::{EsSink, IndexSink};

#[derive(Parser)]
#[command(name = "searchlight")]
#[command(about = "Mirrors a hierarchical data store into a search index")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "searchlight.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start mirroring the configured feeds
    Run,

    /// Show the effective configuration
    Config,

    /// List the feeds that would be activated
    Paths,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings =
        Settings::load_from(&cli.config).context("failed to load configuration")?;

    match cli.command {
        Commands::Run => run(settings).await,
        Commands::Config => {
            println!(
                "{}",
                toml::to_string_pretty(&settings).context("failed to render configuration")?
            );
            Ok(())
        }
        Commands::Paths => {
            for spec in active_specs(&settings) {
                println!(
                    "{:<10} {} -> {}/{}",
                    spec.name(),
                    spec.source_location(),
                    spec.index(),
                    spec.doc_type()
                );
            }
            for location in &settings.monitor.dynamic_paths {
                println!("{:<10} {location}/* (dynamic)", "nested");
            }
            Ok(())
        }
    }
}

async fn run(settings: Settings) -> Result<()> {
    searchlight::logging::init_with_config(&settings.logging);

    ensure!(
        !settings.source.url.trim().is_empty(),
        "source.url must be configured"
    );

    let source: Arc<dyn ChangeSource> = Arc::new(RestSource::new(
        &settings.source.url,
        settings.source.auth.clone(),
    )?);
    let sink: Arc<dyn IndexSink> =
        Arc::new(EsSink::new(&settings.elastic).context("failed to build index sink")?);

    let specs = active_specs(&settings);
    ensure!(
        !specs.is_empty() || settings.monitor.dynamic_paths.is_some(),
        "no feeds configured; set monitor.paths, monitor.static_paths or monitor.dynamic_paths"
    );

    let mut monitors = Vec::with_capacity(specs.len());
    for spec in specs.iter().cloned() {
        monitors.push(ChildPathMonitor::start(
            spec,
            source.as_ref(),
            Arc::clone(&sink),
        )?);
    }

    let nested = match &settings.monitor.dynamic_paths {
        Some(location) => Some(NestedPathMonitor::for_specs(
            Arc::clone(&source),
            Arc::clone(&sink),
            FeedRef::new(location),
            specs,
        )?),
        None => None,
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutting down");

    for monitor in monitors {
        monitor.stop().await;
    }
    if let Some(nested) = nested {
        nested.stop().await;
    }
    Ok(())
}

/// The feeds activated by this configuration: the enabled built-ins plus
/// every declarative static path.
fn active_specs(settings: &Settings) -> Vec<Arc<dyn PathSpec>> {
    let monitor = &settings.monitor;
    let cutoff = retention_cutoff(monitor.retention_days);

    let mut specs = builtin_specs(&monitor.index, &monitor.doc_type, cutoff);
    if let Some(names) = monitor.enabled_names() {
        specs.retain(|spec| names.iter().any(|name| name.as_str() == spec.name()));
    }
    for static_spec in &monitor.static_paths {
        specs.push(Arc::new(static_spec.clone()));
    }
    specs
}
