//! `stream` and `poll` command implementations.

use anyhow::{Context, Result};
use contracts::RelayBlueprint;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::pipeline::{Relay, RelayConfig, RelayMode};

/// Execute the `stream` command
pub async fn run_stream(args: &RunArgs) -> Result<()> {
    run_relay(args, RelayMode::Stream).await
}

/// Execute the `poll` command
pub async fn run_poll(args: &RunArgs) -> Result<()> {
    run_relay(args, RelayMode::Poll).await
}

async fn run_relay(args: &RunArgs, mode: RelayMode) -> Result<()> {
    info!(config = %args.config.display(), mode = mode.as_str(), "Loading configuration");

    let blueprint = load_blueprint(args)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    info!(
        endpoint = %blueprint.mist.endpoint,
        sources = mode.source_count(&blueprint),
        sinks = blueprint.sinks.len(),
        "Configuration loaded"
    );

    // Dry run - just validate and exit
    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&blueprint, mode);
        return Ok(());
    }

    let relay = Relay::new(RelayConfig {
        blueprint,
        mode,
        reconnect_delay: Duration::from_secs(args.reconnect_delay),
        metrics_port: if args.metrics_port == 0 {
            None
        } else {
            Some(args.metrics_port)
        },
    });

    // Setup graceful shutdown handler
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Received shutdown signal, stopping relay...");
        signal_cancel.cancel();
    });

    info!("Starting relay...");
    let stats = relay.run(cancel).await.context("Relay execution failed")?;

    info!(
        records = stats.sources.records_received,
        duration_secs = stats.duration.as_secs_f64(),
        rate = format!("{:.2}", stats.records_per_sec()),
        "Relay stopped"
    );
    stats.print_summary();

    info!("Mist Relay finished");
    Ok(())
}

/// Load the configuration and apply command-line overrides
fn load_blueprint(args: &RunArgs) -> crate::error::Result<RelayBlueprint> {
    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()));
    }

    let mut blueprint = config_loader::ConfigLoader::load_from_path(&args.config)?;

    if let Some(ref endpoint) = args.endpoint {
        info!(endpoint = %endpoint, "Overriding Mist endpoint from CLI");
        blueprint.mist.endpoint = endpoint.clone();
    }
    if let Some(ref api_key) = args.api_key {
        info!("Overriding Mist API key from CLI");
        blueprint.mist.api_key = api_key.clone();
    }
    if blueprint.mist.api_key.is_empty() {
        return Err(CliError::MissingApiKey);
    }

    Ok(blueprint)
}

/// Resolve on Ctrl+C, SIGTERM or SIGQUIT
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::quit())) {
            (Ok(mut term), Ok(mut quit)) => {
                tokio::select! {
                    _ = term.recv() => {},
                    _ = quit.recv() => {},
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                error!(error = %e, "Failed to install SIGTERM/SIGQUIT handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(blueprint: &RelayBlueprint, mode: RelayMode) {
    println!("\n=== Configuration Summary ===\n");
    println!("Mist:");
    println!("  Endpoint: {}", blueprint.mist.endpoint);
    println!("  Mode: {}", mode.as_str());

    let sources: Vec<_> = match mode {
        RelayMode::Stream => blueprint.stream_sources().collect(),
        RelayMode::Poll => blueprint.poll_sources().collect(),
    };
    println!("\nDatasources ({}):", sources.len());
    for ds in sources {
        let mut routes = Vec::new();
        if let Some(ref tsdb) = ds.tsdb {
            routes.push(format!("tsdb -> {}", tsdb.table));
        }
        if let Some(ref pubsub) = ds.pubsub {
            routes.push(format!("pubsub -> {}", pubsub.topic));
        }
        match mode {
            RelayMode::Stream => println!("  - {} ({}) [{}]", ds.stream, ds.layout, routes.join(", ")),
            RelayMode::Poll => println!(
                "  - {} ({}, every {}s) [{}]",
                ds.stream,
                ds.layout,
                ds.interval_secs,
                routes.join(", ")
            ),
        }
    }

    if !blueprint.sinks.is_empty() {
        println!("\nSinks ({}):", blueprint.sinks.len());
        for sink in &blueprint.sinks {
            println!(
                "  - {} ({:?}/{:?}, queue {}, {:?})",
                sink.name, sink.kind, sink.driver, sink.queue_capacity, sink.overflow
            );
        }
    }

    println!();
}
