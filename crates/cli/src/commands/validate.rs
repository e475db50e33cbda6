//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::{RelayBlueprint, SinkKind};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    endpoint: String,
    stream_sources: usize,
    poll_sources: usize,
    sink_count: usize,
    tsdb_routes: usize,
    pubsub_routes: usize,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    // Check file exists
    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    // Try to load and validate
    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(blueprint) => {
            let warnings = collect_warnings(&blueprint);

            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ConfigSummary {
                    version: format!("{:?}", blueprint.version),
                    endpoint: blueprint.mist.endpoint.clone(),
                    stream_sources: blueprint.stream_sources().count(),
                    poll_sources: blueprint.poll_sources().count(),
                    sink_count: blueprint.sinks.len(),
                    tsdb_routes: blueprint.routes_for(SinkKind::Tsdb).len(),
                    pubsub_routes: blueprint.routes_for(SinkKind::Pubsub).len(),
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(blueprint: &RelayBlueprint) -> Vec<String> {
    let mut warnings = Vec::new();

    if blueprint.mist.api_key.is_empty() {
        warnings.push("mist.api_key is empty - pass --api-key or set MIST_API_KEY".to_string());
    }

    // Check for empty sinks
    if blueprint.sinks.is_empty() {
        warnings.push("No sinks configured - records will be dropped".to_string());
    }

    let has_kind = |kind: SinkKind| blueprint.sinks.iter().any(|s| s.kind == kind);
    for ds in &blueprint.datasources {
        if ds.tsdb.is_none() && ds.pubsub.is_none() {
            warnings.push(format!("Datasource '{}' has no routes", ds.stream));
        }
        if ds.tsdb.is_some() && !has_kind(SinkKind::Tsdb) {
            warnings.push(format!(
                "Datasource '{}' has a tsdb route but no tsdb sink is configured",
                ds.stream
            ));
        }
        if ds.pubsub.is_some() && !has_kind(SinkKind::Pubsub) {
            warnings.push(format!(
                "Datasource '{}' has a pubsub route but no pubsub sink is configured",
                ds.stream
            ));
        }
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Endpoint: {}", summary.endpoint);
            println!("  Stream sources: {}", summary.stream_sources);
            println!("  Poll sources: {}", summary.poll_sources);
            println!("  Sinks: {}", summary.sink_count);
            println!(
                "  Routes: {} tsdb, {} pubsub",
                summary.tsdb_routes, summary.pubsub_routes
            );
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
