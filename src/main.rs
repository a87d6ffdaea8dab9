use anyhow::{Context, Result, bail};
use config::PipelineConfig;
use std::env;
use std::path::Path;
use tracing::info;

mod cleaner;
mod config;
mod cube;
mod models;
mod pipeline;
mod report;
mod warehouse;

const DEFAULT_CONFIG: &str = "configs/pipeline.toml";

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().skip(1).collect();
    let config_path = args
        .iter()
        .position(|arg| arg == "--config" || arg == "-c")
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
        .unwrap_or(DEFAULT_CONFIG);
    let stage = parse_stage(&args)?;

    let config = PipelineConfig::from_file(Path::new(config_path))
        .context("Failed to load pipeline configuration")?;

    info!("Starting Smart Sales Pipeline (stage: {})", stage);
    match stage {
        "clean" => pipeline::run_clean(&config)?,
        "load" => {
            let summary = pipeline::run_load(&config)?;
            info!(
                "Loaded warehouse: {} customers, {} products, {} sales ({} orphans dropped)",
                summary.customers, summary.products, summary.sales, summary.orphans_dropped
            );
        }
        "cube" => pipeline::run_cube(&config)?,
        "report" => pipeline::run_report(&config)?,
        "all" => pipeline::run_all(&config)?,
        _ => unreachable!(),
    }
    info!("Pipeline stage '{}' completed successfully", stage);
    Ok(())
}

/// First positional argument selects the stage; default runs the whole
/// pipeline.
fn parse_stage(args: &[String]) -> Result<&str> {
    let mut skip_next = false;
    for arg in args {
        if skip_next {
            skip_next = false;
            continue;
        }
        if arg == "--config" || arg == "-c" {
            skip_next = true;
            continue;
        }
        return match arg.as_str() {
            stage @ ("clean" | "load" | "cube" | "report" | "all") => Ok(stage),
            other => bail!(
                "Unknown stage '{}' (expected clean, load, cube, report or all)",
                other
            ),
        };
    }
    Ok("all")
}
