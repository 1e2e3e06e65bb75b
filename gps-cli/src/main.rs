#![warn(clippy::all)]
#![allow(clippy::pedantic)]

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};

use gps_common::config::Config;
use gps_common::logging::init_logging;
use gps_research::{load_entities, load_prompts, select_entities, Entity, Pipeline, RunMode};

/// `gps` - GPUs per weighted CS student, researched by an LLM ensemble.
#[derive(Parser, Debug)]
#[command(name = "gps")]
#[command(version)]
#[command(about = "Estimate dedicated GPU resources per weighted CS student.", long_about = None)]
struct Cli {
    /// Config file (default: ~/.gps/config.json)
    #[arg(long, global = true, env = "GPS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Research every university (or one) and write the report
    Run {
        /// Only research this university
        #[arg(short, long)]
        university: Option<String>,

        /// openai, claude, gemini or ensemble
        #[arg(short, long, default_value = "ensemble")]
        provider: RunMode,
    },

    /// Re-run the shared-resource audit over every aggregate record
    Validate,

    /// Rebuild the report from cached records
    Report {
        /// Read this provider's cache instead of the validated records
        #[arg(short, long, default_value = "ensemble")]
        provider: RunMode,
    },
}

/// Entity list, or an empty list when the file is missing and `required` is false.
fn entities(config: &Config, required: bool) -> Result<Vec<Entity>> {
    let path = config.paths.universities_path();
    match load_entities(&path) {
        Ok(entities) => Ok(entities),
        Err(e) if !required && e.is_not_found() => {
            warn!(path = %path.display(), "Entity list not found, report will have no URLs");
            Ok(Vec::new())
        }
        Err(e) => Err(e).with_context(|| format!("loading {}", path.display())),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load_with_env(cli.config.as_deref())?;
    if let Err(e) = config.validate() {
        bail!("invalid configuration: {e}");
    }
    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );
    info!(version = env!("CARGO_PKG_VERSION"), "gps starting");

    let prompts = load_prompts(&config.paths)?;
    let pipeline = Pipeline::from_config(config.clone(), prompts)?;

    match cli.command {
        Commands::Run {
            university,
            provider,
        } => {
            let all = entities(&config, university.is_none())?;
            let selected = select_entities(&all, university.as_deref());
            let summary = pipeline.run(&selected, provider).await?;
            println!("{summary}");
            if !summary.failed.is_empty() {
                println!("Failed: {}", summary.failed.join(", "));
            }
        }
        Commands::Validate => {
            let summary = pipeline.validate_all().await?;
            println!("{summary}");
        }
        Commands::Report { provider } => {
            let all = entities(&config, false)?;
            let rows = pipeline.write_report(&all, provider)?;
            gps_research::report::log_leaderboard(&rows);
            println!(
                "Wrote {} rows to {}",
                rows.len(),
                config.paths.report_path().display()
            );
        }
    }

    Ok(())
}
