//! `bw-train` - offline side of Bloomwise.
//!
//! - `preprocess`: raw CSV to the processed Feature Contract CSV
//! - `train`: tune, evaluate, select and promote
//! - `versions`: list registry versions
//! - `recover`: finish interrupted promotions

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};

use bw_data::preprocess_file;
use bw_pipeline::{FamilyStatus, PipelineConfig, PipelineReport, TrainingPipeline};
use bw_registry::{FileRegistryStore, ModelRegistry};
use bw_types::init_tracing;

#[derive(Parser)]
#[command(name = "bw-train")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Bloomwise model training and promotion", long_about = None)]
struct Cli {
    /// Pipeline configuration file
    #[arg(short, long, env = "BLOOMWISE_CONFIG", default_value = "config/model_config.toml", global = true)]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Derive the engineered features from the raw dataset
    Preprocess {
        /// Raw CSV (default: data.raw from the configuration)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Processed CSV (default: data.processed from the configuration)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run the full training pipeline
    Train {
        /// Print the report as JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// List the versions of a registered model
    Versions {
        /// Registry name (default: model.registry_name)
        name: Option<String>,
    },

    /// Finish any promotion interrupted by a crash
    Recover,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(cli.json_logs, level);

    let config = PipelineConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Commands::Preprocess { input, output } => {
            let input = input
                .or_else(|| config.data.raw.clone())
                .context("no raw dataset: pass --input or set data.raw")?;
            let output = match output {
                Some(path) => path,
                None => config.processed_data()?.to_path_buf(),
            };
            let dataset = preprocess_file(&input, &output, &config.model.target_column)?;
            info!("Wrote {} rows to {}", dataset.len(), output.display());
        }
        Commands::Train { json } => {
            let pipeline = TrainingPipeline::from_config(config);
            let report = pipeline.run().context("training pipeline failed")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
        Commands::Versions { name } => {
            let name = name.unwrap_or_else(|| config.model.registry_name.clone());
            let registry = ModelRegistry::new(FileRegistryStore::new(&config.registry_root));
            let versions = registry.search_versions(&name)?;
            if versions.is_empty() {
                println!("No versions registered for {name}");
            }
            for v in versions {
                println!(
                    "{:>4}  {:<10}  {}  {}  {}",
                    v.version,
                    v.stage.to_string(),
                    v.run_id,
                    v.artifact_uri,
                    v.updated_at.to_rfc3339()
                );
            }
        }
        Commands::Recover => {
            let registry = ModelRegistry::new(FileRegistryStore::new(&config.registry_root));
            let repaired = registry.recover_all()?;
            if repaired.is_empty() {
                println!("No interrupted promotions");
            }
            for v in repaired {
                println!("Recovered {} version {}", v.name, v.version);
            }
        }
    }

    Ok(())
}

fn print_report(report: &PipelineReport) {
    println!("{:<22} {:>10} {:>10} {:>12}", "family", "validation", report.primary_metric.as_str(), "inference_s");
    for family in &report.families {
        match &family.status {
            FamilyStatus::Evaluated {
                validation_score,
                test_score,
                inference_time,
                ..
            } => println!(
                "{:<22} {:>10.4} {:>10.4} {:>12.6}",
                family.name, validation_score, test_score, inference_time
            ),
            FamilyStatus::Failed { error } => println!("{:<22} failed: {}", family.name, error),
        }
    }

    match (&report.winner, &report.promoted) {
        (Some(winner), Some(version)) => println!(
            "\nBest model: {} ({} = {:.4}), promoted as {} version {}",
            winner.name, report.primary_metric, winner.score, report.registry_name, version.version
        ),
        _ => println!(
            "\nNo model was promoted; {} Production is unchanged",
            report.registry_name
        ),
    }
}
