use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, Level};

use bw_data::JsonlAuditLog;
use bw_pipeline::PipelineConfig;
use bw_registry::{FileRegistryStore, FileTracker, ModelRegistry};
use bw_serve::{serve, PredictionService};
use bw_types::init_tracing;

#[derive(Parser)]
#[command(name = "bw-serve")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Bloomwise prediction API", long_about = None)]
struct Args {
    /// Pipeline configuration file (registry name and storage roots)
    #[arg(short, long, env = "BLOOMWISE_CONFIG", default_value = "config/model_config.toml")]
    config: PathBuf,

    /// Listen address
    #[arg(long, env = "BLOOMWISE_SERVE_ADDR", default_value = "0.0.0.0:8000")]
    addr: String,

    /// Append-only prediction audit log
    #[arg(long, env = "BLOOMWISE_AUDIT_LOG", default_value = "logs/predictions.jsonl")]
    audit_log: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs, Level::INFO);

    let config = PipelineConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let registry = Arc::new(ModelRegistry::new(FileRegistryStore::new(&config.registry_root)));
    let tracker = Arc::new(FileTracker::new(&config.experiment.tracking_root));
    let audit = Arc::new(JsonlAuditLog::open(&args.audit_log)?);

    let service = PredictionService::start(registry, tracker, &config.model.registry_name, audit)
        .with_context(|| format!("no servable Production model for {}", config.model.registry_name))?;

    let listener = TcpListener::bind(&args.addr).await?;
    info!("Bloomwise prediction service listening on {}", args.addr);
    serve(listener, Arc::new(service)).await?;
    Ok(())
}
