use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use node_drainer::{
    telemetry, BatchOrchestrator, DrainConfig, DrainReport, Error, KubeNodeLifecycle, TaskOutcome,
};
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Cordon and drain nodes in batches
    Run(RunArgs),
    /// Show version and build information
    Version,
}

#[derive(Parser, Debug, Default)]
struct RunArgs {
    /// TOML file with drain settings; flags override its values
    #[arg(long, env = "NODE_DRAINER_CONFIG")]
    config: Option<PathBuf>,

    /// Max number of nodes drained at the same time [default: 2]
    #[arg(long, env = "NODE_DRAINER_BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Max seconds for pods eviction [default: 60]
    #[arg(long, env = "NODE_DRAINER_GRACE_PERIOD_SECONDS")]
    grace_period_seconds: Option<u32>,

    /// Only drain nodes matching this label selector
    #[arg(long, env = "NODE_DRAINER_NODE_SELECTOR")]
    node_selector: Option<String>,

    /// Give up on a node's evictions after this many seconds (0 waits forever)
    #[arg(long, env = "NODE_DRAINER_EVICTION_TIMEOUT_SECONDS")]
    eviction_timeout_seconds: Option<u64>,

    /// Fail a node whose cordon and drain take longer than this
    #[arg(long, env = "NODE_DRAINER_TASK_TIMEOUT_SECONDS")]
    task_timeout_seconds: Option<u64>,

    /// Also evict pods not managed by a controller
    #[arg(long, env = "NODE_DRAINER_FORCE")]
    force: bool,

    /// List the nodes and batches without cordoning or evicting anything
    #[arg(long, env = "NODE_DRAINER_DRY_RUN")]
    dry_run: bool,

    /// Log output format
    #[arg(long, env = "NODE_DRAINER_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("node-drainer v{}", env!("CARGO_PKG_VERSION"));
            println!("Build Date: {}", env!("BUILD_DATE"));
            println!("Git SHA: {}", env!("GIT_SHA"));
            Ok(())
        }
        Commands::Run(run_args) => {
            init_tracing(run_args.log_format);
            let result = run_drain(run_args).await;
            if let Err(e) = &result {
                error!("Drain run failed: {}", e);
            }
            // Flush any remaining traces
            telemetry::shutdown_telemetry();
            result
        }
    }
}

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let (text_layer, json_layer) = match format {
        LogFormat::Text => (Some(fmt::layer().with_target(true)), None),
        LogFormat::Json => (None, Some(fmt::layer().json())),
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(text_layer)
        .with(json_layer);

    match telemetry::init_telemetry(&registry) {
        Some(otel_layer) => {
            registry.with(otel_layer).init();
            info!("OpenTelemetry tracing initialized");
        }
        None => registry.init(),
    }
}

/// Defaults, then the config file, then flags.
fn build_config(args: &RunArgs) -> Result<DrainConfig, Error> {
    let mut config = match &args.config {
        Some(path) => DrainConfig::from_file(path)?,
        None => DrainConfig::default(),
    };

    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(grace) = args.grace_period_seconds {
        config.grace_period_seconds = grace;
    }
    if let Some(selector) = &args.node_selector {
        config.node_selector = Some(selector.clone());
    }
    if let Some(timeout) = args.eviction_timeout_seconds {
        config.eviction_timeout_seconds = timeout;
    }
    if let Some(timeout) = args.task_timeout_seconds {
        config.task_timeout_seconds = Some(timeout);
    }
    config.force |= args.force;
    config.dry_run |= args.dry_run;

    config.validate()?;
    Ok(config)
}

async fn run_drain(args: RunArgs) -> Result<(), Error> {
    let config = build_config(&args)?;
    info!(
        "Starting node-drainer v{} (batch size {}, grace period {}s)",
        env!("CARGO_PKG_VERSION"),
        config.batch_size,
        config.grace_period_seconds
    );

    // Initialize Kubernetes client
    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    info!("Connected to Kubernetes cluster");

    let dry_run = config.dry_run;
    let batch_size = config.batch_size;
    let orchestrator = BatchOrchestrator::new(config, Arc::new(KubeNodeLifecycle::new(client)))?;

    if dry_run {
        let nodes = orchestrator.plan().await?;
        info!("Dry run: {} nodes would be drained", nodes.len());
        for (i, batch) in nodes.chunks(batch_size).enumerate() {
            let names: Vec<&str> = batch.iter().map(|n| n.name.as_str()).collect();
            info!("Batch {}: {}", i + 1, names.join(", "));
        }
        return Ok(());
    }

    let report = orchestrator.run().await?;
    log_report(&report);
    report.into_result()?;
    Ok(())
}

fn log_report(report: &DrainReport) {
    for outcome in &report.outcomes {
        match &outcome.outcome {
            TaskOutcome::Succeeded => info!("{}: drained", outcome.node),
            TaskOutcome::Failed(e) => error!("{}: {}", outcome.node, e),
        }
    }
    info!(
        "{} of {} nodes drained in {}s (peak {} in flight)",
        report.succeeded(),
        report.total(),
        (report.finished_at - report.started_at).num_seconds(),
        report.peak_in_flight
    );
}
