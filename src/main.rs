//! Tapstudy Analytics CLI
//!
//! Generates trial-timing exports for tapping experiments.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tapstudy_analytics::{
    audit::create_shared_log_with_persistence,
    batch::{ArtifactStatus, BatchDriver, BatchOptions, BatchReport, ExperimentStatus},
    config::Config,
    core::{build_export, ExportKind, ExportOptions},
    dataset::{DatasetSource, JsonDirSource},
    export::{ArtifactStore, FsStore},
    VERSION,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tapstudy")]
#[command(author = "Tapstudy")]
#[command(version = VERSION)]
#[command(about = "Trial-timing exports for tapping experiments", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one export pass over every published experiment
    Run {
        /// Directory of experiment snapshots (overrides config)
        #[arg(long)]
        data: Option<PathBuf>,

        /// Artifact store directory (overrides config)
        #[arg(long)]
        artifacts: Option<PathBuf>,
    },

    /// Keep running export passes until interrupted
    Watch {
        /// Seconds between passes (overrides config)
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Build a single export and write it to a file or stdout
    Export {
        /// Experiment code
        #[arg(long)]
        code: String,

        /// Export kind (raw, processed or cohen)
        #[arg(long, default_value = "processed")]
        kind: String,

        /// Output file (stdout if omitted)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Show cumulative export statistics
    Status,

    /// Show configuration
    Config,

    /// Serve generated artifacts over HTTP (requires server feature)
    Serve {
        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("loading configuration")?;

    match cli.command {
        Commands::Run { data, artifacts } => cmd_run(config, data, artifacts).await,
        Commands::Watch { interval } => cmd_watch(config, interval).await,
        Commands::Export { code, kind, output } => cmd_export(&config, &code, &kind, output),
        Commands::Status => cmd_status(&config),
        Commands::Config => cmd_config(&config),
        Commands::Serve { port } => cmd_serve(config, port).await,
    }
}

fn build_driver(config: &Config) -> anyhow::Result<BatchDriver> {
    config.ensure_directories()?;

    let source: Arc<dyn DatasetSource> = Arc::new(JsonDirSource::new(&config.data_path));
    let store: Arc<dyn ArtifactStore> = Arc::new(FsStore::new(&config.artifact_path));
    let options = BatchOptions::from_config(config)?;
    let audit = create_shared_log_with_persistence(config.audit_path.clone());

    Ok(BatchDriver::new(source, store, options).with_audit(audit))
}

async fn cmd_run(
    mut config: Config,
    data: Option<PathBuf>,
    artifacts: Option<PathBuf>,
) -> anyhow::Result<()> {
    if let Some(data) = data {
        config.data_path = data;
    }
    if let Some(artifacts) = artifacts {
        config.artifact_path = artifacts;
    }

    println!("Tapstudy Analytics v{VERSION}");
    println!("  Data: {:?}", config.data_path);
    println!("  Artifacts: {:?}", config.artifact_path);
    println!();

    let driver = build_driver(&config)?;
    let report = driver.run().await?;
    print_report(&report);

    if let Err(e) = driver.audit().save() {
        eprintln!("Warning: Could not save audit log: {e}");
    }

    println!();
    println!("{}", driver.audit().summary());
    Ok(())
}

async fn cmd_watch(config: Config, interval: Option<u64>) -> anyhow::Result<()> {
    let interval = interval
        .map(Duration::from_secs)
        .unwrap_or(config.watch_interval);
    let driver = build_driver(&config)?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("setting Ctrl+C handler")?;

    println!("Watching {:?} every {}s", config.data_path, interval.as_secs());
    println!("Press Ctrl+C to stop");
    println!();

    while running.load(Ordering::SeqCst) {
        match driver.run().await {
            Ok(report) => print_report(&report),
            Err(e) => eprintln!("Batch failed: {e}"),
        }
        if let Err(e) = driver.audit().save() {
            eprintln!("Warning: Could not save audit log: {e}");
        }

        let pass_end = Instant::now();
        while running.load(Ordering::SeqCst) && pass_end.elapsed() < interval {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    println!();
    println!("Stopping...");
    println!("{}", driver.audit().summary());
    Ok(())
}

fn cmd_export(
    config: &Config,
    code: &str,
    kind: &str,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let kind: ExportKind = kind.parse().map_err(anyhow::Error::msg)?;
    let source = JsonDirSource::new(&config.data_path);

    let Some(dataset) = source.load(code)? else {
        bail!("experiment {code} not found in {:?}", config.data_path);
    };

    let options = ExportOptions {
        timezone: config.timezone()?,
    };
    let table = build_export(&dataset, kind, &options)?;
    let bytes = table.to_csv()?;

    match output {
        Some(path) => {
            std::fs::write(&path, &bytes).with_context(|| format!("writing {path:?}"))?;
            eprintln!("Exported {} {} rows to {path:?}", table.len(), kind);
        }
        None => {
            use std::io::Write;
            std::io::stdout().write_all(&bytes)?;
        }
    }
    Ok(())
}

fn cmd_status(config: &Config) -> anyhow::Result<()> {
    println!("Tapstudy Analytics Status");
    println!("=========================");
    println!();
    println!("Data directory: {:?}", config.data_path);
    println!("Artifact directory: {:?}", config.artifact_path);
    println!();

    if !config.audit_path.exists() {
        println!("No previous export runs found.");
        return Ok(());
    }

    let audit = create_shared_log_with_persistence(config.audit_path.clone());
    let stats = audit.stats();
    println!("Cumulative Statistics:");
    println!("  Experiments processed: {}", stats.experiments_processed);
    println!("  Artifacts written: {}", stats.artifacts_written);
    println!("  Cache hits: {}", stats.cache_hits);
    println!("  Not found: {}", stats.not_found);
    println!("  Failures: {}", stats.failures);
    println!("  Timeouts: {}", stats.timeouts);
    Ok(())
}

fn cmd_config(config: &Config) -> anyhow::Result<()> {
    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

#[cfg(feature = "server")]
async fn cmd_serve(config: Config, port: Option<u16>) -> anyhow::Result<()> {
    use tapstudy_analytics::server::{self, ServerConfig};

    let store: Arc<dyn ArtifactStore> = Arc::new(FsStore::new(&config.artifact_path));
    let server_config = ServerConfig::new(port.unwrap_or(config.server_port), store);
    let (addr, shutdown) = server::run(server_config).await?;

    println!("Serving artifacts from {:?}", config.artifact_path);
    println!("Listening on http://{addr}");
    println!("Press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    let _ = shutdown.send(());
    Ok(())
}

#[cfg(not(feature = "server"))]
async fn cmd_serve(_config: Config, _port: Option<u16>) -> anyhow::Result<()> {
    bail!("serve requires the server feature (rebuild with --features server)")
}

fn print_report(report: &BatchReport) {
    println!(
        "[{}] Run {}: {} written, {} cached, {} failed",
        report.finished_at.format("%H:%M:%S"),
        report.run_id,
        report.written_count(),
        report.cached_count(),
        report.failed_count()
    );

    for outcome in &report.outcomes {
        match &outcome.status {
            ExperimentStatus::Completed {
                response_count,
                artifacts,
            } => {
                let parts: Vec<String> = artifacts
                    .iter()
                    .map(|(kind, status)| match status {
                        ArtifactStatus::Cached => format!("{kind}: cached"),
                        ArtifactStatus::Written { rows, .. } => format!("{kind}: {rows} rows"),
                    })
                    .collect();
                println!(
                    "  {} ({} responses) {}",
                    outcome.code,
                    response_count,
                    parts.join(", ")
                );
            }
            ExperimentStatus::Unpublished => println!("  {} unpublished", outcome.code),
            ExperimentStatus::NotFound => println!("  {} not found", outcome.code),
            ExperimentStatus::Failed(e) => println!("  {} failed: {e}", outcome.code),
            ExperimentStatus::TimedOut => println!("  {} timed out", outcome.code),
        }
    }
}
