use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use enviro_notify::{
    MetricType, ReadingId,
    actors::{evaluation::EvaluationHandle, poller::PollerHandle},
    config::{Config, StorageConfig, read_config_file},
    dispatcher::{DeliveryReport, DispatchConfig},
    evaluator::{EvaluationSummary, Evaluator},
    push::ExpoGateway,
    storage::{
        MemoryBackend, ReadingStore, RecipientDirectory, SubscriptionStore, validate_bands,
    },
    util::get_default_config_path,
};
use tokio::sync::mpsc;
use tracing::{debug, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short, default_value_t = get_default_config_path())]
    file: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Evaluate one stored reading and print what was sent
    Evaluate {
        #[arg(long)]
        reading: ReadingId,
    },

    /// Poll for new readings and evaluate each one until interrupted
    Watch {
        /// Start after this reading id (default: the newest stored reading)
        #[arg(long)]
        after: Option<ReadingId>,
    },

    /// List the global bands and check them for overlaps and gaps
    Bands,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("enviro_notify", LevelFilter::DEBUG),
        ("notifier", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

struct Stores {
    readings: Arc<dyn ReadingStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
    directory: Arc<dyn RecipientDirectory>,
}

async fn open_stores(config: &Config) -> anyhow::Result<Stores> {
    match config.storage.clone().unwrap_or_default() {
        StorageConfig::None => {
            warn!("using in-memory storage, there are no readings or subscriptions to evaluate");
            let backend = Arc::new(MemoryBackend::new());
            Ok(Stores {
                readings: backend.clone(),
                subscriptions: backend.clone(),
                directory: backend,
            })
        }
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path } => {
            let backend = Arc::new(
                enviro_notify::storage::sqlite::SqliteBackend::new(&path)
                    .await
                    .with_context(|| format!("failed to open {}", path.display()))?,
            );
            Ok(Stores {
                readings: backend.clone(),
                subscriptions: backend.clone(),
                directory: backend,
            })
        }
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => {
            anyhow::bail!("sqlite storage requested but the storage-sqlite feature is disabled")
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)
        .with_context(|| format!("failed to load config from {}", args.file))?;

    let stores = open_stores(&config).await?;

    let gateway = Arc::new(ExpoGateway::new(
        config.gateway.url.clone(),
        config.gateway.resolve_access_token(),
    ));
    if config.gateway.resolve_access_token().is_none() {
        debug!("no push access token configured");
    }

    let evaluator = Arc::new(Evaluator::new(
        stores.subscriptions.clone(),
        stores.directory.clone(),
        gateway,
        DispatchConfig::new(&config.gateway, &config.evaluation),
    ));

    match args.command {
        Command::Evaluate { reading } => evaluate_once(&stores, &evaluator, reading).await,
        Command::Watch { after } => watch(&config, &stores, evaluator, after).await,
        Command::Bands => check_bands(&stores).await,
    }
}

async fn evaluate_once(
    stores: &Stores,
    evaluator: &Evaluator,
    reading_id: ReadingId,
) -> anyhow::Result<()> {
    let reading = stores
        .readings
        .get_reading(reading_id)
        .await?
        .with_context(|| format!("reading {reading_id} not found"))?;
    let sensor = stores
        .readings
        .get_sensor(reading.sensor_id)
        .await?
        .with_context(|| format!("sensor {} not found", reading.sensor_id))?;

    let summary = evaluator.evaluate(&reading, &sensor).await;
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &EvaluationSummary) {
    println!(
        "reading {} (sensor {})",
        summary.reading_id, summary.sensor_id
    );
    if summary.metrics.is_empty() {
        println!("  no monitored values");
    }
    for metric in &summary.metrics {
        println!(
            "  {} {} ({})",
            metric.metric,
            metric.metric.format_value(metric.value),
            metric.classification.level
        );
        match &metric.outcome {
            Ok(dispatch) => {
                println!(
                    "    personal: {} match(es), {}",
                    dispatch.personal_matches,
                    describe(&dispatch.personal)
                );
                match (&dispatch.band, &dispatch.fan_out) {
                    (Some(band), Some(report)) => {
                        println!("    global '{}': {}", band.level, describe(report))
                    }
                    (Some(band), None) => {
                        println!("    global '{}': below escalation cutoff", band.level)
                    }
                    (None, _) => println!("    global: no band"),
                }
            }
            Err(e) => println!("    aborted: {e}"),
        }
    }
}

fn describe(report: &DeliveryReport) -> String {
    let mut text = format!(
        "{} delivered, {} failed, {} dropped in {} batch(es)",
        report.delivered, report.failed, report.dropped, report.batches_submitted
    );
    if report.truncated {
        text.push_str(" (recipient list incomplete)");
    }
    text
}

async fn check_bands(stores: &Stores) -> anyhow::Result<()> {
    let mut misconfigured = false;

    for metric in MetricType::ALL {
        let bands = stores.subscriptions.list_global_bands(metric).await?;
        println!("{metric}: {} band(s)", bands.len());
        for band in &bands {
            let max = band
                .max_value
                .map(|max| metric.format_value(max))
                .unwrap_or_else(|| "∞".to_string());
            println!(
                "  {:<32} {} - {}",
                band.level,
                metric.format_value(band.min_value),
                max
            );
        }

        if bands.is_empty() {
            continue;
        }
        if let Err(issues) = validate_bands(&bands) {
            misconfigured = true;
            for issue in issues {
                println!("  ! {issue:?}");
            }
        }
    }

    if misconfigured {
        anyhow::bail!("global bands are misconfigured");
    }
    Ok(())
}

async fn watch(
    config: &Config,
    stores: &Stores,
    evaluator: Arc<Evaluator>,
    after: Option<ReadingId>,
) -> anyhow::Result<()> {
    let start_after = match after {
        Some(after) => after,
        None => stores.readings.latest_reading_id().await?.unwrap_or(0),
    };
    info!("watching for readings after {start_after}");

    let (reading_tx, reading_rx) = mpsc::channel(256);
    let (evaluation, evaluation_task) = EvaluationHandle::spawn(evaluator, reading_rx);
    let poller = PollerHandle::spawn(
        stores.readings.clone(),
        &config.poll,
        start_after,
        reading_tx,
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutting down");

    poller.shutdown().await?;
    evaluation.shutdown().await?;
    let stats = evaluation_task.await?;

    info!(
        "evaluated {} of {} reading(s): {} delivered, {} failed, {} dropped",
        stats.evaluations_completed,
        stats.readings_received,
        stats.messages_delivered,
        stats.messages_failed,
        stats.messages_dropped
    );
    Ok(())
}
