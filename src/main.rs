use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use mention_pipeline::catalog::EntityCatalog;
use mention_pipeline::catalog::loader::{self, DEFAULT_BATCH_SIZE};
use mention_pipeline::config::PipelineConfig;
use mention_pipeline::pipeline::cycle::{self, ConsumerCycle, ProducerCycle};
use mention_pipeline::pipeline::fact_writer::FactWriter;
use mention_pipeline::pipeline::publisher::Publisher;
use mention_pipeline::sentiment::LexiconScorer;
use mention_pipeline::source::PushshiftSource;
use mention_pipeline::store::{Database, LibSqlBackend};
use mention_pipeline::transport::MemoryTransport;

#[derive(Parser)]
#[command(name = "mention-pipeline")]
#[command(about = "Entity-mention sentiment ingestion pipeline")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one producer cycle, consume what it published, print a JSON report
    Produce,

    /// Run producer cycles on an interval with a long-running consumer
    Run,

    /// Load the entity catalog from a CSV file
    LoadEntities {
        /// CSV with an `EntityName,SubReddit` header
        csv: PathBuf,

        /// Rows per insert transaction
        #[arg(default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,
    },
}

/// Stderr logging, plus a daily rolling file when a log directory is set.
fn init_tracing(config: &PipelineConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "mention-pipeline.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = PipelineConfig::from_env().context("invalid configuration")?;
    let _log_guard = init_tracing(&config);

    eprintln!("📈 Mention Pipeline v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path.display());

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("failed to open database at {}", config.db_path.display()))?,
    );

    match cli.command.unwrap_or(Commands::Produce) {
        Commands::Produce => produce(&config, db).await,
        Commands::Run => run(&config, db).await,
        Commands::LoadEntities { csv, batch_size } => {
            let loaded = loader::load_entities_csv(db.as_ref(), &csv, batch_size).await?;
            eprintln!("   Loaded {} entities from {}", loaded, csv.display());
            Ok(())
        }
    }
}

fn build_producer(
    config: &PipelineConfig,
    db: &Arc<dyn Database>,
    transport: MemoryTransport,
) -> ProducerCycle {
    let source = PushshiftSource::new(config.source_url.clone());
    eprintln!("   Source: {}", config.source_url);
    eprintln!("   Fetch size: {}", config.fetch_size);
    ProducerCycle::new(
        EntityCatalog::new(Arc::clone(db)),
        Arc::new(source),
        Publisher::new(Arc::new(transport), config.publish_timeout),
        config.fetch_size,
    )
}

fn build_consumer(db: &Arc<dyn Database>) -> ConsumerCycle {
    ConsumerCycle::new(FactWriter::new(Arc::clone(db), Arc::new(LexiconScorer::default())))
}

/// One producer cycle, then consume everything it published.
async fn produce(config: &PipelineConfig, db: Arc<dyn Database>) -> anyhow::Result<()> {
    let (transport, mut subscription) = MemoryTransport::channel(config.max_delivery_attempts);
    let producer = build_producer(config, &db, transport);
    let consumer = build_consumer(&db);

    let report = producer.run().await?;
    let consumed = cycle::drain_pending(&consumer, &mut subscription).await;

    let summary = serde_json::json!({
        "cycle": report,
        "consumed": consumed,
        "total_facts": db.count_facts().await?,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Producer cycles on an interval with a long-running consumer, until Ctrl-C.
async fn run(config: &PipelineConfig, db: Arc<dyn Database>) -> anyhow::Result<()> {
    let (transport, mut subscription) = MemoryTransport::channel(config.max_delivery_attempts);
    let producer = build_producer(config, &db, transport);
    let consumer = build_consumer(&db);

    eprintln!("   Interval: {}s", config.cycle_interval.as_secs());
    eprintln!("   Press Ctrl-C to stop.\n");

    let consumer_handle =
        tokio::spawn(async move { cycle::run_consumer(&consumer, &mut subscription).await });

    let mut ticker = tokio::time::interval(config.cycle_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match producer.run().await {
                    Ok(report) => tracing::info!(
                        channel = report.channel.as_deref().unwrap_or_default(),
                        requested = report.requested,
                        acknowledged = report.acknowledged,
                        "Cycle finished"
                    ),
                    Err(e) => tracing::warn!(error = %e, "Cycle failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown requested");
                break;
            }
        }
    }

    // Dropping the producer closes the transport; the consumer drains and exits.
    drop(producer);
    let stats = consumer_handle.await.context("consumer task panicked")?;
    eprintln!(
        "   Consumed: {} committed, {} duplicates, {} malformed, {} rejected",
        stats.committed, stats.already_applied, stats.malformed, stats.rejected
    );
    Ok(())
}
