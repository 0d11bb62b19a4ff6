mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use equipment_telemetry::config::Config;
use equipment_telemetry::generator::ReadingGenerator;
use equipment_telemetry::ingest::IngestionLoop;
use equipment_telemetry::refresh::{RefreshScheduler, RefreshSettings, SnapshotSink};
use equipment_telemetry::render::{JsonLinesSink, LogSink};
use equipment_telemetry::store::{PgConnector, ReadingStore, StoreConnector};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::cli::{Cli, Commands, RenderArgs};

const SERVICE_NAME: &str = "equipment-telemetry";

fn init_tracing(config: &Config) -> Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,equipment_telemetry=info"));
    let otel = match config.otlp_endpoint.as_deref() {
        Some(endpoint) => Some(tracing_opentelemetry::layer().with_tracer(otlp_tracer(endpoint)?)),
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .with(otel)
        .try_init()?;
    Ok(())
}

fn otlp_tracer(endpoint: &str) -> Result<opentelemetry_sdk::trace::Tracer> {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{runtime::Tokio, trace, Resource};

    let exporter = opentelemetry_otlp::new_exporter()
        .http()
        .with_endpoint(traces_endpoint(endpoint));
    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(
            trace::Config::default()
                .with_resource(Resource::new([KeyValue::new("service.name", SERVICE_NAME)])),
        )
        .install_batch(Tokio)?;
    Ok(tracer)
}

/// OTLP/HTTP collectors take traces on `/v1/traces`; a bare base URL gets it appended.
fn traces_endpoint(endpoint: &str) -> String {
    match endpoint.trim().trim_end_matches('/') {
        "" => String::new(),
        base if base.ends_with("/v1/traces") => base.to_string(),
        base => format!("{base}/v1/traces"),
    }
}

// Setup-file warnings fire before `init_tracing`; give them a plain stderr sink.
fn load_config() -> Result<Config> {
    let bootstrap = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::with_default(bootstrap, Config::from_env).context("invalid configuration")
}

fn ingestion_loop(config: &Config, connector: PgConnector) -> Result<IngestionLoop<PgConnector>> {
    let generator = ReadingGenerator::new(config.equipment.clone(), config.ranges)?;
    let mut ingest = IngestionLoop::new(connector, generator, config.ingest_interval());
    if let Some(seed) = config.rng_seed {
        ingest = ingest.with_rng(StdRng::seed_from_u64(seed));
    }
    Ok(ingest)
}

fn refresh_scheduler(config: &Config, connector: PgConnector) -> RefreshScheduler<PgConnector> {
    RefreshScheduler::new(
        connector,
        RefreshSettings {
            interval: config.refresh_interval(),
            window_size: config.window_size,
            thresholds: config.thresholds,
        },
    )
}

fn spawn_dashboard(
    actors: &mut JoinSet<()>,
    scheduler: RefreshScheduler<PgConnector>,
    args: &RenderArgs,
    cancel: CancellationToken,
) {
    async fn run<K: SnapshotSink + 'static>(
        scheduler: RefreshScheduler<PgConnector>,
        sink: K,
        cancel: CancellationToken,
    ) {
        if let Err(err) = scheduler.run(sink, cancel).await {
            tracing::error!(error=%err, "refresh scheduler exited");
        }
    }

    if args.json {
        actors.spawn(run(scheduler, JsonLinesSink::new(std::io::stdout()), cancel));
    } else {
        actors.spawn(run(scheduler, LogSink, cancel));
    }
}

/// Runs the selected actors until Ctrl-C or until every actor has exited.
/// The actors are separate tasks: one failing leaves the others running.
async fn serve(
    config: &Config,
    connector: PgConnector,
    ingest: bool,
    dashboard: Option<&RenderArgs>,
) -> Result<()> {
    let cancel = CancellationToken::new();
    let mut actors = JoinSet::new();

    if ingest {
        let ingest_loop = ingestion_loop(config, connector.clone())?;
        let cancel = cancel.clone();
        actors.spawn(async move {
            if let Err(err) = ingest_loop.run(cancel).await {
                tracing::error!(error=%err, "ingest loop exited");
            }
        });
    }
    if let Some(args) = dashboard {
        spawn_dashboard(
            &mut actors,
            refresh_scheduler(config, connector),
            args,
            cancel.clone(),
        );
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
        _ = async { while actors.join_next().await.is_some() {} } => {
            tracing::warn!("all actors exited");
        }
    }

    cancel.cancel();
    while let Some(joined) = actors.join_next().await {
        if let Err(err) = joined {
            tracing::error!(error=%err, "actor task failed");
        }
    }
    Ok(())
}

async fn init_schema(connector: PgConnector) -> Result<()> {
    let store = connector
        .connect()
        .await
        .context("failed to open a store session")?;
    let created = store.ensure_schema().await;
    store.close().await;
    created.context("failed to create the readings table")?;
    tracing::info!("readings table ready");
    Ok(())
}

async fn snapshot(config: &Config, connector: PgConnector, args: &RenderArgs) -> Result<()> {
    let view = refresh_scheduler(config, connector)
        .refresh_once()
        .await
        .context("failed to open a store session")?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        LogSink.render(&view);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config()?;
    init_tracing(&config)?;

    let connector = PgConnector::new(
        config.database.connect_options()?,
        config.connect_timeout(),
        config.operation_timeout(),
    );

    match cli.command {
        Commands::Ingest => serve(&config, connector, true, None).await,
        Commands::Dashboard(args) => serve(&config, connector, false, Some(&args)).await,
        Commands::Run(args) => serve(&config, connector, true, Some(&args)).await,
        Commands::InitSchema => init_schema(connector).await,
        Commands::Snapshot(args) => snapshot(&config, connector, &args).await,
    }
}
