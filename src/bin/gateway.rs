use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use telemetry_gateway::{
    alerts::{AlertEvaluator, AlertRule},
    broadcast::Broadcaster,
    bus::BusListener,
    config::{Config, read_config_file},
    forwarder::MetricForwarder,
    notify,
    pipeline::{AlertStage, IngestionPipeline},
    server::{AppState, spawn_server},
    storage::{MemoryStore, SnapshotStore},
    subscription::SubscriptionHandler,
};
use tracing::{info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{EnvFilter, filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file (JSON). Falls back to environment variables when omitted.
    #[arg(short)]
    file: Option<String>,
}

fn init() {
    let fmt = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .compact()
        .with_ansi(false);

    if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::registry()
            .with(fmt)
            .with(EnvFilter::from_default_env())
            .init();
    } else {
        let filter = filter::Targets::new().with_targets(vec![
            ("telemetry_gateway", LevelFilter::TRACE),
            ("gateway", LevelFilter::TRACE),
        ]);
        tracing_subscriber::registry().with(fmt).with(filter).init();
    }
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    match &args.file {
        Some(path) => read_config_file(path),
        None => Config::from_env().context("invalid environment configuration"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if dotenv::dotenv().is_err() {
        eprintln!("no .env file found, using process environment");
    }
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = load_config(&args)?;

    let store: Arc<dyn SnapshotStore> = Arc::new(MemoryStore::new());
    let broadcaster = Broadcaster::new(config.timeouts.push());
    let forwarder = Arc::new(
        MetricForwarder::from_urls(&config.sinks, config.timeouts.forward())
            .context("failed to build forwarding client")?,
    );
    let configured: Vec<String> = forwarder.configured_metrics().map(|m| m.to_string()).collect();
    info!("forwarding metrics: {configured:?}");

    let mut pipeline = IngestionPipeline::new(store.clone(), forwarder.clone(), broadcaster.clone())
        .with_forward_contact(config.forward_contact.clone());

    if let Some(alert) = &config.alert {
        let notifier = match &config.notifier {
            Some(notifier) => Some(
                notify::from_config(notifier, config.timeouts.notify())
                    .context("failed to build notifier")?,
            ),
            None => {
                warn!("gas alert configured without a notifier, alerts will only be logged");
                None
            }
        };

        pipeline = pipeline.with_alerts(AlertStage {
            evaluator: AlertEvaluator::new(AlertRule::try_from(alert)?),
            notifier,
            timeout: config.timeouts.notify(),
        });
    }

    let pipeline = Arc::new(pipeline);

    let subscriptions =
        SubscriptionHandler::new(store.clone(), broadcaster.clone()).with_forwarder(forwarder);
    let state = AppState::new(store, broadcaster, subscriptions);
    spawn_server(&config.server, state).await?;

    let listener = BusListener::new(&config.bus, pipeline)?;

    tokio::select! {
        _ = listener.run() => {}
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            info!("shutting down");
        }
    }

    Ok(())
}
