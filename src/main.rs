//! Command-line entry point for the offramp gateway
//!
//! ```bash
//! RUST_LOG=info offramp \
//!   --roads-file roads.yaml \
//!   --brokers kafka:9092 \
//!   --idle-timeout 10m
//! ```

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use offramp::config::LogBackend;
use offramp::metrics::MetricsCollector;
use offramp::tasks::{supervise, supervise_unit};
use offramp::{server, Config, SessionManager};
use road_consumer::testing::MemoryLog;
use road_consumer::ConsumerFactory;
use road_consumer_kafka::KafkaConsumerFactory;
use road_registry::{FileRoadRegistry, RoadRegistry};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::parse();

    let registry = Arc::new(
        FileRoadRegistry::load(&config.roads_file).with_context(|| {
            format!("Failed to load road registry from {:?}", config.roads_file)
        })?,
    );
    let refresh = registry.clone().spawn_refresh(config.registry_refresh);
    supervise_unit("Registry refresh", refresh);

    let consumers: Arc<dyn ConsumerFactory> = match config.log {
        LogBackend::Kafka => {
            let kafka = config.kafka.consumer_config(config.poll_interval);
            info!(brokers = %kafka.brokers, "Using Kafka log");
            Arc::new(KafkaConsumerFactory::new(kafka).context("Invalid Kafka configuration")?)
        }
        LogBackend::Memory => {
            let log = MemoryLog::new().with_poll_interval(config.poll_interval);
            let snapshot = registry.snapshot();
            for road in snapshot.names() {
                log.create_road(road, config.memory_partitions);
            }
            warn!(
                roads = snapshot.len(),
                "Using in-memory log; roads added to the registry later have no partitions"
            );
            Arc::new(log)
        }
    };

    let metrics = Arc::new(MetricsCollector::new());
    if let Some(path) = config.emit_metrics.clone() {
        info!("Emitting metrics to {path:?} every {:?}", config.metrics_interval);
        supervise(
            "Metrics emission",
            metrics.start_emission_task(path, config.metrics_interval),
        );
    }

    let manager = SessionManager::new(
        registry,
        consumers,
        metrics,
        config.session_settings(),
    );
    let reaper = manager.spawn_idle_reaper(config.reaper_interval);
    supervise_unit("Idle reaper", reaper);
    let watch = manager.spawn_registry_watch();
    supervise_unit("Registry watch", watch);

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    info!("Listening on {}", config.bind);

    server::serve(listener, manager, shutdown_signal()).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
