//! Trace Collector
//!
//! Run with: cargo run
//!
//! Configuration is read from the environment, see [`trace_collector::config`].
//! RUST_LOG overrides the log filter derived from COLLECTOR_VERBOSITY.

use std::sync::Arc;

use trace_collector::api::{run_server, AppState};
use trace_collector::stats::{MetricLabels, MetricsExporter};
use trace_collector::supervisor::TaskResult;
use trace_collector::{
    CollectorConfig, FpmStatusClient, HungReaper, ListenerBank, Pipeline, Supervisor, TraceStore,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = CollectorConfig::from_env()?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.default_log_filter().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Trace collector {}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "  UDP ports: {}-{} ({} queues of {} packets)",
        config.udp_port_start,
        config.udp_port_end,
        config.udp_port_count(),
        config.queue_capacity
    );
    tracing::info!("  Receive buffer: {} bytes", config.buffer_size);
    tracing::info!("  Status page: {} every {:?}", config.status_url, config.status_interval);
    tracing::info!("  Stale after: {:?}", config.stale_after);
    tracing::info!("  HTTP address: {}", config.http_addr);
    tracing::info!(
        "  Metric labels: node={} app={} env={}",
        config.node,
        config.app_name,
        config.env
    );

    let store = Arc::new(TraceStore::new());
    let pipeline = Pipeline::new(Arc::clone(&store));
    let mut supervisor = Supervisor::new();

    {
        let config = config.clone();
        let pipeline = pipeline.clone();
        supervisor.spawn("udp-listener", move |shutdown| {
            let config = config.clone();
            let pipeline = pipeline.clone();
            async move {
                let bank = ListenerBank::bind(&config, pipeline).await?;
                bank.run(shutdown).await?;
                TaskResult::Ok(())
            }
        });
    }

    let status_client = FpmStatusClient::new(config.status_url.clone(), config.status_timeout)?;
    let reaper = Arc::new(HungReaper::new(
        Arc::clone(&store),
        status_client,
        config.status_interval,
        config.stale_after,
    ));
    supervisor.spawn("hung-reaper", move |shutdown| Arc::clone(&reaper).run(shutdown));

    let metrics = MetricsExporter::new(
        Arc::clone(store.counters()),
        Arc::clone(pipeline.counters()),
        MetricLabels {
            node: config.node.clone(),
            app: config.app_name.clone(),
            env: config.env.clone(),
        },
    )?;
    let state = Arc::new(AppState {
        pipeline: pipeline.clone(),
        metrics,
        app_name: config.app_name.clone(),
        env: config.env.clone(),
    });
    let http_addr = config.http_addr.clone();
    supervisor.spawn("http-server", move |shutdown| {
        let state = Arc::clone(&state);
        let http_addr = http_addr.clone();
        async move { run_server(&http_addr, state, shutdown).await }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, stopping tasks...");

    supervisor.shutdown().await;

    let stats = pipeline.stats();
    tracing::info!(
        "Trace collector stopped: {} packets captured, {} parsed, {} active traces",
        stats.packages_caught,
        stats.packages_parse,
        stats.count_active_pid
    );
    Ok(())
}
