use std::sync::Arc;

use beacon_indexer_core::env::read_env;
use beacon_indexer_core::pipeline::creator::run_creator;
use beacon_indexer_core::pipeline::orchestrator::run_orchestrator;
use beacon_indexer_core::pipeline::tracker::run_tracker;
use beacon_indexer_core::prometheus_metrics::Registar;
use beacon_indexer_core::runtime::{EnvVars, IndexerRuntime};
use beacon_indexer_core::tracing as tracing_config;
use beacon_indexer_shared::chain::ChainInfo;
use prometheus::Registry;
use tokio::sync::watch;
use tracing::Instrument;

mod server;

pub async fn service_main() {
    dotenvy::dotenv().ok();

    // logging setup
    tracing_config::setup_logger(
        tracing_config::LoggingConfig::default()
            .with_thread_names(true)
            .use_format(read_env("LOG_FORMAT", tracing_config::LogFormat::Plain)),
    );

    let env_vars = EnvVars::init_from_env_or_crash();

    // Prometheus setup
    let registry = Registry::new();

    let runtime = IndexerRuntime::init(&env_vars)
        .await
        .unwrap_or_else(|e| panic!("Failed to initialize indexer runtime {e:?}"));
    runtime
        .metrics
        .register_on(&registry)
        .unwrap_or_else(|e| panic!("Failed to register metrics {e:?}"));

    // Everything on this span will be appended to all messages
    let main_span = tracing::info_span!(
        "main",
        chain = runtime.chain.as_str(),
        chain_id = runtime.chain_config.chain_id,
    );
    let _entered = main_span.entered();

    tracing::info!(env_vars = ?env_vars.for_logging(), "Indexer configuration");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let creator = tokio::spawn(
        run_creator(runtime.pipeline_context(shutdown_rx.clone())).instrument(tracing::info_span!("creator")),
    );
    let orchestrator = tokio::spawn(
        run_orchestrator(runtime.pipeline_context(shutdown_rx.clone()))
            .instrument(tracing::info_span!("orchestrator")),
    );
    let tracker = tokio::spawn(
        run_tracker(runtime.pipeline_context(shutdown_rx.clone())).instrument(tracing::info_span!("tracker")),
    );

    let state = Arc::new(server::AppState { registry });
    let server = tokio::spawn(server::run_server(state, env_vars.service_bind_to_addr.value));

    tokio::signal::ctrl_c()
        .await
        .unwrap_or_else(|e| panic!("Failed to listen for shutdown signal {e:?}"));
    tracing::info!("Shutdown signal received, stopping loops");
    shutdown_tx.send(true).ok();

    for handle in [creator, orchestrator, tracker] {
        handle.await.ok();
    }
    server.abort();
    tracing::info!("Indexer stopped");
}
