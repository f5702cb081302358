//! API server entry point.

use api::config::{Config, LogFormat};
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::{InMemoryOrderStore, OrderStore, PostgresOrderStore};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use workflow::{Orchestrator, PipelineRunner, SimulatedActivities};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Registers help text for the workflow metrics.
fn describe_metrics() {
    metrics::describe_counter!("workflow_pipelines_total", "Pipelines started or resumed");
    metrics::describe_counter!("workflow_pipelines_completed", "Pipelines that reached dispatched");
    metrics::describe_counter!("workflow_pipelines_rejected", "Orders that failed validation");
    metrics::describe_counter!("workflow_pipelines_failed", "Pipelines that ended in an error");
    metrics::describe_counter!("workflow_step_attempts_total", "Step attempts, by step");
    metrics::describe_counter!(
        "workflow_step_failures_total",
        "Failed step attempts, by step and kind"
    );
    metrics::describe_counter!(
        "workflow_step_replays_total",
        "Steps answered from a recorded event instead of running"
    );
    metrics::describe_counter!(
        "workflow_integrity_violations_total",
        "Commits that contradicted the recorded history"
    );
    metrics::describe_histogram!(
        "workflow_pipeline_duration_seconds",
        metrics::Unit::Seconds,
        "Wall time of one pipeline run"
    );
}

/// Runs the engine and the HTTP server on `store` until a shutdown signal.
async fn serve<S>(config: Config, store: S, metrics_handle: PrometheusHandle)
where
    S: OrderStore + Clone + 'static,
{
    let workflow_config = config
        .workflow_config()
        .expect("invalid workflow configuration");
    let simulator = config.simulator().expect("invalid simulator rates");

    let orchestrator = Orchestrator::new(
        store,
        SimulatedActivities::new(simulator),
        workflow_config,
    );
    let runner = PipelineRunner::new(orchestrator);

    // Pick up orders a previous process left unfinished
    let recovered = runner
        .recover()
        .await
        .expect("failed to recover unfinished orders");
    tracing::info!(count = recovered.len(), "resumed unfinished orders");

    let app = api::create_app(runner.clone(), metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    runner.shutdown().await;
    tracing::info!("server shut down gracefully");
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");
    describe_metrics();

    // 3. Pick the order store and run
    match config.database_url.clone() {
        Some(url) => {
            let store = PostgresOrderStore::connect(&url, config.db_max_connections)
                .await
                .expect("failed to connect to PostgreSQL");
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            tracing::info!("using PostgreSQL order store");
            serve(config, store, metrics_handle).await;
        }
        None => {
            tracing::warn!("DATABASE_URL not set, orders are kept in memory only");
            serve(config, InMemoryOrderStore::new(), metrics_handle).await;
        }
    }
}
