//! Orchestrator entry point.

use std::sync::Arc;

use orchestrator::config::Config;
use saga::{
    DeduplicationStore, ExecutionRepository, InMemoryBroker, InMemoryDeduplicationStore,
    InMemoryExecutionRepository, MessageHandler, PostgresDeduplicationStore,
    PostgresExecutionRepository, SagaConsumer, WorkflowRegistry,
};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::{Notify, watch};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

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

/// Execution repository and deduplication store, both in PostgreSQL when
/// `DATABASE_URL` is set, otherwise in memory.
async fn connect_storage(
    config: &Config,
    registry: Arc<WorkflowRegistry>,
) -> (Arc<dyn ExecutionRepository>, Arc<dyn DeduplicationStore>) {
    let Some(url) = config.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL not set, executions and dedupe keys are kept in memory");
        return (
            Arc::new(InMemoryExecutionRepository::new()),
            Arc::new(InMemoryDeduplicationStore::new()),
        );
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .expect("failed to connect to PostgreSQL");
    let repository = PostgresExecutionRepository::new(pool.clone(), registry);
    repository
        .run_migrations()
        .await
        .expect("failed to run migrations");
    let dedupe = PostgresDeduplicationStore::new(pool);
    match dedupe.purge_expired().await {
        Ok(purged) => tracing::info!(purged, "expired dedupe keys removed"),
        Err(err) => tracing::warn!(error = %err, "failed to purge expired dedupe keys"),
    }
    tracing::info!("executions and dedupe keys are stored in PostgreSQL");
    (Arc::new(repository), Arc::new(dedupe))
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Workflows, storage and transport
    let registry = Arc::new(orchestrator::workflows::registry().expect("invalid workflow"));
    let (repository, dedupe) = connect_storage(&config, Arc::clone(&registry)).await;
    let broker = InMemoryBroker::new();
    let state = orchestrator::create_state(
        Arc::clone(&registry),
        repository,
        Arc::new(broker.clone()),
    );

    // 4. Consume replies
    let handler = Arc::new(MessageHandler::new(
        Arc::clone(&registry),
        Arc::clone(&state.coordinator),
        dedupe,
        config.dispatch(),
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer_stopped = Arc::new(Notify::new());
    let consumer = {
        let stopped = Arc::clone(&consumer_stopped);
        let mut source = broker.subscribe(registry.reply_destinations());
        tokio::spawn(async move {
            let result = SagaConsumer::new(handler)
                .run(&mut source, shutdown_rx)
                .await;
            stopped.notify_one();
            result
        })
    };

    // 5. Serve the API until a signal arrives or the consumer gives up
    let app = orchestrator::create_app(state, metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, routing = config.routing.as_str(), "starting orchestrator");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                () = shutdown_signal() => {}
                () = consumer_stopped.notified() => {
                    tracing::error!("consumer stopped, shutting down");
                }
            }
        })
        .await
        .expect("server error");

    // 6. Drain the consumer
    let _ = shutdown_tx.send(true);
    broker.close().await;
    match consumer.await {
        Ok(Ok(())) => tracing::info!("orchestrator shut down gracefully"),
        Ok(Err(err)) => {
            tracing::error!(error = %err, "consumer failed");
            std::process::exit(1);
        }
        Err(err) => {
            tracing::error!(error = %err, "consumer task panicked");
            std::process::exit(1);
        }
    }
}
