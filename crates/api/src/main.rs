//! API server entry point.

use std::sync::Arc;

use api::config::Config;
use api::state::{AppState, Backend, PostgresBackend};
use payments::InMemoryPaymentGateway;
use storage::PostgresStore;
use tokio::signal;
use tokio::sync::watch;
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

/// Serves `state` until a shutdown signal, running the reaper alongside.
async fn serve<B: Backend>(
    state: Arc<AppState<B>>,
    config: &Config,
    metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
) {
    let (stop_tx, mut stop_rx) = watch::channel(false);

    let reaper = state.reaper();
    let interval = config.reaper_interval;
    let reaper_task = tokio::spawn(async move {
        reaper
            .run(interval, async move {
                let _ = stop_rx.wait_for(|stopped| *stopped).await;
            })
            .await;
    });

    let app = api::create_app(state, metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    let _ = stop_tx.send(true);
    if let Err(e) = reaper_task.await {
        tracing::error!(error = %e, "reservation reaper task failed");
    }
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

    if config.webhook_secret == api::config::DEV_WEBHOOK_SECRET {
        tracing::warn!("WEBHOOK_SECRET not set, using the development secret");
    }
    if config.reservation_timeout.is_none() {
        tracing::info!("RESERVATION_TIMEOUT_SECS not set, unpaid reservations never expire");
    }

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Pick the backend and run
    match &config.database_url {
        Some(url) => {
            let store = PostgresStore::connect(url)
                .await
                .expect("failed to connect to database");
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            tracing::info!("using PostgreSQL backend");

            let state = Arc::new(AppState::<PostgresBackend>::new(
                store.clone(),
                store.clone(),
                store,
                InMemoryPaymentGateway::new(),
                &config,
            ));
            serve(state, &config, metrics_handle).await;
        }
        None => {
            tracing::info!("DATABASE_URL not set, using in-memory backend with demo products");
            let state = api::create_default_state(&config);
            api::seed_products(state.carts.ledger(), api::demo_products())
                .await
                .expect("failed to seed demo products");
            serve(state, &config, metrics_handle).await;
        }
    }

    tracing::info!("server shut down gracefully");
}
