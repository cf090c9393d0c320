//! HTTP API for the checkout and payment reconciliation engine.
//!
//! Provides REST endpoints for carts, checkout, order history, payment
//! intents and provider webhooks, with structured logging (tracing) and
//! Prometheus metrics.

pub mod config;
pub mod error;
pub mod identity;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use metrics_exporter_prometheus::PrometheusHandle;
use payments::InMemoryPaymentGateway;
use storage::{
    InMemoryDocumentStore, InMemoryProcessedEventStore, InMemoryStockLedger, ProductRecord,
    StockLedger, StorageError,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use state::{AppState, Backend, InMemoryBackend};

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<B: Backend>(state: Arc<AppState<B>>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::health::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/cart",
            get(routes::cart::get::<B>).delete(routes::cart::clear::<B>),
        )
        .route("/cart/items", post(routes::cart::add_item::<B>))
        .route(
            "/cart/items/{product_id}",
            put(routes::cart::update_item::<B>).delete(routes::cart::remove_item::<B>),
        )
        .route("/checkout", post(routes::checkout::checkout::<B>))
        .route("/orders", get(routes::orders::list::<B>))
        .route("/orders/{id}", get(routes::orders::get::<B>))
        .route(
            "/orders/{id}/payment-intent",
            post(routes::orders::payment_intent::<B>),
        )
        .route("/webhooks/payments", post(routes::webhooks::payments::<B>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates application state over fresh in-memory backends.
pub fn create_default_state(config: &Config) -> Arc<AppState<InMemoryBackend>> {
    Arc::new(AppState::new(
        InMemoryDocumentStore::new(),
        InMemoryStockLedger::new(),
        InMemoryProcessedEventStore::new(),
        InMemoryPaymentGateway::new(),
        config,
    ))
}

/// Catalog loaded into the in-memory ledger for local runs.
pub fn demo_products() -> Vec<ProductRecord> {
    vec![
        ProductRecord::new("WIDGET-1", "Widget", 1000, 100),
        ProductRecord::new("GADGET-1", "Gadget", 500, 100),
        ProductRecord::new("GIZMO-1", "Gizmo", 2499, 25),
    ]
}

/// Inserts or replaces products in a stock ledger.
pub async fn seed_products<L: StockLedger>(
    ledger: &L,
    products: Vec<ProductRecord>,
) -> Result<(), StorageError> {
    for product in products {
        ledger.upsert_product(product).await?;
    }
    Ok(())
}
