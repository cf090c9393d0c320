//! Shared application state and backend wiring.

use std::time::Duration;

use domain::{CartService, OrderFactory, OrderRepository, RetryPolicy, StockReleaser};
use payments::{
    InMemoryPaymentGateway, PaymentGateway, PaymentIntentService, PaymentReconciler,
    ReservationReaper, WebhookVerifier,
};
use storage::{
    DocumentStore, InMemoryDocumentStore, InMemoryProcessedEventStore, InMemoryStockLedger,
    PostgresStore, ProcessedEventStore, StockLedger,
};

use crate::config::Config;

/// Backoff before the second optimistic-update attempt.
const ORDER_UPDATE_BACKOFF: Duration = Duration::from_millis(10);

/// The storage and gateway types a deployment runs on.
pub trait Backend: Send + Sync + 'static {
    type Store: DocumentStore + Clone + 'static;
    type Ledger: StockLedger + Clone + 'static;
    type Processed: ProcessedEventStore + Clone + 'static;
    type Gateway: PaymentGateway + Clone + 'static;
}

/// Everything in process memory.
pub struct InMemoryBackend;

impl Backend for InMemoryBackend {
    type Store = InMemoryDocumentStore;
    type Ledger = InMemoryStockLedger;
    type Processed = InMemoryProcessedEventStore;
    type Gateway = InMemoryPaymentGateway;
}

/// Postgres for documents, stock and processed events.
pub struct PostgresBackend;

impl Backend for PostgresBackend {
    type Store = PostgresStore;
    type Ledger = PostgresStore;
    type Processed = PostgresStore;
    type Gateway = InMemoryPaymentGateway;
}

/// Shared application state accessible from all handlers.
pub struct AppState<B: Backend> {
    pub carts: CartService<B::Store, B::Ledger>,
    pub orders: OrderRepository<B::Store>,
    pub checkout: OrderFactory<B::Store, B::Ledger>,
    pub intents: PaymentIntentService<B::Store, B::Gateway>,
    pub reconciler: PaymentReconciler<B::Store, B::Ledger, B::Processed, B::Gateway>,
    releaser: StockReleaser<B::Store, B::Ledger>,
    processed: B::Processed,
    reservation_timeout: Option<Duration>,
}

impl<B: Backend> AppState<B> {
    /// Wires services over the given backends.
    pub fn new(
        store: B::Store,
        ledger: B::Ledger,
        processed: B::Processed,
        gateway: B::Gateway,
        config: &Config,
    ) -> Self {
        let retry = RetryPolicy::new(config.order_update_max_attempts, ORDER_UPDATE_BACKOFF);
        let orders = OrderRepository::with_retry(store.clone(), retry);
        let carts = CartService::new(store, ledger.clone());
        let checkout = OrderFactory::new(carts.clone(), orders.clone(), config.currency.clone());
        let releaser = StockReleaser::new(orders.clone(), ledger);
        let intents =
            PaymentIntentService::new(orders.clone(), gateway.clone(), config.gateway_timeout);
        let verifier = WebhookVerifier::new(config.webhook_secret.as_bytes(), config.webhook_tolerance);
        let reconciler = PaymentReconciler::new(
            orders.clone(),
            releaser.clone(),
            processed.clone(),
            gateway,
            verifier,
        )
        .with_retention(config.dedup_retention);

        Self {
            carts,
            orders,
            checkout,
            intents,
            reconciler,
            releaser,
            processed,
            reservation_timeout: config.reservation_timeout,
        }
    }

    /// Builds a reaper sharing this state's backends.
    pub fn reaper(&self) -> ReservationReaper<B::Store, B::Ledger, B::Processed> {
        ReservationReaper::new(
            self.orders.clone(),
            self.releaser.clone(),
            self.processed.clone(),
            self.reservation_timeout,
        )
    }
}
