//! Applying payment provider webhooks to orders.

use std::time::Duration;

use chrono::Utc;
use common::OrderId;
use domain::{DomainError, Order, OrderError, OrderRepository, StockReleaser, Transition};
use serde::Serialize;
use storage::{ClaimOutcome, DocumentStore, ProcessedEvent, ProcessedEventStore, StockLedger};

use crate::error::{PaymentError, Result};
use crate::gateway::{GatewayError, PaymentGateway};
use crate::webhook::{EventObject, PaymentEvent, WebhookEvent, WebhookVerifier};

/// Default time an event ID is remembered for deduplication (3 days).
pub const DEFAULT_DEDUP_RETENTION: Duration = Duration::from_secs(3 * 24 * 60 * 60);

/// What a webhook did to the order it referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// The order changed state.
    Applied,
    /// The event (or its effect) had already been applied.
    Duplicate,
    /// The event does not concern a known order or intent.
    Ignored,
    /// The event contradicts the order's state and was not applied.
    Rejected,
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::Applied => "applied",
            ReconcileOutcome::Duplicate => "duplicate",
            ReconcileOutcome::Ignored => "ignored",
            ReconcileOutcome::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verifies, deduplicates and applies payment webhooks.
///
/// Each event ID is claimed before processing so a redelivered event is a
/// no-op. If processing fails with a transient error the claim is released
/// and the provider's retry is processed normally.
pub struct PaymentReconciler<S, L, P, G>
where
    S: DocumentStore,
    L: StockLedger,
    P: ProcessedEventStore,
    G: PaymentGateway,
{
    orders: OrderRepository<S>,
    releaser: StockReleaser<S, L>,
    processed: P,
    gateway: G,
    verifier: WebhookVerifier,
    retention: Duration,
}

impl<S, L, P, G> Clone for PaymentReconciler<S, L, P, G>
where
    S: DocumentStore + Clone,
    L: StockLedger + Clone,
    P: ProcessedEventStore + Clone,
    G: PaymentGateway + Clone,
{
    fn clone(&self) -> Self {
        Self {
            orders: self.orders.clone(),
            releaser: self.releaser.clone(),
            processed: self.processed.clone(),
            gateway: self.gateway.clone(),
            verifier: self.verifier.clone(),
            retention: self.retention,
        }
    }
}

impl<S, L, P, G> PaymentReconciler<S, L, P, G>
where
    S: DocumentStore,
    L: StockLedger,
    P: ProcessedEventStore,
    G: PaymentGateway,
{
    pub fn new(
        orders: OrderRepository<S>,
        releaser: StockReleaser<S, L>,
        processed: P,
        gateway: G,
        verifier: WebhookVerifier,
    ) -> Self {
        Self {
            orders,
            releaser,
            processed,
            gateway,
            verifier,
            retention: DEFAULT_DEDUP_RETENTION,
        }
    }

    /// Sets how long processed event IDs are remembered.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Handles one raw webhook delivery.
    #[tracing::instrument(skip_all, fields(event_id = tracing::field::Empty, event_type = tracing::field::Empty))]
    pub async fn handle_event(&self, payload: &[u8], signature: &str) -> Result<ReconcileOutcome> {
        if let Err(e) = self.verifier.verify(payload, signature) {
            tracing::warn!(reason = %e, "Rejected webhook with invalid signature");
            metrics::counter!("webhook_signature_failures_total").increment(1);
            return Err(e.into());
        }

        let malformed = |e: serde_json::Error| {
            tracing::warn!(error = %e, "Rejected malformed webhook payload");
            PaymentError::MalformedEvent(e.to_string())
        };
        let event = WebhookEvent::parse(payload).map_err(malformed)?;
        let decoded = event.decode().map_err(malformed)?;

        let span = tracing::Span::current();
        span.record("event_id", event.id.as_str());
        span.record("event_type", event.event_type.as_str());
        metrics::counter!("webhook_events_total", "type" => event.event_type.clone()).increment(1);

        let record = ProcessedEvent::new(&event.id, &event.event_type, self.retention);
        if self.processed.claim(record).await? == ClaimOutcome::AlreadyProcessed {
            tracing::info!("Webhook event already processed");
            metrics::counter!("webhook_events_duplicate").increment(1);
            return Ok(ReconcileOutcome::Duplicate);
        }

        match self.dispatch(decoded).await {
            Ok(outcome) => {
                tracing::info!(outcome = outcome.as_str(), "Webhook event reconciled");
                Ok(outcome)
            }
            Err(e) => {
                if e.is_retryable() {
                    if let Err(release_err) = self.processed.release(&event.id).await {
                        tracing::error!(error = %release_err, "Failed to release webhook claim");
                    }
                }
                tracing::error!(error = %e, retryable = e.is_retryable(), "Webhook processing failed");
                Err(e)
            }
        }
    }

    async fn dispatch(&self, event: PaymentEvent) -> Result<ReconcileOutcome> {
        match event {
            PaymentEvent::Succeeded(object) => self.on_payment_succeeded(&object).await,
            PaymentEvent::Failed(object) => self.on_payment_failed(&object).await,
            PaymentEvent::Refunded(object) => self.on_charge_refunded(&object).await,
            PaymentEvent::Unknown(event_type) => {
                tracing::info!(event_type = %event_type, "Ignoring unhandled webhook event type");
                Ok(ReconcileOutcome::Ignored)
            }
        }
    }

    async fn on_payment_succeeded(&self, object: &EventObject) -> Result<ReconcileOutcome> {
        let Some(order_id) = object.order_id() else {
            return Ok(missing_order_id(object));
        };
        let intent_id = object.intent_id();
        let paid_at = Utc::now();

        self.apply(order_id, |o| o.mark_paid(intent_id, paid_at)).await
    }

    async fn on_payment_failed(&self, object: &EventObject) -> Result<ReconcileOutcome> {
        let Some(order_id) = object.order_id() else {
            return Ok(missing_order_id(object));
        };
        let intent_id = object.intent_id();
        let reason = object
            .failure_message()
            .map(|m| format!("payment failed: {m}"))
            .unwrap_or_else(|| "payment failed".to_string());

        let outcome = self
            .apply(order_id, |o| o.mark_failed(intent_id, reason.as_str()))
            .await?;

        // A duplicate may follow an attempt that cancelled but never released
        if matches!(
            outcome,
            ReconcileOutcome::Applied | ReconcileOutcome::Duplicate
        ) {
            self.releaser.release(order_id).await?;
        }
        Ok(outcome)
    }

    async fn on_charge_refunded(&self, object: &EventObject) -> Result<ReconcileOutcome> {
        let intent_id = object.payment_intent.as_deref();

        let order_id = match object.order_id() {
            Some(order_id) => order_id,
            None => {
                let Some(intent_id) = intent_id else {
                    return Ok(missing_order_id(object));
                };
                match self.gateway.retrieve_intent(intent_id).await {
                    Ok(intent) => match intent.order_id() {
                        Some(order_id) => order_id,
                        None => return Ok(missing_order_id(object)),
                    },
                    Err(GatewayError::NotFound(_)) => {
                        tracing::warn!(intent_id, "Refund references an unknown payment intent");
                        return Ok(ReconcileOutcome::Ignored);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };

        self.apply(order_id, |o| o.mark_refunded(intent_id)).await
    }

    /// Runs an order transition and classifies the result.
    async fn apply<F>(&self, order_id: OrderId, transition: F) -> Result<ReconcileOutcome>
    where
        F: Fn(&mut Order) -> std::result::Result<Transition, OrderError> + Send + Sync,
    {
        match self.orders.update(order_id, transition).await {
            Ok((order, Transition::Applied)) => {
                tracing::info!(
                    order_id = %order_id,
                    status = %order.status(),
                    payment_status = %order.payment_status(),
                    "Order updated from payment event"
                );
                Ok(ReconcileOutcome::Applied)
            }
            Ok((_, Transition::Unchanged)) => Ok(ReconcileOutcome::Duplicate),
            Err(DomainError::Order(OrderError::NotFound(_))) => {
                tracing::warn!(order_id = %order_id, "Payment event for unknown order");
                Ok(ReconcileOutcome::Ignored)
            }
            Err(DomainError::Order(e @ OrderError::IntentMismatch { .. })) => {
                tracing::warn!(order_id = %order_id, error = %e, "Payment event for a different intent");
                Ok(ReconcileOutcome::Ignored)
            }
            Err(DomainError::Order(e @ OrderError::InvalidTransition { .. })) => {
                tracing::warn!(order_id = %order_id, error = %e, "Payment event contradicts order state");
                metrics::counter!("webhook_anomalies_total").increment(1);
                Ok(ReconcileOutcome::Rejected)
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn missing_order_id(object: &EventObject) -> ReconcileOutcome {
    tracing::warn!(intent_id = object.intent_id(), "Payment event carries no order id");
    ReconcileOutcome::Ignored
}

#[cfg(test)]
mod tests {
    use common::UserId;
    use domain::{Currency, Money, OrderItem, OrderStatus, PaymentStatus, ShippingInfo};
    use serde_json::json;
    use storage::{
        InMemoryDocumentStore, InMemoryProcessedEventStore, InMemoryStockLedger, ProductRecord,
    };

    use super::*;
    use crate::gateway::InMemoryPaymentGateway;

    type Reconciler = PaymentReconciler<
        InMemoryDocumentStore,
        InMemoryStockLedger,
        InMemoryProcessedEventStore,
        InMemoryPaymentGateway,
    >;

    struct Fixture {
        reconciler: Reconciler,
        orders: OrderRepository<InMemoryDocumentStore>,
        ledger: InMemoryStockLedger,
        processed: InMemoryProcessedEventStore,
        verifier: WebhookVerifier,
        order_id: OrderId,
    }

    const INTENT: &str = "pi_000001";

    async fn fixture() -> Fixture {
        let store = InMemoryDocumentStore::new();
        let ledger = InMemoryStockLedger::new();
        // 2 units already reserved by the order below
        ledger
            .upsert_product(ProductRecord::new("A", "Widget", 1000, 8))
            .await
            .unwrap();

        let orders = OrderRepository::new(store);
        let mut order = Order::place(
            OrderId::new(),
            UserId::new(),
            vec![OrderItem::new("A", "Widget", 2, Money::from_cents(1000))],
            Currency::default(),
            ShippingInfo {
                full_name: "Ada Lovelace".to_string(),
                address: "12 Analytical Row".to_string(),
                city: "London".to_string(),
                state: "LDN".to_string(),
                zip_code: "N1 9GU".to_string(),
                country: "US".to_string(),
            },
        )
        .unwrap();
        order.attach_intent(INTENT).unwrap();
        orders.insert(&mut order).await.unwrap();

        let processed = InMemoryProcessedEventStore::new();
        let verifier = WebhookVerifier::new("whsec_test", Duration::from_secs(300));
        let reconciler = PaymentReconciler::new(
            orders.clone(),
            StockReleaser::new(orders.clone(), ledger.clone()),
            processed.clone(),
            InMemoryPaymentGateway::new(),
            verifier.clone(),
        );

        Fixture {
            reconciler,
            orders,
            ledger,
            processed,
            verifier,
            order_id: order.id(),
        }
    }

    impl Fixture {
        fn event(&self, id: &str, event_type: &str, intent: &str) -> Vec<u8> {
            json!({
                "id": id,
                "type": event_type,
                "data": {"object": {
                    "id": intent,
                    "metadata": {"order_id": self.order_id.to_string()}
                }}
            })
            .to_string()
            .into_bytes()
        }

        async fn deliver(&self, payload: &[u8]) -> Result<ReconcileOutcome> {
            let signature = self.verifier.sign(payload, Utc::now().timestamp()).unwrap();
            self.reconciler.handle_event(payload, &signature).await
        }

        async fn order(&self) -> Order {
            self.orders.get(self.order_id).await.unwrap().unwrap()
        }

        async fn available(&self) -> u32 {
            self.ledger
                .product(&"A".into())
                .await
                .unwrap()
                .unwrap()
                .available
        }
    }

    #[tokio::test]
    async fn test_payment_succeeded_marks_paid() {
        let f = fixture().await;

        let outcome = f
            .deliver(&f.event("evt_1", "payment_intent.succeeded", INTENT))
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Applied);
        let order = f.order().await;
        assert_eq!(order.status(), OrderStatus::Processing);
        assert_eq!(order.payment_status(), PaymentStatus::Paid);
        assert!(order.paid_at().is_some());
    }

    #[tokio::test]
    async fn test_same_event_id_is_applied_once() {
        let f = fixture().await;
        let payload = f.event("evt_1", "payment_succeeded", INTENT);

        let first = f.deliver(&payload).await.unwrap();
        let after_first = f.order().await;
        let second = f.deliver(&payload).await.unwrap();

        assert_eq!(first, ReconcileOutcome::Applied);
        assert_eq!(second, ReconcileOutcome::Duplicate);
        let after_second = f.order().await;
        assert_eq!(after_second.version(), after_first.version());
        assert_eq!(after_second.paid_at(), after_first.paid_at());
    }

    #[tokio::test]
    async fn test_intent_mismatch_is_ignored() {
        let f = fixture().await;

        let outcome = f
            .deliver(&f.event("evt_1", "payment_intent.succeeded", "pi_other"))
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Ignored);
        assert_eq!(f.order().await.payment_status(), PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_payment_failed_cancels_and_releases_stock() {
        let f = fixture().await;

        let outcome = f
            .deliver(&f.event("evt_1", "payment_intent.payment_failed", INTENT))
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Applied);
        let order = f.order().await;
        assert_eq!(order.status(), OrderStatus::Cancelled);
        assert_eq!(order.payment_status(), PaymentStatus::Failed);
        assert!(order.stock_released());
        assert_eq!(f.available().await, 10);
    }

    #[tokio::test]
    async fn test_duplicate_failure_resumes_unfinished_release() {
        let f = fixture().await;
        // A previous attempt cancelled the order but stopped before releasing
        f.orders
            .update(f.order_id, |o| o.mark_failed(INTENT, "payment failed"))
            .await
            .unwrap();
        assert_eq!(f.available().await, 8);

        let outcome = f
            .deliver(&f.event("evt_2", "payment_failed", INTENT))
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Duplicate);
        assert_eq!(f.available().await, 10);
        assert!(f.order().await.stock_released());
    }

    #[tokio::test]
    async fn test_refund_on_pending_order_is_rejected() {
        let f = fixture().await;
        let before = f.order().await;

        let payload = json!({
            "id": "evt_1",
            "type": "charge.refunded",
            "data": {"object": {
                "id": "ch_1",
                "payment_intent": INTENT,
                "metadata": {"order_id": f.order_id.to_string()}
            }}
        })
        .to_string();
        let outcome = f.deliver(payload.as_bytes()).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Rejected);
        let after = f.order().await;
        assert_eq!(after.status(), OrderStatus::Pending);
        assert_eq!(after.payment_status(), PaymentStatus::Pending);
        assert_eq!(after.version(), before.version());
    }

    #[tokio::test]
    async fn test_payment_after_cancellation_is_rejected() {
        let f = fixture().await;
        f.deliver(&f.event("evt_1", "payment_failed", INTENT))
            .await
            .unwrap();

        let outcome = f
            .deliver(&f.event("evt_2", "payment_succeeded", INTENT))
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Rejected);
        assert_eq!(f.order().await.payment_status(), PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn test_unknown_event_type_is_ignored() {
        let f = fixture().await;

        let outcome = f
            .deliver(&f.event("evt_1", "customer.created", "cus_1"))
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_unknown_event_without_object_id_is_ignored() {
        let f = fixture().await;
        let payload = json!({
            "id": "evt_balance",
            "type": "balance.available",
            "data": {"object": {"object": "balance", "available": [], "pending": []}}
        })
        .to_string();

        let outcome = f.deliver(payload.as_bytes()).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Ignored);
        assert_eq!(f.order().await.payment_status(), PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_known_event_without_object_id_is_malformed_and_unclaimed() {
        let f = fixture().await;
        let payload = json!({
            "id": "evt_1",
            "type": "payment_intent.succeeded",
            "data": {"object": {"metadata": {"order_id": f.order_id.to_string()}}}
        })
        .to_string();

        let result = f.deliver(payload.as_bytes()).await;

        assert!(matches!(result, Err(PaymentError::MalformedEvent(_))));
        assert!(f.processed.is_empty().await);
    }

    #[tokio::test]
    async fn test_invalid_signature_is_not_claimed() {
        let f = fixture().await;
        let payload = f.event("evt_1", "payment_succeeded", INTENT);

        let result = f.reconciler.handle_event(&payload, "t=1,v1=00").await;

        assert!(matches!(result, Err(PaymentError::InvalidSignature(_))));
        assert!(f.processed.is_empty().await);
        assert_eq!(f.order().await.payment_status(), PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_malformed_payload() {
        let f = fixture().await;

        let result = f.deliver(b"{\"not\":\"an event\"}").await;

        assert!(matches!(result, Err(PaymentError::MalformedEvent(_))));
        assert!(f.processed.is_empty().await);
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(ReconcileOutcome::Applied.to_string(), "applied");
        assert_eq!(
            serde_json::to_value(ReconcileOutcome::Duplicate).unwrap(),
            json!("duplicate")
        );
    }
}
