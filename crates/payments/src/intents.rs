//! Creating and reusing payment intents for Pending orders.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use common::OrderId;
use domain::{AuthenticatedUser, DomainError, Order, OrderError, OrderRepository};
use storage::DocumentStore;

use crate::error::{PaymentError, Result};
use crate::gateway::{GatewayError, IntentRequest, PaymentGateway, PaymentIntent};

/// What the client needs to confirm a payment.
#[derive(Debug, Clone)]
pub struct IntentHandle {
    pub order: Order,
    pub intent_id: String,
    pub client_secret: String,
}

impl IntentHandle {
    fn new(order: Order, intent: PaymentIntent) -> Self {
        Self {
            order,
            intent_id: intent.id,
            client_secret: intent.client_secret,
        }
    }
}

/// Ensures every payable order has exactly one live payment intent.
///
/// No lock is held while the gateway is called; the intent reference is
/// stored afterwards with an optimistic update.
pub struct PaymentIntentService<S: DocumentStore, G: PaymentGateway> {
    orders: OrderRepository<S>,
    gateway: G,
    timeout: Duration,
}

impl<S, G> Clone for PaymentIntentService<S, G>
where
    S: DocumentStore + Clone,
    G: PaymentGateway + Clone,
{
    fn clone(&self) -> Self {
        Self {
            orders: self.orders.clone(),
            gateway: self.gateway.clone(),
            timeout: self.timeout,
        }
    }
}

impl<S: DocumentStore, G: PaymentGateway> PaymentIntentService<S, G> {
    pub fn new(orders: OrderRepository<S>, gateway: G, timeout: Duration) -> Self {
        Self {
            orders,
            gateway,
            timeout,
        }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Returns the order's intent, creating one if needed.
    ///
    /// On gateway failure the order is left Pending with no new reference
    /// and the error is returned; [`PaymentError::is_retryable`] tells the
    /// caller whether to try again.
    #[tracing::instrument(skip(self, user), fields(user_id = %user.user_id))]
    pub async fn ensure_intent(
        &self,
        user: &AuthenticatedUser,
        order_id: OrderId,
    ) -> Result<IntentHandle> {
        let order = match self.orders.get_for_user(user.user_id, order_id).await {
            Ok(order) => order,
            Err(DomainError::Order(OrderError::NotFound(_))) => {
                return Err(PaymentError::OrderNotFound(order_id));
            }
            Err(e) => return Err(e.into()),
        };
        if !order.is_payable() {
            return Err(not_payable(&order));
        }

        if let Some(existing) = order.payment_intent_ref() {
            match self.bounded(self.gateway.retrieve_intent(existing)).await {
                Ok(intent) => return Ok(IntentHandle::new(order, intent)),
                Err(e) => {
                    tracing::warn!(
                        intent_id = existing,
                        error = %e,
                        "Could not retrieve existing payment intent, creating a new one"
                    );
                }
            }
        }

        let idempotency_key = match order.payment_intent_ref() {
            Some(previous) => format!("{order_id}-{previous}"),
            None => order_id.to_string(),
        };
        let request = intent_request(&order, user, idempotency_key);

        let intent = match self.bounded(self.gateway.create_intent(request)).await {
            Ok(intent) => intent,
            Err(e) => {
                tracing::warn!(error = %e, retryable = e.is_retryable(), "Payment intent creation failed");
                metrics::counter!("payment_intent_failures_total").increment(1);
                return Err(e.into());
            }
        };

        let (order, transition) = self
            .orders
            .update(order_id, |o| o.attach_intent(&intent.id))
            .await
            .map_err(|e| match e {
                DomainError::Order(OrderError::InvalidTransition {
                    status,
                    payment_status,
                    ..
                }) => PaymentError::OrderNotPayable {
                    order_id,
                    status,
                    payment_status,
                },
                other => other.into(),
            })?;

        if transition.is_applied() {
            metrics::counter!("payment_intents_created_total").increment(1);
            tracing::info!(intent_id = %intent.id, "Payment intent attached to order");
        }
        Ok(IntentHandle::new(order, intent))
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = std::result::Result<T, GatewayError>>,
    ) -> std::result::Result<T, GatewayError> {
        tokio::time::timeout(self.timeout, call)
            .await
            .unwrap_or(Err(GatewayError::Timeout(self.timeout)))
    }
}

fn not_payable(order: &Order) -> PaymentError {
    PaymentError::OrderNotPayable {
        order_id: order.id(),
        status: order.status(),
        payment_status: order.payment_status(),
    }
}

fn intent_request(
    order: &Order,
    user: &AuthenticatedUser,
    idempotency_key: String,
) -> IntentRequest {
    let customer_name = user
        .full_name
        .clone()
        .unwrap_or_else(|| order.shipping().full_name.clone());

    let mut metadata = BTreeMap::from([
        ("order_id".to_string(), order.id().to_string()),
        ("order_items".to_string(), order.items_summary()),
        ("customer_name".to_string(), customer_name),
    ]);
    if let Some(email) = &user.email {
        metadata.insert("customer_email".to_string(), email.clone());
    }

    IntentRequest {
        order_id: order.id(),
        amount: order.total(),
        currency: order.currency().clone(),
        description: format!("Order #{}", order.id()),
        shipping: order.shipping().clone(),
        receipt_email: user.email.clone(),
        metadata,
        idempotency_key,
    }
}
