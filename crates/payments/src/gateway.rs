//! Payment gateway trait and in-memory implementation.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use common::OrderId;
use domain::{Currency, Money, ShippingInfo};
use thiserror::Error;

/// Errors reported by the payment provider.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// The provider could not be reached or returned a server error.
    #[error("Payment provider unavailable: {0}")]
    Unavailable(String),

    /// The provider rejected the request (e.g. zero amount).
    #[error("Payment request rejected: {0}")]
    InvalidRequest(String),

    /// The referenced intent does not exist.
    #[error("Payment intent not found: {0}")]
    NotFound(String),

    /// The call did not complete within the configured bound.
    #[error("Payment provider timed out after {0:?}")]
    Timeout(Duration),
}

impl GatewayError {
    /// Returns true if the same request may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Unavailable(_) | GatewayError::Timeout(_))
    }
}

/// Request to create a payment intent for an order.
#[derive(Debug, Clone)]
pub struct IntentRequest {
    pub order_id: OrderId,
    pub amount: Money,
    pub currency: Currency,
    pub description: String,
    pub shipping: ShippingInfo,
    pub receipt_email: Option<String>,
    pub metadata: BTreeMap<String, String>,
    /// Requests with the same key return the same intent.
    pub idempotency_key: String,
}

/// A payment intent as known to the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
    pub amount: Money,
    pub currency: Currency,
    pub metadata: BTreeMap<String, String>,
}

impl PaymentIntent {
    /// Returns the order ID recorded in the intent metadata, if any.
    pub fn order_id(&self) -> Option<OrderId> {
        self.metadata
            .get("order_id")
            .and_then(|id| OrderId::parse(id).ok())
    }
}

/// External payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates (or, for a repeated idempotency key, returns) a payment intent.
    async fn create_intent(&self, request: IntentRequest) -> Result<PaymentIntent, GatewayError>;

    /// Retrieves an existing payment intent.
    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayError>;
}

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    intents: HashMap<String, PaymentIntent>,
    idempotency: HashMap<String, String>,
    next_id: u32,
    create_calls: u32,
    fail_on_create: bool,
    fail_on_retrieve: bool,
    create_latency: Option<Duration>,
}

/// In-memory payment gateway for testing and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<RwLock<InMemoryGatewayState>>,
}

impl InMemoryPaymentGateway {
    /// Creates a new in-memory gateway.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, InMemoryGatewayState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, InMemoryGatewayState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes `create_intent` report the provider as unavailable.
    pub fn set_fail_on_create(&self, fail: bool) {
        self.write().fail_on_create = fail;
    }

    /// Makes `retrieve_intent` report the provider as unavailable.
    pub fn set_fail_on_retrieve(&self, fail: bool) {
        self.write().fail_on_retrieve = fail;
    }

    /// Delays `create_intent` before it records anything.
    pub fn set_create_latency(&self, latency: Option<Duration>) {
        self.write().create_latency = latency;
    }

    /// Returns the number of distinct intents created.
    pub fn intent_count(&self) -> usize {
        self.read().intents.len()
    }

    /// Returns how many times `create_intent` was called.
    pub fn create_calls(&self) -> u32 {
        self.read().create_calls
    }

    /// Returns a stored intent.
    pub fn intent(&self, intent_id: &str) -> Option<PaymentIntent> {
        self.read().intents.get(intent_id).cloned()
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn create_intent(&self, request: IntentRequest) -> Result<PaymentIntent, GatewayError> {
        let latency = {
            let mut state = self.write();
            state.create_calls += 1;
            state.create_latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.write();
        if state.fail_on_create {
            return Err(GatewayError::Unavailable("connection refused".to_string()));
        }
        if !request.amount.is_positive() {
            return Err(GatewayError::InvalidRequest(format!(
                "amount must be positive, got {}",
                request.amount.cents()
            )));
        }

        if let Some(existing) = state
            .idempotency
            .get(&request.idempotency_key)
            .and_then(|id| state.intents.get(id))
        {
            return Ok(existing.clone());
        }

        state.next_id += 1;
        let id = format!("pi_{:06}", state.next_id);
        let intent = PaymentIntent {
            client_secret: format!("{id}_secret_{}", request.order_id.as_uuid().simple()),
            id: id.clone(),
            amount: request.amount,
            currency: request.currency,
            metadata: request.metadata,
        };
        state.idempotency.insert(request.idempotency_key, id.clone());
        state.intents.insert(id, intent.clone());

        Ok(intent)
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayError> {
        let state = self.read();
        if state.fail_on_retrieve {
            return Err(GatewayError::Unavailable("connection refused".to_string()));
        }
        state
            .intents
            .get(intent_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(intent_id.to_string()))
    }
}
