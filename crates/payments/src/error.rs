//! Payment error types.

use common::OrderId;
use domain::{DomainError, OrderStatus, PaymentStatus};
use storage::StorageError;
use thiserror::Error;

use crate::gateway::GatewayError;
use crate::webhook::SignatureError;

/// Errors that can occur while creating intents or reconciling webhooks.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// Order not found (or not visible to the caller).
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The order can no longer be paid.
    #[error("Order {order_id} is not payable in {status}/{payment_status}")]
    OrderNotPayable {
        order_id: OrderId,
        status: OrderStatus,
        payment_status: PaymentStatus,
    },

    /// The payment provider call failed.
    #[error("Payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// The webhook signature did not verify.
    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(#[from] SignatureError),

    /// The webhook body is not a recognizable event.
    #[error("Malformed webhook event: {0}")]
    MalformedEvent(String),

    /// Domain error.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Storage error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl PaymentError {
    /// Returns true if the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::Gateway(e) => e.is_retryable(),
            PaymentError::Domain(e) => e.is_transient(),
            PaymentError::Storage(e) => matches!(
                e,
                StorageError::Database(_) | StorageError::ConcurrencyConflict { .. }
            ),
            _ => false,
        }
    }
}

/// Convenience type alias for payment results.
pub type Result<T> = std::result::Result<T, PaymentError>;
