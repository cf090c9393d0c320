//! Order aggregate and related types.

mod aggregate;
mod repository;
mod state;

pub use aggregate::{Order, OrderItem, Transition};
pub use repository::{OrderRepository, RetryPolicy};
pub use state::{OrderStatus, PaymentStatus};

use common::{OrderId, ProductId};
use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// The order is not in a state that allows the action.
    #[error("Invalid state transition: cannot {action} from {status}/{payment_status}")]
    InvalidTransition {
        status: OrderStatus,
        payment_status: PaymentStatus,
        action: &'static str,
    },

    /// A payment notification referenced a different intent than the order holds.
    #[error("Payment intent mismatch: order holds {expected:?}, event carries {actual}")]
    IntentMismatch {
        expected: Option<String>,
        actual: String,
    },

    /// Checkout was attempted with an empty cart.
    #[error("Cart is empty")]
    EmptyCart,

    /// Stock could not be reserved for a product.
    #[error("Insufficient stock for product {product_id}")]
    InsufficientStock { product_id: ProductId },

    /// A required shipping field is blank.
    #[error("Invalid shipping info: {field} is required")]
    InvalidShippingInfo { field: String },

    /// The order total does not fit in the amount type.
    #[error("Order amount overflow")]
    AmountOverflow,

    /// Order not found (or not visible to the caller).
    #[error("Order not found: {0}")]
    NotFound(OrderId),
}
