//! Domain error types.

use common::OrderId;
use storage::StorageError;
use thiserror::Error;

use crate::cart::CartError;
use crate::order::OrderError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An error occurred in the storage layer.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// An order rule was violated.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// A cart rule was violated.
    #[error("Cart error: {0}")]
    Cart(#[from] CartError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An order kept changing underneath an update.
    #[error("Gave up updating order {order_id} after {attempts} conflicting attempts")]
    ConflictRetriesExhausted { order_id: OrderId, attempts: u32 },
}

impl DomainError {
    /// Returns true if retrying the whole operation later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            DomainError::Storage(e) => matches!(
                e,
                StorageError::Database(_) | StorageError::ConcurrencyConflict { .. }
            ),
            DomainError::ConflictRetriesExhausted { .. } => true,
            _ => false,
        }
    }
}
