//! Shopping cart aggregate and service.

mod aggregate;
mod service;

pub use aggregate::{Cart, CartItem};
pub use service::CartService;

use common::ProductId;
use thiserror::Error;

/// Errors that can occur during cart operations.
#[derive(Debug, Error)]
pub enum CartError {
    /// Quantity must be a positive integer.
    #[error("Invalid quantity: {0} (must be greater than 0)")]
    InvalidQuantity(i64),

    /// The requested line quantity exceeds the stock currently available.
    #[error("Out of stock: {product_id} has {available} available, {requested} requested")]
    OutOfStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    /// The product is not in the catalog.
    #[error("Unknown product: {0}")]
    UnknownProduct(ProductId),

    /// The product is not in the cart.
    #[error("Item not found in cart: {0}")]
    ItemNotFound(ProductId),

    /// The cart total does not fit in the amount type.
    #[error("Cart amount overflow")]
    AmountOverflow,
}
