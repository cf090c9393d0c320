//! Domain layer for the checkout engine.
//!
//! This crate provides:
//! - Cart aggregate and a per-user serialized CartService
//! - Order aggregate with the order/payment state machine
//! - OrderRepository with optimistic-concurrency updates
//! - OrderFactory turning a cart into a Pending order with reserved stock
//! - StockReleaser returning stock held by cancelled, unpaid orders

pub mod cart;
pub mod checkout;
pub mod error;
pub mod identity;
pub mod locks;
pub mod order;
pub mod reservation;
pub mod value_objects;

pub use cart::{Cart, CartError, CartItem, CartService};
pub use checkout::{CHECKOUT_ABANDONED, OrderFactory};
pub use common::{OrderId, ProductId, UserId};
pub use error::DomainError;
pub use identity::AuthenticatedUser;
pub use order::{
    Order, OrderError, OrderItem, OrderRepository, OrderStatus, PaymentStatus, RetryPolicy,
    Transition,
};
pub use reservation::StockReleaser;
pub use value_objects::{Currency, Money, ShippingInfo};
