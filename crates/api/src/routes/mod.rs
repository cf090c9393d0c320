//! HTTP route handlers.

pub mod cart;
pub mod checkout;
pub mod health;
pub mod orders;
pub mod webhooks;
