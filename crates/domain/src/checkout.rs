//! Checkout: turns a cart into a Pending order while reserving stock.

use std::time::Instant;

use common::{OrderId, ProductId};
use storage::{DocumentStore, StockLedger, StorageError};

use crate::cart::{Cart, CartService};
use crate::error::DomainError;
use crate::identity::AuthenticatedUser;
use crate::order::{Order, OrderError, OrderItem, OrderRepository};
use crate::reservation::release_order_stock;
use crate::value_objects::{Currency, ShippingInfo};

/// Cancellation reason of an order whose cart could not be cleared.
pub const CHECKOUT_ABANDONED: &str = "checkout abandoned";

/// Creates orders from carts.
///
/// The steps run under the user's cart lock:
/// 1. Validate shipping info and load the cart
/// 2. Reserve stock per line, in ascending product order
/// 3. Persist the Pending order
/// 4. Clear the cart
///
/// A failure in steps 2 or 3 returns every unit already reserved. The cart
/// is emptied iff the order persists: if the cleared cart cannot be written
/// the order is cancelled and its stock returned.
pub struct OrderFactory<S: DocumentStore, L: StockLedger> {
    carts: CartService<S, L>,
    orders: OrderRepository<S>,
    currency: Currency,
}

impl<S, L> Clone for OrderFactory<S, L>
where
    S: DocumentStore + Clone,
    L: StockLedger + Clone,
{
    fn clone(&self) -> Self {
        Self {
            carts: self.carts.clone(),
            orders: self.orders.clone(),
            currency: self.currency.clone(),
        }
    }
}

impl<S: DocumentStore, L: StockLedger> OrderFactory<S, L> {
    /// Creates a factory. `carts` must be the same service that handles cart
    /// mutations so both share the per-user locks.
    pub fn new(carts: CartService<S, L>, orders: OrderRepository<S>, currency: Currency) -> Self {
        Self {
            carts,
            orders,
            currency,
        }
    }

    /// Checks out the user's cart.
    #[tracing::instrument(skip(self, user, shipping), fields(user_id = %user.user_id))]
    pub async fn checkout(
        &self,
        user: &AuthenticatedUser,
        shipping: ShippingInfo,
    ) -> Result<Order, DomainError> {
        let start = Instant::now();
        metrics::counter!("checkout_total").increment(1);

        let result = self.checkout_locked(user, shipping).await;

        metrics::histogram!("checkout_duration_seconds").record(start.elapsed().as_secs_f64());
        match &result {
            Ok(order) => tracing::info!(
                order_id = %order.id(),
                total = %order.total(),
                items = order.items().len(),
                "Checkout completed"
            ),
            Err(e) => {
                metrics::counter!("checkout_failed").increment(1);
                tracing::warn!(error = %e, "Checkout failed");
            }
        }
        result
    }

    async fn checkout_locked(
        &self,
        user: &AuthenticatedUser,
        shipping: ShippingInfo,
    ) -> Result<Order, DomainError> {
        shipping.validate()?;

        let _guard = self.carts.lock(user.user_id).await;
        let mut cart = self.carts.get_cart(user.user_id).await?;
        if cart.is_empty() {
            return Err(OrderError::EmptyCart.into());
        }

        let items = cart.to_order_items();
        let mut order = Order::place(
            OrderId::new(),
            user.user_id,
            items,
            self.currency.clone(),
            shipping,
        )?;

        self.reserve(order.items()).await?;

        if let Err(e) = self.orders.insert(&mut order).await {
            tracing::error!(order_id = %order.id(), error = %e, "Failed to persist order, returning stock");
            self.release(order.items()).await;
            return Err(e);
        }

        if let Err(e) = self.clear_ordered(cart, &order).await {
            tracing::error!(order_id = %order.id(), error = %e, "Cart not cleared, abandoning order");
            self.abandon(&order).await;
            return Err(e);
        }

        Ok(order)
    }

    /// Removes the ordered units from the cart.
    ///
    /// The cart lock only serializes this process; another instance may write
    /// the cart meanwhile, so a version conflict reloads the cart and retries.
    async fn clear_ordered(&self, mut cart: Cart, order: &Order) -> Result<(), DomainError> {
        let retry = self.orders.retry_policy();

        for attempt in 1..=retry.max_attempts {
            cart.remove_ordered(order.items())?;
            match self.carts.save(&mut cart).await {
                Ok(()) => return Ok(()),
                Err(DomainError::Storage(StorageError::ConcurrencyConflict { .. })) => {
                    tracing::debug!(order_id = %order.id(), attempt, "Cart changed during checkout, reloading");
                    if attempt < retry.max_attempts {
                        tokio::time::sleep(retry.backoff * attempt).await;
                        cart = self.carts.get_cart(order.user_id()).await?;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        metrics::counter!("checkout_cart_clear_exhausted").increment(1);
        Err(DomainError::ConflictRetriesExhausted {
            order_id: order.id(),
            attempts: retry.max_attempts,
        })
    }

    /// Cancels an order whose checkout could not complete and returns its stock.
    ///
    /// Anything left undone is picked up by the reaper through the
    /// `AwaitingStockRelease` label.
    async fn abandon(&self, order: &Order) {
        if let Err(e) = self
            .orders
            .update(order.id(), |o| o.expire_reservation(CHECKOUT_ABANDONED))
            .await
        {
            tracing::error!(order_id = %order.id(), error = %e, "Failed to cancel abandoned order");
            return;
        }
        if let Err(e) = release_order_stock(&self.orders, self.carts.ledger(), order.id()).await {
            tracing::error!(order_id = %order.id(), error = %e, "Failed to return stock of abandoned order");
        }
    }

    /// Decrements stock for every line, undoing earlier lines on failure.
    async fn reserve(&self, items: &[OrderItem]) -> Result<(), DomainError> {
        let ledger = self.carts.ledger();

        for (index, item) in items.iter().enumerate() {
            if let Err(e) = ledger.try_decrement(&item.product_id, item.quantity).await {
                self.release(&items[..index]).await;
                return Err(match e {
                    StorageError::InsufficientStock { product_id, .. }
                    | StorageError::UnknownProduct(product_id) => {
                        OrderError::InsufficientStock { product_id }.into()
                    }
                    other => other.into(),
                });
            }
        }
        Ok(())
    }

    /// Best-effort return of reserved units.
    async fn release(&self, items: &[OrderItem]) {
        let ledger = self.carts.ledger();
        for item in items {
            if let Err(e) = ledger.increment(&item.product_id, item.quantity).await {
                log_release_failure(&item.product_id, item.quantity, &e);
            }
        }
    }
}

fn log_release_failure(product_id: &ProductId, quantity: u32, error: &StorageError) {
    tracing::error!(
        product_id = %product_id,
        quantity,
        error = %error,
        "Failed to return reserved stock"
    );
}
