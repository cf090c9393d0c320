//! Returning reserved stock for orders that will never be paid.

use common::OrderId;
use storage::{DocumentStore, StockLedger};

use crate::error::DomainError;
use crate::order::{Order, OrderRepository};

/// Releases the stock held by cancelled, unpaid orders.
///
/// Each line is recorded on the order right after its units go back to the
/// ledger, and the `stock_released` flag is set once every line is back.
/// A release that stops part-way is resumed by the next caller from the
/// first unrecorded line, so a line is returned at most twice and only if
/// the process dies between its increment and its record.
pub struct StockReleaser<S: DocumentStore, L: StockLedger> {
    orders: OrderRepository<S>,
    ledger: L,
}

impl<S, L> Clone for StockReleaser<S, L>
where
    S: DocumentStore + Clone,
    L: StockLedger + Clone,
{
    fn clone(&self) -> Self {
        Self {
            orders: self.orders.clone(),
            ledger: self.ledger.clone(),
        }
    }
}

impl<S: DocumentStore, L: StockLedger> StockReleaser<S, L> {
    pub fn new(orders: OrderRepository<S>, ledger: L) -> Self {
        Self { orders, ledger }
    }

    /// Returns the order's units to stock if it still holds them.
    ///
    /// Returns the number of units released (0 if nothing was pending).
    #[tracing::instrument(skip(self), fields(order_id = %order_id))]
    pub async fn release(&self, order_id: OrderId) -> Result<u64, DomainError> {
        release_order_stock(&self.orders, &self.ledger, order_id).await
    }
}

/// Returns the units a cancelled, unpaid order still holds.
pub(crate) async fn release_order_stock<S, L>(
    orders: &OrderRepository<S>,
    ledger: &L,
    order_id: OrderId,
) -> Result<u64, DomainError>
where
    S: DocumentStore,
    L: StockLedger,
{
    let Some(order) = orders.get(order_id).await? else {
        return Ok(0);
    };
    if !order.needs_stock_release() {
        return Ok(0);
    }

    let units = return_units(orders, ledger, &order).await?;
    let (_, transition) = orders
        .update(order_id, |o| o.mark_stock_released())
        .await?;

    if transition.is_applied() {
        tracing::info!(units, "Reserved stock released");
    }
    Ok(units)
}

async fn return_units<S, L>(
    orders: &OrderRepository<S>,
    ledger: &L,
    order: &Order,
) -> Result<u64, DomainError>
where
    S: DocumentStore,
    L: StockLedger,
{
    let mut units = 0u64;
    for item in order.unreleased_items() {
        if let Err(e) = ledger.increment(&item.product_id, item.quantity).await {
            tracing::error!(
                product_id = %item.product_id,
                quantity = item.quantity,
                error = %e,
                "Failed to return order line to stock"
            );
            return Err(e.into());
        }
        orders
            .update(order.id(), |o| o.mark_line_released(&item.product_id))
            .await?;

        units += u64::from(item.quantity);
        metrics::counter!("stock_released_units").increment(u64::from(item.quantity));
    }
    Ok(units)
}
