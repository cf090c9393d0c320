//! Order aggregate implementation.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use common::{OrderId, ProductId, UserId};
use serde::{Deserialize, Serialize};
use storage::Version;

use super::{OrderError, OrderStatus, PaymentStatus};
use crate::value_objects::{Currency, Money, ShippingInfo};

/// Whether a transition changed the order.
///
/// Replayed or duplicated notifications produce `Unchanged` so callers can
/// skip the write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    Unchanged,
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied)
    }
}

/// A line of an order. Copied from the cart at checkout and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Money,
}

impl OrderItem {
    /// Creates a new order item.
    pub fn new(
        product_id: impl Into<ProductId>,
        product_name: impl Into<String>,
        quantity: u32,
        unit_price: Money,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            product_name: product_name.into(),
            quantity,
            unit_price,
        }
    }

    /// Returns `unit_price * quantity`, or None on overflow.
    pub fn subtotal(&self) -> Option<Money> {
        self.unit_price.checked_mul(self.quantity)
    }
}

/// Order aggregate root.
///
/// Created once per successful checkout. Items and total are frozen at
/// creation; only the status fields, intent reference and fulfillment
/// bookkeeping change afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    user_id: UserId,
    items: Vec<OrderItem>,
    total: Money,
    #[serde(default)]
    currency: Currency,
    shipping: ShippingInfo,
    status: OrderStatus,
    payment_status: PaymentStatus,
    payment_intent_ref: Option<String>,
    paid_at: Option<DateTime<Utc>>,
    cancellation_reason: Option<String>,
    #[serde(default)]
    stock_released: bool,
    /// Lines already returned to stock by an unfinished release.
    #[serde(default)]
    released_lines: BTreeSet<ProductId>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,

    /// Version of the stored document; assigned by the repository.
    #[serde(skip)]
    version: Version,
}

// Query methods
impl Order {
    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn total(&self) -> Money {
        self.total
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn shipping(&self) -> &ShippingInfo {
        &self.shipping
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.payment_status
    }

    pub fn payment_intent_ref(&self) -> Option<&str> {
        self.payment_intent_ref.as_deref()
    }

    pub fn paid_at(&self) -> Option<DateTime<Utc>> {
        self.paid_at
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    pub fn stock_released(&self) -> bool {
        self.stock_released
    }

    /// Items whose units have not been returned to stock yet.
    pub fn unreleased_items(&self) -> impl Iterator<Item = &OrderItem> {
        self.items
            .iter()
            .filter(|item| !self.stock_released && !self.released_lines.contains(&item.product_id))
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    /// Returns true if a payment intent may still be created for the order.
    pub fn is_payable(&self) -> bool {
        self.status == OrderStatus::Pending && self.payment_status == PaymentStatus::Pending
    }

    /// Returns true if the order was cancelled unpaid and its stock is still held.
    pub fn needs_stock_release(&self) -> bool {
        self.status == OrderStatus::Cancelled
            && self.payment_status == PaymentStatus::Failed
            && !self.stock_released
    }

    /// Returns a short human-readable summary such as `"2x Widget, 1x Gadget"`.
    pub fn items_summary(&self) -> String {
        self.items
            .iter()
            .map(|item| format!("{}x {}", item.quantity, item.product_name))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

// Command methods
impl Order {
    /// Creates a Pending/Pending order from frozen cart lines.
    pub fn place(
        id: OrderId,
        user_id: UserId,
        items: Vec<OrderItem>,
        currency: Currency,
        shipping: ShippingInfo,
    ) -> Result<Self, OrderError> {
        if items.is_empty() {
            return Err(OrderError::EmptyCart);
        }

        let total = Money::checked_total(items.iter().map(|i| (i.unit_price, i.quantity)))
            .ok_or(OrderError::AmountOverflow)?;

        let now = Utc::now();
        Ok(Self {
            id,
            user_id,
            items,
            total,
            currency,
            shipping,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_intent_ref: None,
            paid_at: None,
            cancellation_reason: None,
            stock_released: false,
            released_lines: BTreeSet::new(),
            created_at: now,
            updated_at: now,
            version: Version::initial(),
        })
    }

    /// Records the payment intent created for this order.
    pub fn attach_intent(&mut self, intent_id: &str) -> Result<Transition, OrderError> {
        if !self.is_payable() {
            return Err(self.invalid("attach payment intent"));
        }
        if self.payment_intent_ref.as_deref() == Some(intent_id) {
            return Ok(Transition::Unchanged);
        }

        self.payment_intent_ref = Some(intent_id.to_string());
        self.touch();
        Ok(Transition::Applied)
    }

    /// Applies a successful payment: Pending/Pending → Processing/Paid.
    pub fn mark_paid(
        &mut self,
        intent_id: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<Transition, OrderError> {
        self.check_intent(intent_id)?;

        if matches!(
            self.payment_status,
            PaymentStatus::Paid | PaymentStatus::Refunded
        ) {
            return Ok(Transition::Unchanged);
        }
        if !self.payment_status.can_mark_paid() || !self.status.can_mark_paid() {
            return Err(self.invalid("mark paid"));
        }

        self.payment_status = PaymentStatus::Paid;
        self.status = OrderStatus::Processing;
        self.paid_at = Some(paid_at);
        self.touch();
        Ok(Transition::Applied)
    }

    /// Applies a failed payment: Pending/Pending → Cancelled/Failed.
    ///
    /// Stock stays reserved until [`Order::mark_stock_released`].
    pub fn mark_failed(
        &mut self,
        intent_id: &str,
        reason: impl Into<String>,
    ) -> Result<Transition, OrderError> {
        self.check_intent(intent_id)?;

        if self.payment_status == PaymentStatus::Failed {
            return Ok(Transition::Unchanged);
        }

        self.cancel_unpaid("mark failed", reason.into())
    }

    /// Applies a refund: Paid → Refunded and the order is cancelled.
    pub fn mark_refunded(&mut self, intent_id: Option<&str>) -> Result<Transition, OrderError> {
        if let Some(intent_id) = intent_id {
            self.check_intent(intent_id)?;
        }

        if self.payment_status == PaymentStatus::Refunded {
            return Ok(Transition::Unchanged);
        }
        if !self.payment_status.can_refund() || !self.status.can_refund() {
            return Err(self.invalid("refund"));
        }

        self.payment_status = PaymentStatus::Refunded;
        self.status = OrderStatus::Cancelled;
        self.cancellation_reason = Some("payment refunded".to_string());
        self.touch();
        Ok(Transition::Applied)
    }

    /// Cancels an unpaid order whose reservation timed out.
    pub fn expire_reservation(&mut self, reason: impl Into<String>) -> Result<Transition, OrderError> {
        self.cancel_unpaid("expire reservation", reason.into())
    }

    /// Records that one line's units were returned to the ledger.
    pub fn mark_line_released(&mut self, product_id: &ProductId) -> Result<Transition, OrderError> {
        if self.stock_released || self.released_lines.contains(product_id) {
            return Ok(Transition::Unchanged);
        }
        if !(self.status == OrderStatus::Cancelled && self.payment_status == PaymentStatus::Failed)
        {
            return Err(self.invalid("release stock"));
        }
        if !self.items.iter().any(|item| &item.product_id == product_id) {
            return Err(self.invalid("release stock of a foreign line"));
        }

        self.released_lines.insert(product_id.clone());
        self.touch();
        Ok(Transition::Applied)
    }

    /// Records that the reserved stock was returned to the ledger.
    pub fn mark_stock_released(&mut self) -> Result<Transition, OrderError> {
        if self.stock_released {
            return Ok(Transition::Unchanged);
        }
        if !(self.status == OrderStatus::Cancelled && self.payment_status == PaymentStatus::Failed)
        {
            return Err(self.invalid("release stock"));
        }

        self.stock_released = true;
        self.released_lines.clear();
        self.touch();
        Ok(Transition::Applied)
    }

    /// Hands the order to the carrier: Processing → Shipped.
    pub fn mark_shipped(&mut self) -> Result<Transition, OrderError> {
        if self.status == OrderStatus::Shipped {
            return Ok(Transition::Unchanged);
        }
        if !self.status.can_ship() {
            return Err(self.invalid("ship"));
        }

        self.status = OrderStatus::Shipped;
        self.touch();
        Ok(Transition::Applied)
    }

    /// Confirms receipt: Shipped → Delivered.
    pub fn mark_delivered(&mut self) -> Result<Transition, OrderError> {
        if self.status == OrderStatus::Delivered {
            return Ok(Transition::Unchanged);
        }
        if !self.status.can_deliver() {
            return Err(self.invalid("deliver"));
        }

        self.status = OrderStatus::Delivered;
        self.touch();
        Ok(Transition::Applied)
    }
}

// Transition helpers
impl Order {
    fn cancel_unpaid(&mut self, action: &'static str, reason: String) -> Result<Transition, OrderError> {
        if !self.payment_status.can_fail() || !self.status.can_cancel() {
            return Err(self.invalid(action));
        }

        self.payment_status = PaymentStatus::Failed;
        self.status = OrderStatus::Cancelled;
        self.cancellation_reason = Some(reason);
        self.touch();
        Ok(Transition::Applied)
    }

    fn check_intent(&self, intent_id: &str) -> Result<(), OrderError> {
        if self.payment_intent_ref.as_deref() == Some(intent_id) {
            Ok(())
        } else {
            Err(OrderError::IntentMismatch {
                expected: self.payment_intent_ref.clone(),
                actual: intent_id.to_string(),
            })
        }
    }

    fn invalid(&self, action: &'static str) -> OrderError {
        OrderError::InvalidTransition {
            status: self.status,
            payment_status: self.payment_status,
            action,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
