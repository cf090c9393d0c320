//! Cart aggregate implementation.

use std::collections::BTreeMap;

use common::{ProductId, UserId};
use serde::{Deserialize, Serialize};
use storage::{ProductRecord, Version};

use super::CartError;
use crate::order::OrderItem;
use crate::value_objects::Money;

/// A cart line with the unit price captured when it was last added or updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Money,
}

impl CartItem {
    /// Returns `unit_price * quantity`, or None on overflow.
    pub fn subtotal(&self) -> Option<Money> {
        self.unit_price.checked_mul(self.quantity)
    }
}

/// Per-user mutable basket.
///
/// Lines are keyed and ordered by product ID; the total is recomputed after
/// every mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cart {
    user_id: UserId,
    items: BTreeMap<ProductId, CartItem>,
    total: Money,

    #[serde(skip)]
    version: Version,
}

impl Cart {
    /// Creates an empty cart for a user.
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            items: BTreeMap::new(),
            total: Money::zero(),
            version: Version::initial(),
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Returns the lines in ascending product order.
    pub fn items(&self) -> impl Iterator<Item = &CartItem> {
        self.items.values()
    }

    pub fn get_item(&self, product_id: &ProductId) -> Option<&CartItem> {
        self.items.get(product_id)
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn total(&self) -> Money {
        self.total
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    /// Freezes the cart lines into order items, in ascending product order.
    pub fn to_order_items(&self) -> Vec<OrderItem> {
        self.items
            .values()
            .map(|item| {
                OrderItem::new(
                    item.product_id.clone(),
                    item.product_name.clone(),
                    item.quantity,
                    item.unit_price,
                )
            })
            .collect()
    }

    /// Adds `quantity` units of a product, merging with an existing line.
    ///
    /// The line's price snapshot is refreshed from `product`. Fails with
    /// `OutOfStock` if the resulting line quantity exceeds available stock.
    pub fn add_item(&mut self, product: &ProductRecord, quantity: i64) -> Result<(), CartError> {
        let quantity = positive_quantity(quantity)?;
        let current = self
            .items
            .get(&product.product_id)
            .map(|item| item.quantity)
            .unwrap_or(0);

        let requested = current
            .checked_add(quantity)
            .ok_or_else(|| out_of_stock(product, u32::MAX))?;

        self.put_line(product, requested)
    }

    /// Replaces the quantity of an existing line.
    pub fn set_item_quantity(
        &mut self,
        product: &ProductRecord,
        quantity: i64,
    ) -> Result<(), CartError> {
        let quantity = positive_quantity(quantity)?;
        if !self.items.contains_key(&product.product_id) {
            return Err(CartError::ItemNotFound(product.product_id.clone()));
        }

        self.put_line(product, quantity)
    }

    /// Removes a line. Removing an absent product is a no-op.
    pub fn remove_item(&mut self, product_id: &ProductId) -> Result<(), CartError> {
        if self.items.remove(product_id).is_some() {
            self.recompute_total()?;
        }
        Ok(())
    }

    /// Takes the ordered units out of the cart.
    ///
    /// Lines that end up empty are removed. Units added after the order was
    /// taken stay in the cart.
    pub fn remove_ordered(&mut self, ordered: &[OrderItem]) -> Result<(), CartError> {
        for item in ordered {
            let Some(line) = self.items.get_mut(&item.product_id) else {
                continue;
            };
            line.quantity = line.quantity.saturating_sub(item.quantity);
            if line.quantity == 0 {
                self.items.remove(&item.product_id);
            }
        }
        self.recompute_total()
    }

    /// Removes every line.
    pub fn clear(&mut self) {
        self.items.clear();
        self.total = Money::zero();
    }

    fn put_line(&mut self, product: &ProductRecord, quantity: u32) -> Result<(), CartError> {
        if quantity > product.available {
            return Err(out_of_stock(product, quantity));
        }

        let previous = self.items.insert(
            product.product_id.clone(),
            CartItem {
                product_id: product.product_id.clone(),
                product_name: product.name.clone(),
                quantity,
                unit_price: Money::from_cents(product.unit_price_cents),
            },
        );

        if let Err(e) = self.recompute_total() {
            // Restore the previous line so the cart stays consistent
            match previous {
                Some(item) => self.items.insert(product.product_id.clone(), item),
                None => self.items.remove(&product.product_id),
            };
            self.recompute_total()?;
            return Err(e);
        }
        Ok(())
    }

    fn recompute_total(&mut self) -> Result<(), CartError> {
        self.total = Money::checked_total(self.items.values().map(|i| (i.unit_price, i.quantity)))
            .ok_or(CartError::AmountOverflow)?;
        Ok(())
    }
}

fn positive_quantity(quantity: i64) -> Result<u32, CartError> {
    match u32::try_from(quantity) {
        Ok(q) if q > 0 => Ok(q),
        _ => Err(CartError::InvalidQuantity(quantity)),
    }
}

fn out_of_stock(product: &ProductRecord, requested: u32) -> CartError {
    CartError::OutOfStock {
        product_id: product.product_id.clone(),
        requested,
        available: product.available,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn widget(available: u32) -> ProductRecord {
        ProductRecord::new("A", "Widget", 1000, available)
    }

    fn gadget(available: u32) -> ProductRecord {
        ProductRecord::new("B", "Gadget", 500, available)
    }

    #[test]
    fn test_remove_ordered_keeps_later_additions() {
        let mut cart = Cart::new(UserId::new());
        cart.add_item(&widget(10), 2).unwrap();
        cart.add_item(&gadget(10), 1).unwrap();
        let ordered = cart.to_order_items();

        // Added after the order was taken
        cart.add_item(&widget(10), 1).unwrap();
        cart.add_item(&ProductRecord::new("C", "Gizmo", 2499, 5), 1).unwrap();

        cart.remove_ordered(&ordered).unwrap();

        assert_eq!(cart.get_item(&"A".into()).unwrap().quantity, 1);
        assert!(cart.get_item(&"B".into()).is_none());
        assert_eq!(cart.get_item(&"C".into()).unwrap().quantity, 1);
        assert_eq!(cart.total(), Money::from_cents(3499));
    }

    #[test]
    fn test_add_items_computes_total() {
        let mut cart = Cart::new(UserId::new());
        cart.add_item(&widget(10), 2).unwrap();
        cart.add_item(&gadget(10), 1).unwrap();

        assert_eq!(cart.total(), Money::from_cents(2500));
        assert_eq!(cart.item_count(), 2);
    }

    #[test]
    fn test_add_existing_item_merges_and_refreshes_price() {
        let mut cart = Cart::new(UserId::new());
        cart.add_item(&widget(10), 1).unwrap();

        let repriced = ProductRecord::new("A", "Widget", 1200, 10);
        cart.add_item(&repriced, 2).unwrap();

        let line = cart.get_item(&"A".into()).unwrap();
        assert_eq!(line.quantity, 3);
        assert_eq!(line.unit_price, Money::from_cents(1200));
        assert_eq!(cart.total(), Money::from_cents(3600));
    }

    #[test]
    fn test_add_rejects_non_positive_quantity() {
        let mut cart = Cart::new(UserId::new());
        assert!(matches!(
            cart.add_item(&widget(10), 0),
            Err(CartError::InvalidQuantity(0))
        ));
        assert!(matches!(
            cart.add_item(&widget(10), -3),
            Err(CartError::InvalidQuantity(-3))
        ));
        assert!(cart.is_empty());
    }

    #[test]
    fn test_add_checks_resulting_line_quantity() {
        let mut cart = Cart::new(UserId::new());
        cart.add_item(&widget(3), 2).unwrap();

        let result = cart.add_item(&widget(3), 2);

        assert!(matches!(
            result,
            Err(CartError::OutOfStock {
                requested: 4,
                available: 3,
                ..
            })
        ));
        assert_eq!(cart.get_item(&"A".into()).unwrap().quantity, 2);
        assert_eq!(cart.total(), Money::from_cents(2000));
    }

    #[test]
    fn test_set_quantity_requires_existing_item() {
        let mut cart = Cart::new(UserId::new());
        assert!(matches!(
            cart.set_item_quantity(&widget(10), 2),
            Err(CartError::ItemNotFound(_))
        ));
    }

    #[test]
    fn test_set_quantity_replaces_line() {
        let mut cart = Cart::new(UserId::new());
        cart.add_item(&widget(10), 5).unwrap();
        cart.set_item_quantity(&widget(10), 2).unwrap();

        assert_eq!(cart.get_item(&"A".into()).unwrap().quantity, 2);
        assert_eq!(cart.total(), Money::from_cents(2000));
    }

    #[test]
    fn test_set_quantity_checks_stock() {
        let mut cart = Cart::new(UserId::new());
        cart.add_item(&widget(10), 1).unwrap();
        assert!(matches!(
            cart.set_item_quantity(&widget(4), 5),
            Err(CartError::OutOfStock { .. })
        ));
    }

    #[test]
    fn test_remove_item_and_absent_noop() {
        let mut cart = Cart::new(UserId::new());
        cart.add_item(&widget(10), 2).unwrap();
        cart.add_item(&gadget(10), 1).unwrap();

        cart.remove_item(&"A".into()).unwrap();
        cart.remove_item(&"missing".into()).unwrap();

        assert_eq!(cart.item_count(), 1);
        assert_eq!(cart.total(), Money::from_cents(500));
    }

    #[test]
    fn test_clear_empties_cart() {
        let mut cart = Cart::new(UserId::new());
        cart.add_item(&widget(10), 2).unwrap();
        cart.clear();
        assert!(cart.is_empty());
        assert_eq!(cart.total(), Money::zero());
    }

    #[test]
    fn test_overflowing_total_is_rejected_and_rolled_back() {
        let mut cart = Cart::new(UserId::new());
        let pricey = ProductRecord::new("Z", "Yacht", i64::MAX, 10);

        assert!(matches!(
            cart.add_item(&pricey, 2),
            Err(CartError::AmountOverflow)
        ));
        assert!(cart.is_empty());
        assert_eq!(cart.total(), Money::zero());
    }

    #[test]
    fn test_order_items_are_sorted_by_product() {
        let mut cart = Cart::new(UserId::new());
        cart.add_item(&gadget(10), 1).unwrap();
        cart.add_item(&widget(10), 2).unwrap();

        let items = cart.to_order_items();
        let ids: Vec<_> = items.iter().map(|i| i.product_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
    }
}
