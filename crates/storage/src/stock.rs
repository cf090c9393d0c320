use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::ProductId;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{Result, StorageError};

/// Catalog entry together with its available stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub product_id: ProductId,
    pub name: String,
    /// Current unit price in minor units.
    pub unit_price_cents: i64,
    /// Units available for purchase.
    pub available: u32,
}

impl ProductRecord {
    pub fn new(
        product_id: impl Into<ProductId>,
        name: impl Into<String>,
        unit_price_cents: i64,
        available: u32,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            name: name.into(),
            unit_price_cents,
            available,
        }
    }
}

/// Per-product stock counters with atomic conditional updates.
///
/// Available stock never goes negative: `try_decrement` either removes the
/// full quantity or changes nothing.
#[async_trait]
pub trait StockLedger: Send + Sync {
    /// Inserts or replaces a catalog entry.
    async fn upsert_product(&self, product: ProductRecord) -> Result<()>;

    /// Reads a catalog entry.
    async fn product(&self, product_id: &ProductId) -> Result<Option<ProductRecord>>;

    /// Atomically removes `quantity` units if at least that many are available.
    ///
    /// Returns the remaining stock.
    async fn try_decrement(&self, product_id: &ProductId, quantity: u32) -> Result<u32>;

    /// Returns `quantity` units to stock. Returns the new stock level.
    async fn increment(&self, product_id: &ProductId, quantity: u32) -> Result<u32>;
}

/// In-memory stock ledger for testing and single-node deployments.
#[derive(Clone, Default)]
pub struct InMemoryStockLedger {
    products: Arc<RwLock<HashMap<ProductId, ProductRecord>>>,
}

impl InMemoryStockLedger {
    /// Creates a new empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of catalog entries.
    pub async fn product_count(&self) -> usize {
        self.products.read().await.len()
    }
}

#[async_trait]
impl StockLedger for InMemoryStockLedger {
    async fn upsert_product(&self, product: ProductRecord) -> Result<()> {
        self.products
            .write()
            .await
            .insert(product.product_id.clone(), product);
        Ok(())
    }

    async fn product(&self, product_id: &ProductId) -> Result<Option<ProductRecord>> {
        Ok(self.products.read().await.get(product_id).cloned())
    }

    async fn try_decrement(&self, product_id: &ProductId, quantity: u32) -> Result<u32> {
        let mut products = self.products.write().await;
        let product = products
            .get_mut(product_id)
            .ok_or_else(|| StorageError::UnknownProduct(product_id.clone()))?;

        if product.available < quantity {
            return Err(StorageError::InsufficientStock {
                product_id: product_id.clone(),
                requested: quantity,
                available: product.available,
            });
        }

        product.available -= quantity;
        Ok(product.available)
    }

    async fn increment(&self, product_id: &ProductId, quantity: u32) -> Result<u32> {
        let mut products = self.products.write().await;
        let product = products
            .get_mut(product_id)
            .ok_or_else(|| StorageError::UnknownProduct(product_id.clone()))?;

        product.available = product
            .available
            .checked_add(quantity)
            .ok_or_else(|| StorageError::StockOverflow(product_id.clone()))?;
        Ok(product.available)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn ledger_with(product: &str, available: u32) -> InMemoryStockLedger {
        let ledger = InMemoryStockLedger::new();
        ledger
            .upsert_product(ProductRecord::new(product, "Widget", 1000, available))
            .await
            .unwrap();
        ledger
    }

    #[tokio::test]
    async fn test_decrement_within_stock() {
        let ledger = ledger_with("A", 5).await;
        let remaining = ledger.try_decrement(&"A".into(), 3).await.unwrap();
        assert_eq!(remaining, 2);
    }

    #[tokio::test]
    async fn test_decrement_to_zero() {
        let ledger = ledger_with("A", 2).await;
        assert_eq!(ledger.try_decrement(&"A".into(), 2).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_decrement_beyond_stock_changes_nothing() {
        let ledger = ledger_with("A", 1).await;
        let result = ledger.try_decrement(&"A".into(), 2).await;

        assert!(matches!(
            result,
            Err(StorageError::InsufficientStock {
                requested: 2,
                available: 1,
                ..
            })
        ));
        let product = ledger.product(&"A".into()).await.unwrap().unwrap();
        assert_eq!(product.available, 1);
    }

    #[tokio::test]
    async fn test_unknown_product_is_rejected() {
        let ledger = InMemoryStockLedger::new();
        let result = ledger.try_decrement(&"missing".into(), 1).await;
        assert!(matches!(result, Err(StorageError::UnknownProduct(_))));
    }

    #[tokio::test]
    async fn test_increment_restores_stock() {
        let ledger = ledger_with("A", 0).await;
        assert_eq!(ledger.increment(&"A".into(), 2).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_increment_overflow_is_rejected() {
        let ledger = ledger_with("A", u32::MAX).await;
        let result = ledger.increment(&"A".into(), 1).await;
        assert!(matches!(result, Err(StorageError::StockOverflow(_))));
    }

    #[tokio::test]
    async fn test_concurrent_decrements_never_oversell() {
        let ledger = ledger_with("A", 10).await;
        let mut handles = Vec::new();
        for _ in 0..25 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.try_decrement(&"A".into(), 1).await.is_ok()
            }));
        }

        let mut succeeded = 0;
        for handle in handles {
            if handle.await.unwrap() {
                succeeded += 1;
            }
        }

        assert_eq!(succeeded, 10);
        let product = ledger.product(&"A".into()).await.unwrap().unwrap();
        assert_eq!(product.available, 0);
    }
}
