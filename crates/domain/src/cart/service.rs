//! Cart service: per-user serialized cart mutations.

use common::{ProductId, UserId};
use storage::{Document, DocumentStore, PutOptions, StockLedger};
use tokio::sync::OwnedMutexGuard;

use super::{Cart, CartError};
use crate::error::DomainError;
use crate::locks::KeyedLocks;

const COLLECTION: &str = "carts";

/// Service for managing carts.
///
/// Mutations for the same user are serialized by a per-user lock, and every
/// write is version-checked against the stored cart document.
pub struct CartService<S, L> {
    store: S,
    ledger: L,
    locks: KeyedLocks<UserId>,
}

impl<S: Clone, L: Clone> Clone for CartService<S, L> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            ledger: self.ledger.clone(),
            locks: self.locks.clone(),
        }
    }
}

impl<S: DocumentStore, L: StockLedger> CartService<S, L> {
    /// Creates a new cart service.
    pub fn new(store: S, ledger: L) -> Self {
        Self {
            store,
            ledger,
            locks: KeyedLocks::new(),
        }
    }

    /// Returns a reference to the stock ledger.
    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Acquires the user's cart lock.
    pub(crate) async fn lock(&self, user_id: UserId) -> OwnedMutexGuard<()> {
        self.locks.lock(&user_id).await
    }

    /// Loads the user's cart, or an empty one if none was stored yet.
    pub async fn get_cart(&self, user_id: UserId) -> Result<Cart, DomainError> {
        match self.store.get(COLLECTION, &user_id.to_string()).await? {
            Some(document) => {
                let mut cart: Cart = document.decode()?;
                cart.set_version(document.version);
                Ok(cart)
            }
            None => Ok(Cart::new(user_id)),
        }
    }

    /// Writes the cart, expecting the version it was loaded at.
    pub(crate) async fn save(&self, cart: &mut Cart) -> Result<(), DomainError> {
        let document = Document::from_value(COLLECTION, cart.user_id().to_string(), cart)?
            .owned_by(cart.user_id().to_string());
        let version = self
            .store
            .put(document, PutOptions::expect_version(cart.version()))
            .await?;
        cart.set_version(version);
        Ok(())
    }

    /// Adds units of a product to the cart.
    #[tracing::instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<Cart, DomainError> {
        let _guard = self.lock(user_id).await;
        let product = self
            .ledger
            .product(&product_id)
            .await?
            .ok_or_else(|| CartError::UnknownProduct(product_id.clone()))?;

        let mut cart = self.get_cart(user_id).await?;
        cart.add_item(&product, quantity)?;
        self.save(&mut cart).await?;

        tracing::debug!(total = %cart.total(), "Item added to cart");
        Ok(cart)
    }

    /// Replaces the quantity of a product already in the cart.
    #[tracing::instrument(skip(self))]
    pub async fn set_item_quantity(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<Cart, DomainError> {
        let _guard = self.lock(user_id).await;
        let mut cart = self.get_cart(user_id).await?;
        if cart.get_item(&product_id).is_none() {
            return Err(CartError::ItemNotFound(product_id).into());
        }

        let product = self
            .ledger
            .product(&product_id)
            .await?
            .ok_or_else(|| CartError::UnknownProduct(product_id.clone()))?;

        cart.set_item_quantity(&product, quantity)?;
        self.save(&mut cart).await?;
        Ok(cart)
    }

    /// Removes a product from the cart. Absent products are ignored.
    #[tracing::instrument(skip(self))]
    pub async fn remove_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<Cart, DomainError> {
        let _guard = self.lock(user_id).await;
        let mut cart = self.get_cart(user_id).await?;
        if cart.get_item(&product_id).is_none() {
            return Ok(cart);
        }

        cart.remove_item(&product_id)?;
        self.save(&mut cart).await?;
        Ok(cart)
    }

    /// Empties the cart.
    #[tracing::instrument(skip(self))]
    pub async fn clear(&self, user_id: UserId) -> Result<Cart, DomainError> {
        let _guard = self.lock(user_id).await;
        let mut cart = self.get_cart(user_id).await?;
        if cart.is_empty() {
            return Ok(cart);
        }

        cart.clear();
        self.save(&mut cart).await?;
        Ok(cart)
    }
}
