//! Versioned order persistence.

use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{OrderId, UserId};
use storage::{Document, DocumentQuery, DocumentStore, PutOptions, StorageError};

use super::{Order, OrderError, OrderStatus, Transition};
use crate::error::DomainError;

const COLLECTION: &str = "orders";

/// State label for cancelled orders whose stock has not been returned yet.
const AWAITING_STOCK_RELEASE: &str = "AwaitingStockRelease";

/// Bounded retry for optimistic-concurrency conflicts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt; grows linearly afterwards.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(10))
    }
}

/// Stores orders as documents in the `orders` collection.
///
/// The owner label holds the user ID and the state label holds the order
/// status, so per-user listings and reaper sweeps are plain document queries.
/// Cancelled orders still holding stock are labelled `AwaitingStockRelease`
/// until the release completes.
#[derive(Clone)]
pub struct OrderRepository<S: DocumentStore> {
    store: S,
    retry: RetryPolicy,
}

impl<S: DocumentStore> OrderRepository<S> {
    /// Creates a repository with the default retry policy.
    pub fn new(store: S) -> Self {
        Self::with_retry(store, RetryPolicy::default())
    }

    pub fn with_retry(store: S, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    fn to_document(order: &Order) -> Result<Document, DomainError> {
        Ok(
            Document::from_value(COLLECTION, order.id().to_string(), order)?
                .owned_by(order.user_id().to_string())
                .with_state(Self::state_label(order))
                .created_at(order.created_at()),
        )
    }

    fn state_label(order: &Order) -> &'static str {
        if order.needs_stock_release() {
            AWAITING_STOCK_RELEASE
        } else {
            order.status().as_str()
        }
    }

    fn from_document(document: &Document) -> Result<Order, DomainError> {
        let mut order: Order = document.decode()?;
        order.set_version(document.version);
        Ok(order)
    }

    /// Persists a newly placed order. Fails if the ID is already taken.
    pub async fn insert(&self, order: &mut Order) -> Result<(), DomainError> {
        let version = self
            .store
            .put(Self::to_document(order)?, PutOptions::expect_new())
            .await?;
        order.set_version(version);
        Ok(())
    }

    /// Loads an order by ID.
    pub async fn get(&self, order_id: OrderId) -> Result<Option<Order>, DomainError> {
        match self.store.get(COLLECTION, &order_id.to_string()).await? {
            Some(document) => Ok(Some(Self::from_document(&document)?)),
            None => Ok(None),
        }
    }

    /// Loads an order owned by `user_id`. Other users' orders are reported as not found.
    pub async fn get_for_user(
        &self,
        user_id: UserId,
        order_id: OrderId,
    ) -> Result<Order, DomainError> {
        match self.get(order_id).await? {
            Some(order) if order.user_id() == user_id => Ok(order),
            _ => Err(OrderError::NotFound(order_id).into()),
        }
    }

    /// Lists a user's orders, newest first. `page` is zero-based.
    pub async fn list_for_user(
        &self,
        user_id: UserId,
        page: usize,
        size: usize,
    ) -> Result<Vec<Order>, DomainError> {
        let query = DocumentQuery::collection(COLLECTION)
            .owner(user_id.to_string())
            .newest_first()
            .page(page, size);

        self.store
            .query(query)
            .await?
            .iter()
            .map(Self::from_document)
            .collect()
    }

    /// Lists Pending orders created before `cutoff`, oldest first.
    pub async fn pending_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Order>, DomainError> {
        let query = DocumentQuery::collection(COLLECTION)
            .state(OrderStatus::Pending.as_str())
            .created_before(cutoff);

        self.store
            .query(query)
            .await?
            .iter()
            .map(Self::from_document)
            .collect()
    }

    /// Lists cancelled, unpaid orders whose stock release has not completed.
    pub async fn awaiting_stock_release(&self) -> Result<Vec<Order>, DomainError> {
        let query = DocumentQuery::collection(COLLECTION).state(AWAITING_STOCK_RELEASE);

        self.store
            .query(query)
            .await?
            .iter()
            .map(Self::from_document)
            .collect()
    }

    /// Read-transition-write with optimistic concurrency.
    ///
    /// `transition` is applied to a freshly loaded order on every attempt.
    /// `Unchanged` results skip the write. Version conflicts are retried up
    /// to the policy's attempt limit, then reported as
    /// [`DomainError::ConflictRetriesExhausted`].
    pub async fn update<F>(
        &self,
        order_id: OrderId,
        transition: F,
    ) -> Result<(Order, Transition), DomainError>
    where
        F: Fn(&mut Order) -> Result<Transition, OrderError> + Send + Sync,
    {
        for attempt in 1..=self.retry.max_attempts {
            let mut order = self
                .get(order_id)
                .await?
                .ok_or(OrderError::NotFound(order_id))?;

            let outcome = transition(&mut order)?;
            if !outcome.is_applied() {
                return Ok((order, outcome));
            }

            let expected = order.version();
            match self
                .store
                .put(Self::to_document(&order)?, PutOptions::expect_version(expected))
                .await
            {
                Ok(version) => {
                    order.set_version(version);
                    return Ok((order, outcome));
                }
                Err(StorageError::ConcurrencyConflict { actual, .. }) => {
                    tracing::debug!(
                        order_id = %order_id,
                        attempt,
                        expected = %expected,
                        actual = %actual,
                        "Order version conflict, retrying"
                    );
                    if attempt < self.retry.max_attempts {
                        tokio::time::sleep(self.retry.backoff * attempt).await;
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::warn!(
            order_id = %order_id,
            attempts = self.retry.max_attempts,
            "Order update gave up after repeated version conflicts"
        );
        metrics::counter!("order_conflict_retries_exhausted").increment(1);
        Err(DomainError::ConflictRetriesExhausted {
            order_id,
            attempts: self.retry.max_attempts,
        })
    }
}
