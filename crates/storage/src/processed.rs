use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::Result;

/// Record of an external event that has been claimed for processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedEvent {
    pub event_id: String,
    pub event_type: String,
    pub processed_at: DateTime<Utc>,
    /// After this instant the record no longer blocks a replay of the event.
    pub expires_at: DateTime<Utc>,
}

impl ProcessedEvent {
    /// Creates a record processed now and retained for `retention`.
    pub fn new(
        event_id: impl Into<String>,
        event_type: impl Into<String>,
        retention: Duration,
    ) -> Self {
        let processed_at = Utc::now();
        let retention =
            chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
        let expires_at = processed_at
            .checked_add_signed(retention)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            event_id: event_id.into(),
            event_type: event_type.into(),
            processed_at,
            expires_at,
        }
    }

    /// Returns true if the record has lapsed at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Result of claiming an event ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The caller owns the event and must process it.
    Claimed,
    /// A live record already exists; the event was seen before.
    AlreadyProcessed,
}

/// Idempotency records for externally delivered events, keyed by event ID.
///
/// Records expire after a retention window so the store does not grow
/// without bound.
#[async_trait]
pub trait ProcessedEventStore: Send + Sync {
    /// Atomically inserts the record unless a live one exists for the same ID.
    ///
    /// An expired record is replaced.
    async fn claim(&self, event: ProcessedEvent) -> Result<ClaimOutcome>;

    /// Removes a claim so the event can be retried.
    async fn release(&self, event_id: &str) -> Result<()>;

    /// Deletes records that expired at or before `now`. Returns how many were removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// In-memory processed-event store.
#[derive(Clone, Default)]
pub struct InMemoryProcessedEventStore {
    records: Arc<RwLock<HashMap<String, ProcessedEvent>>>,
}

impl InMemoryProcessedEventStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of retained records, expired or not.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Returns true if no records are retained.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl ProcessedEventStore for InMemoryProcessedEventStore {
    async fn claim(&self, event: ProcessedEvent) -> Result<ClaimOutcome> {
        let mut records = self.records.write().await;
        let now = Utc::now();

        if let Some(existing) = records.get(&event.event_id)
            && !existing.is_expired(now)
        {
            return Ok(ClaimOutcome::AlreadyProcessed);
        }

        records.insert(event.event_id.clone(), event);
        Ok(ClaimOutcome::Claimed)
    }

    async fn release(&self, event_id: &str) -> Result<()> {
        self.records.write().await.remove(event_id);
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| !record.is_expired(now));
        Ok((before - records.len()) as u64)
    }
}
