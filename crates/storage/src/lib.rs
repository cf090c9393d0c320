//! Persistence for the checkout engine.
//!
//! Three stores back the engine:
//!
//! - [`DocumentStore`]: versioned JSON documents with optimistic concurrency
//! - [`StockLedger`]: per-product stock counters with conditional decrement
//! - [`ProcessedEventStore`]: expiring idempotency records for webhook events
//!
//! Each has an in-memory implementation and [`PostgresStore`] implements all three.

pub mod document;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod processed;
pub mod query;
pub mod stock;
pub mod store;
pub mod version;

pub use common::ProductId;
pub use document::Document;
pub use error::{Result, StorageError};
pub use memory::InMemoryDocumentStore;
pub use postgres::PostgresStore;
pub use processed::{ClaimOutcome, InMemoryProcessedEventStore, ProcessedEvent, ProcessedEventStore};
pub use query::DocumentQuery;
pub use stock::{InMemoryStockLedger, ProductRecord, StockLedger};
pub use store::{DocumentStore, DocumentStoreExt, PutOptions};
pub use version::Version;
