use async_trait::async_trait;

use crate::{Document, DocumentQuery, Result, Version};

/// Options for writing a document.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// Expected version of the stored document for optimistic concurrency control.
    /// If None, the write is unconditional (use with caution).
    pub expected_version: Option<Version>,
}

impl PutOptions {
    /// Creates options with no version check.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates options expecting the document to be at a specific version.
    pub fn expect_version(version: Version) -> Self {
        Self {
            expected_version: Some(version),
        }
    }

    /// Creates options expecting the document to not exist yet.
    pub fn expect_new() -> Self {
        Self {
            expected_version: Some(Version::initial()),
        }
    }
}

/// Versioned key/document store.
///
/// Every successful write bumps the document version by one. Conditional
/// writes fail with `ConcurrencyConflict` when the stored version differs
/// from `options.expected_version`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Writes a document and returns its new version.
    ///
    /// `created_at` is preserved from the stored document on update.
    async fn put(&self, document: Document, options: PutOptions) -> Result<Version>;

    /// Reads a document by collection and key.
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Document>>;

    /// Retrieves documents matching a query.
    ///
    /// Results are ordered by creation time, oldest first unless the query
    /// asks for newest first.
    async fn query(&self, query: DocumentQuery) -> Result<Vec<Document>>;
}

/// Extension trait providing typed helpers for document stores.
#[async_trait]
pub trait DocumentStoreExt: DocumentStore {
    /// Reads and decodes a document body, returning it with its version.
    async fn load<T>(&self, collection: &str, key: &str) -> Result<Option<(T, Version)>>
    where
        T: serde::de::DeserializeOwned + Send,
    {
        match self.get(collection, key).await? {
            Some(doc) => Ok(Some((doc.decode()?, doc.version))),
            None => Ok(None),
        }
    }
}

// Blanket implementation for all DocumentStore implementations
impl<T: DocumentStore + ?Sized> DocumentStoreExt for T {}
