use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::{
    Document, DocumentQuery, Result, StorageError, Version,
    store::{DocumentStore, PutOptions},
};

/// In-memory document store implementation for testing.
///
/// This implementation keeps all documents in memory and provides
/// the same interface as the PostgreSQL implementation.
#[derive(Clone, Default)]
pub struct InMemoryDocumentStore {
    documents: Arc<RwLock<HashMap<(String, String), Document>>>,
}

impl InMemoryDocumentStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of documents stored.
    pub async fn document_count(&self) -> usize {
        self.documents.read().await.len()
    }

    /// Clears all documents.
    pub async fn clear(&self) {
        self.documents.write().await.clear();
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn put(&self, mut document: Document, options: PutOptions) -> Result<Version> {
        let mut store = self.documents.write().await;
        let id = (document.collection.clone(), document.key.clone());

        let existing = store.get(&id);
        let current_version = existing.map(|d| d.version).unwrap_or(Version::initial());

        if let Some(expected) = options.expected_version
            && current_version != expected
        {
            metrics::counter!("storage_conflicts_total").increment(1);
            return Err(StorageError::ConcurrencyConflict {
                collection: document.collection,
                key: document.key,
                expected,
                actual: current_version,
            });
        }

        if let Some(existing) = existing {
            document.created_at = existing.created_at;
        }
        document.version = current_version.next();
        document.updated_at = Utc::now();

        let version = document.version;
        store.insert(id, document);
        Ok(version)
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Document>> {
        let store = self.documents.read().await;
        Ok(store
            .get(&(collection.to_string(), key.to_string()))
            .cloned())
    }

    async fn query(&self, query: DocumentQuery) -> Result<Vec<Document>> {
        let store = self.documents.read().await;
        let mut documents: Vec<_> = store
            .values()
            .filter(|d| {
                if d.collection != query.collection {
                    return false;
                }
                if let Some(ref owner) = query.owner
                    && d.owner.as_ref() != Some(owner)
                {
                    return false;
                }
                if let Some(ref state) = query.state
                    && d.state.as_ref() != Some(state)
                {
                    return false;
                }
                if let Some(before) = query.created_before
                    && d.created_at >= before
                {
                    return false;
                }
                true
            })
            .cloned()
            .collect();

        // Sort by creation time then key for a stable order
        documents.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.key.cmp(&b.key)));
        if query.newest_first {
            documents.reverse();
        }

        let offset = query.offset.unwrap_or(0);
        let documents = documents
            .into_iter()
            .skip(offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .collect();

        Ok(documents)
    }
}
