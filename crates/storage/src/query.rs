use chrono::{DateTime, Utc};

/// Builder for constructing document queries.
///
/// Every query targets one collection; the remaining filters are optional.
#[derive(Debug, Clone, Default)]
pub struct DocumentQuery {
    /// Collection to search.
    pub collection: String,

    /// Filter by owner label.
    pub owner: Option<String>,

    /// Filter by state label.
    pub state: Option<String>,

    /// Only documents created strictly before this timestamp.
    pub created_before: Option<DateTime<Utc>>,

    /// Return newest documents first instead of oldest first.
    pub newest_first: bool,

    /// Maximum number of documents to return.
    pub limit: Option<usize>,

    /// Number of documents to skip.
    pub offset: Option<usize>,
}

impl DocumentQuery {
    /// Creates a query over a collection.
    pub fn collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            ..Default::default()
        }
    }

    /// Filters by owner label.
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Filters by state label.
    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    /// Only documents created before the given timestamp.
    pub fn created_before(mut self, timestamp: DateTime<Utc>) -> Self {
        self.created_before = Some(timestamp);
        self
    }

    /// Orders results newest first.
    pub fn newest_first(mut self) -> Self {
        self.newest_first = true;
        self
    }

    /// Limits the number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips a number of results.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Applies `page` (zero-based) and `size` as offset and limit.
    pub fn page(self, page: usize, size: usize) -> Self {
        self.offset(page.saturating_mul(size)).limit(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_builder() {
        let cutoff = Utc::now();
        let query = DocumentQuery::collection("orders")
            .owner("user-1")
            .state("Pending")
            .created_before(cutoff)
            .newest_first()
            .limit(10)
            .offset(5);

        assert_eq!(query.collection, "orders");
        assert_eq!(query.owner.as_deref(), Some("user-1"));
        assert_eq!(query.state.as_deref(), Some("Pending"));
        assert_eq!(query.created_before, Some(cutoff));
        assert!(query.newest_first);
        assert_eq!(query.limit, Some(10));
        assert_eq!(query.offset, Some(5));
    }

    #[test]
    fn test_page_translates_to_offset_and_limit() {
        let query = DocumentQuery::collection("orders").page(2, 20);
        assert_eq!(query.offset, Some(40));
        assert_eq!(query.limit, Some(20));
    }
}
