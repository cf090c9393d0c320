use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Version;

/// A versioned JSON document.
///
/// Documents are addressed by `(collection, key)`. The optional `owner` and
/// `state` labels are denormalized from the body so documents can be queried
/// without deserializing them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Logical collection, e.g. `"orders"` or `"carts"`.
    pub collection: String,

    /// Key unique within the collection.
    pub key: String,

    /// Owning principal, used for per-user listings.
    pub owner: Option<String>,

    /// Status label, used for status queries.
    pub state: Option<String>,

    /// Version of the stored document. Ignored on write; the store assigns it.
    pub version: Version,

    /// When the document was first written.
    pub created_at: DateTime<Utc>,

    /// When the document was last written.
    pub updated_at: DateTime<Utc>,

    /// The document body.
    pub body: serde_json::Value,
}

impl Document {
    /// Creates an unversioned document ready to be written.
    pub fn new(
        collection: impl Into<String>,
        key: impl Into<String>,
        body: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            collection: collection.into(),
            key: key.into(),
            owner: None,
            state: None,
            version: Version::initial(),
            created_at: now,
            updated_at: now,
            body,
        }
    }

    /// Creates a document whose body is serialized from `value`.
    pub fn from_value<T: Serialize>(
        collection: impl Into<String>,
        key: impl Into<String>,
        value: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(collection, key, serde_json::to_value(value)?))
    }

    /// Sets the owner label.
    pub fn owned_by(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Sets the state label.
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    /// Sets the creation timestamp.
    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Deserializes the body.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.body.clone())
    }
}
