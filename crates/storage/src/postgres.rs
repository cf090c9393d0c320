use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::ProductId;
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{
    ClaimOutcome, Document, DocumentQuery, ProcessedEvent, ProcessedEventStore, ProductRecord,
    Result, StockLedger, StorageError, Version,
    store::{DocumentStore, PutOptions},
};

const DOCUMENT_COLUMNS: &str =
    "collection, key, owner, state, version, created_at, updated_at, body";

/// PostgreSQL-backed storage.
///
/// One pool serves documents, the stock ledger and processed-event records.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to the database at `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        Ok(Self::new(PgPool::connect(url).await?))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        tracing::info!("database migrations applied");
        Ok(())
    }

    fn row_to_document(row: PgRow) -> Result<Document> {
        Ok(Document {
            collection: row.try_get("collection")?,
            key: row.try_get("key")?,
            owner: row.try_get("owner")?,
            state: row.try_get("state")?,
            version: Version::new(row.try_get("version")?),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            body: row.try_get("body")?,
        })
    }

    fn row_to_product(row: PgRow) -> Result<ProductRecord> {
        let available: i64 = row.try_get("available")?;
        Ok(ProductRecord {
            product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
            name: row.try_get("name")?,
            unit_price_cents: row.try_get("unit_price_cents")?,
            available: u32::try_from(available).unwrap_or(u32::MAX),
        })
    }

    async fn current_version(&self, collection: &str, key: &str) -> Result<Version> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM documents WHERE collection = $1 AND key = $2")
                .bind(collection)
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(version.map(Version::new).unwrap_or(Version::initial()))
    }

    async fn conflict(&self, document: Document, expected: Version) -> Result<Version> {
        let actual = self.current_version(&document.collection, &document.key).await?;
        metrics::counter!("storage_conflicts_total").increment(1);
        tracing::debug!(
            collection = %document.collection,
            key = %document.key,
            %expected,
            %actual,
            "document version conflict"
        );
        Err(StorageError::ConcurrencyConflict {
            collection: document.collection,
            key: document.key,
            expected,
            actual,
        })
    }

    async fn available(&self, product_id: &ProductId) -> Result<Option<i64>> {
        Ok(
            sqlx::query_scalar("SELECT available FROM products WHERE product_id = $1")
                .bind(product_id.as_str())
                .fetch_optional(&self.pool)
                .await?,
        )
    }
}

#[async_trait]
impl DocumentStore for PostgresStore {
    async fn put(&self, document: Document, options: PutOptions) -> Result<Version> {
        let now = Utc::now();

        let version: Option<i64> = match options.expected_version {
            Some(expected) if expected == Version::initial() => {
                sqlx::query_scalar(
                    r#"
                    INSERT INTO documents (collection, key, owner, state, version, created_at, updated_at, body)
                    VALUES ($1, $2, $3, $4, 1, $5, $6, $7)
                    ON CONFLICT (collection, key) DO NOTHING
                    RETURNING version
                    "#,
                )
                .bind(&document.collection)
                .bind(&document.key)
                .bind(&document.owner)
                .bind(&document.state)
                .bind(document.created_at)
                .bind(now)
                .bind(&document.body)
                .fetch_optional(&self.pool)
                .await?
            }
            Some(expected) => {
                sqlx::query_scalar(
                    r#"
                    UPDATE documents
                    SET owner = $3, state = $4, version = version + 1, updated_at = $5, body = $6
                    WHERE collection = $1 AND key = $2 AND version = $7
                    RETURNING version
                    "#,
                )
                .bind(&document.collection)
                .bind(&document.key)
                .bind(&document.owner)
                .bind(&document.state)
                .bind(now)
                .bind(&document.body)
                .bind(expected.as_i64())
                .fetch_optional(&self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar(
                    r#"
                    INSERT INTO documents (collection, key, owner, state, version, created_at, updated_at, body)
                    VALUES ($1, $2, $3, $4, 1, $5, $6, $7)
                    ON CONFLICT (collection, key) DO UPDATE SET
                        owner = EXCLUDED.owner,
                        state = EXCLUDED.state,
                        version = documents.version + 1,
                        updated_at = EXCLUDED.updated_at,
                        body = EXCLUDED.body
                    RETURNING version
                    "#,
                )
                .bind(&document.collection)
                .bind(&document.key)
                .bind(&document.owner)
                .bind(&document.state)
                .bind(document.created_at)
                .bind(now)
                .bind(&document.body)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        match version {
            Some(version) => Ok(Version::new(version)),
            None => {
                let expected = options.expected_version.unwrap_or(Version::initial());
                self.conflict(document, expected).await
            }
        }
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Document>> {
        let sql = format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE collection = $1 AND key = $2"
        );
        let row: Option<PgRow> = sqlx::query(&sql)
            .bind(collection)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_document).transpose()
    }

    async fn query(&self, query: DocumentQuery) -> Result<Vec<Document>> {
        let mut sql = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE collection = $1");
        let mut param_count = 1;

        // Build dynamic query
        if query.owner.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND owner = ${param_count}"));
        }
        if query.state.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND state = ${param_count}"));
        }
        if query.created_before.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND created_at < ${param_count}"));
        }

        if query.newest_first {
            sql.push_str(" ORDER BY created_at DESC, key DESC");
        } else {
            sql.push_str(" ORDER BY created_at ASC, key ASC");
        }

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }
        if query.offset.is_some() {
            param_count += 1;
            sql.push_str(&format!(" OFFSET ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql).bind(query.collection);

        if let Some(owner) = query.owner {
            sqlx_query = sqlx_query.bind(owner);
        }
        if let Some(state) = query.state {
            sqlx_query = sqlx_query.bind(state);
        }
        if let Some(before) = query.created_before {
            sqlx_query = sqlx_query.bind(before);
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }
        if let Some(offset) = query.offset {
            sqlx_query = sqlx_query.bind(i64::try_from(offset).unwrap_or(i64::MAX));
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_document).collect()
    }
}

#[async_trait]
impl StockLedger for PostgresStore {
    async fn upsert_product(&self, product: ProductRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO products (product_id, name, unit_price_cents, available)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (product_id) DO UPDATE SET
                name = EXCLUDED.name,
                unit_price_cents = EXCLUDED.unit_price_cents,
                available = EXCLUDED.available
            "#,
        )
        .bind(product.product_id.as_str())
        .bind(&product.name)
        .bind(product.unit_price_cents)
        .bind(i64::from(product.available))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn product(&self, product_id: &ProductId) -> Result<Option<ProductRecord>> {
        let row: Option<PgRow> = sqlx::query(
            "SELECT product_id, name, unit_price_cents, available FROM products WHERE product_id = $1",
        )
        .bind(product_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_product).transpose()
    }

    async fn try_decrement(&self, product_id: &ProductId, quantity: u32) -> Result<u32> {
        // Single conditional UPDATE: concurrent decrements serialize on the row lock
        let remaining: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE products
            SET available = available - $2
            WHERE product_id = $1 AND available >= $2
            RETURNING available
            "#,
        )
        .bind(product_id.as_str())
        .bind(i64::from(quantity))
        .fetch_optional(&self.pool)
        .await?;

        match remaining {
            Some(remaining) => Ok(u32::try_from(remaining).unwrap_or(u32::MAX)),
            None => match self.available(product_id).await? {
                Some(available) => Err(StorageError::InsufficientStock {
                    product_id: product_id.clone(),
                    requested: quantity,
                    available: u32::try_from(available).unwrap_or(u32::MAX),
                }),
                None => Err(StorageError::UnknownProduct(product_id.clone())),
            },
        }
    }

    async fn increment(&self, product_id: &ProductId, quantity: u32) -> Result<u32> {
        let updated: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE products
            SET available = available + $2
            WHERE product_id = $1 AND available + $2 <= 4294967295
            RETURNING available
            "#,
        )
        .bind(product_id.as_str())
        .bind(i64::from(quantity))
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(available) => Ok(u32::try_from(available).unwrap_or(u32::MAX)),
            None => match self.available(product_id).await? {
                Some(_) => Err(StorageError::StockOverflow(product_id.clone())),
                None => Err(StorageError::UnknownProduct(product_id.clone())),
            },
        }
    }
}

#[async_trait]
impl ProcessedEventStore for PostgresStore {
    async fn claim(&self, event: ProcessedEvent) -> Result<ClaimOutcome> {
        // Replaces a lapsed record; a live record leaves no returned row
        let claimed: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO processed_events (event_id, event_type, processed_at, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (event_id) DO UPDATE SET
                event_type = EXCLUDED.event_type,
                processed_at = EXCLUDED.processed_at,
                expires_at = EXCLUDED.expires_at
            WHERE processed_events.expires_at <= $3
            RETURNING event_id
            "#,
        )
        .bind(&event.event_id)
        .bind(&event.event_type)
        .bind(event.processed_at)
        .bind(event.expires_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match claimed {
            Some(_) => ClaimOutcome::Claimed,
            None => ClaimOutcome::AlreadyProcessed,
        })
    }

    async fn release(&self, event_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM processed_events WHERE event_id = $1")
            .bind(event_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM processed_events WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        tracing::debug!(purged = result.rows_affected(), "expired processed events purged");
        Ok(result.rows_affected())
    }
}
