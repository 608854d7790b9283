use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use sqlx::{PgPool, Row};

use super::VectorStore;
use crate::config::{DistanceMethod, Literal, VectorDbBackend};
use crate::models::CollectionInfo;

/// Stores each collection as its own table with a `vector(N)` column.
#[derive(Clone)]
pub struct PgVectorStore {
    pool: PgPool,
    distance: DistanceMethod,
    index_threshold: i64,
}

/// Collection names are interpolated into DDL, so only plain identifiers are accepted.
pub fn validate_collection_name(name: &str) -> Result<&str> {
    let pattern = Regex::new(r"^[a-z_][a-z0-9_]{0,49}$")?;
    if pattern.is_match(name) {
        Ok(name)
    } else {
        anyhow::bail!("invalid collection name {name:?}")
    }
}

pub fn index_name(collection: &str) -> String {
    format!("{collection}_vector_idx")
}

pub fn operator_class(distance: DistanceMethod) -> &'static str {
    match distance {
        DistanceMethod::Cosine => "vector_cosine_ops",
        DistanceMethod::Dot => "vector_ip_ops",
    }
}

pub fn create_table_sql(collection: &str, vector_size: usize) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {collection} (\
         id BIGSERIAL PRIMARY KEY, \
         text TEXT, \
         vector vector({vector_size}), \
         metadata JSONB NOT NULL DEFAULT '{{}}', \
         chunk_id BIGINT, \
         created_at TIMESTAMPTZ NOT NULL DEFAULT now())"
    )
}

pub fn create_index_sql(collection: &str, distance: DistanceMethod) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS {} ON {collection} USING hnsw (vector {})",
        index_name(collection),
        operator_class(distance)
    )
}

impl PgVectorStore {
    pub fn new(pool: PgPool, distance: DistanceMethod, index_threshold: i64) -> Self {
        Self {
            pool,
            distance,
            index_threshold,
        }
    }

    async fn is_indexed(&self, collection: &str) -> Result<bool> {
        let found: Option<String> = sqlx::query_scalar(
            "SELECT indexname::text FROM pg_indexes WHERE schemaname = current_schema() AND tablename = $1 AND indexname = $2",
        )
        .bind(collection)
        .bind(index_name(collection))
        .fetch_optional(&self.pool)
        .await
        .context("failed to look up pgvector index")?;
        Ok(found.is_some())
    }

    async fn record_count(&self, collection: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {collection}");
        sqlx::query_scalar(&sql)
            .fetch_one(&self.pool)
            .await
            .context("failed to count collection records")
    }

    async fn vector_size(&self, collection: &str) -> Result<Option<usize>> {
        let typmod: Option<i32> = sqlx::query_scalar(
            "SELECT atttypmod FROM pg_attribute WHERE attrelid = to_regclass($1) AND attname = 'vector'",
        )
        .bind(collection)
        .fetch_optional(&self.pool)
        .await
        .context("failed to read vector column dimension")?;

        Ok(typmod.and_then(|t| usize::try_from(t).ok()))
    }
}

#[async_trait]
impl VectorStore for PgVectorStore {
    fn backend(&self) -> VectorDbBackend {
        VectorDbBackend::PgVector
    }

    async fn connect(&self) -> Result<()> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await
            .context("failed to enable the pgvector extension")?;
        tracing::info!("pgvector extension ready");
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r"SELECT tablename::text AS name FROM pg_tables
              WHERE schemaname = current_schema() AND tablename LIKE 'collection\_%'
              ORDER BY tablename",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to list pgvector collections")?;

        Ok(rows.iter().map(|row| row.get("name")).collect())
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        let name = validate_collection_name(name)?;
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM pg_tables WHERE schemaname = current_schema() AND tablename = $1)",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .context("failed to check pgvector collection")?;
        Ok(exists)
    }

    async fn create_collection(&self, name: &str, vector_size: usize, reset: bool) -> Result<bool> {
        let name = validate_collection_name(name)?;
        if vector_size == 0 {
            anyhow::bail!("vector size must be positive");
        }

        if reset {
            self.delete_collection(name).await?;
        }

        if self.collection_exists(name).await? {
            return Ok(false);
        }

        sqlx::query(&create_table_sql(name, vector_size))
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to create collection table {name}"))?;

        tracing::info!(collection = name, vector_size, "created pgvector collection");
        Ok(true)
    }

    async fn collection_info(&self, name: &str) -> Result<CollectionInfo> {
        let name = validate_collection_name(name)?;
        if !self.collection_exists(name).await? {
            return Ok(CollectionInfo {
                name: name.to_string(),
                exists: false,
                vector_size: None,
                distance: None,
                record_count: None,
                indexed: None,
            });
        }

        Ok(CollectionInfo {
            name: name.to_string(),
            exists: true,
            vector_size: self.vector_size(name).await?,
            distance: Some(self.distance.as_str().to_string()),
            record_count: Some(self.record_count(name).await?),
            indexed: Some(self.is_indexed(name).await?),
        })
    }

    async fn delete_collection(&self, name: &str) -> Result<bool> {
        let name = validate_collection_name(name)?;
        if !self.collection_exists(name).await? {
            return Ok(false);
        }

        sqlx::query(&format!("DROP TABLE IF EXISTS {name}"))
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to drop collection table {name}"))?;

        tracing::info!(collection = name, "dropped pgvector collection");
        Ok(true)
    }

    async fn optimize_collection(&self, name: &str) -> Result<bool> {
        let name = validate_collection_name(name)?;
        if !self.collection_exists(name).await? || self.is_indexed(name).await? {
            return Ok(false);
        }

        let count = self.record_count(name).await?;
        if count < self.index_threshold {
            tracing::debug!(
                collection = name,
                count,
                threshold = self.index_threshold,
                "below index threshold, skipping"
            );
            return Ok(false);
        }

        sqlx::query(&create_index_sql(name, self.distance))
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to build hnsw index on {name}"))?;

        tracing::info!(collection = name, count, "built hnsw index");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_generated_collection_names() {
        assert!(validate_collection_name("collection_384_12").is_ok());
        assert!(validate_collection_name("_scratch").is_ok());
    }

    #[test]
    fn rejects_names_unsafe_for_ddl() {
        for name in ["", "Collection_1", "1_collection", "c; DROP TABLE projects", "a-b"] {
            assert!(validate_collection_name(name).is_err(), "{name:?} should be rejected");
        }
        assert!(validate_collection_name(&"x".repeat(51)).is_err());
    }

    #[test]
    fn table_ddl_sizes_vector_column() {
        let sql = create_table_sql("collection_3_1", 3);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS collection_3_1 ("));
        assert!(sql.contains("vector vector(3)"));
        assert!(sql.contains("DEFAULT '{}'"));
    }

    #[test]
    fn index_uses_operator_class_for_distance() {
        assert_eq!(
            create_index_sql("collection_3_1", DistanceMethod::Cosine),
            "CREATE INDEX IF NOT EXISTS collection_3_1_vector_idx ON collection_3_1 USING hnsw (vector vector_cosine_ops)"
        );
        assert!(create_index_sql("collection_3_1", DistanceMethod::Dot).contains("vector_ip_ops"));
    }
}
