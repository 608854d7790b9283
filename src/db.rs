use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::bootstrap::{MigrationReport, SchemaMigrator};
use crate::config::DatabaseSettings;
use crate::models::{Asset, AssetConfig, AssetType, NewAsset, Project};

/// Schema migrations under `migrations/`, embedded at compile time.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

pub fn latest_embedded_version() -> Option<i64> {
    MIGRATOR.iter().map(|migration| migration.version).max()
}

pub fn connect_options(settings: &DatabaseSettings) -> PgConnectOptions {
    PgConnectOptions::new()
        .host(&settings.host)
        .port(settings.port)
        .username(&settings.username)
        .password(settings.password.expose())
        .database(&settings.database)
}

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self> {
        let pool = pool_options(settings)
            .connect_with(connect_options(settings))
            .await
            .with_context(|| format!("failed to connect to {}", settings.redacted_url()))?;

        Ok(Self { pool })
    }

    /// Builds the pool without opening a connection; the first query connects.
    pub fn connect_lazy(settings: &DatabaseSettings) -> Self {
        let pool = pool_options(settings).connect_lazy_with(connect_options(settings));
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("database ping failed")?;
        Ok(())
    }

    pub async fn apply_migrations(&self) -> Result<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .context("failed to apply schema migrations")?;
        Ok(())
    }

    pub async fn schema_version(&self) -> Result<Option<i64>> {
        let version = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT MAX(version) FROM _sqlx_migrations WHERE success",
        )
        .fetch_one(&self.pool)
        .await
        .context("failed to read applied schema version")?;

        Ok(version)
    }

    pub async fn get_or_create_project(&self, project_id: i64) -> Result<Project> {
        let row = sqlx::query(
            r#"
            INSERT INTO projects (project_id, project_uuid, created_at, updated_at)
            VALUES ($1, $2, $3, $3)
            ON CONFLICT (project_id) DO UPDATE SET updated_at = EXCLUDED.updated_at
            RETURNING project_id, project_uuid, created_at, updated_at
            "#,
        )
        .bind(project_id)
        .bind(Uuid::new_v4())
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("failed to upsert project {}", project_id))?;

        Ok(row_to_project(row))
    }

    pub async fn get_project(&self, project_id: i64) -> Result<Option<Project>> {
        let row = sqlx::query(
            r#"
            SELECT project_id, project_uuid, created_at, updated_at
            FROM projects
            WHERE project_id = $1
            "#,
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(row_to_project))
    }

    /// Re-uploading under an existing stored name replaces the asset record.
    pub async fn insert_asset(&self, asset: &NewAsset) -> Result<Asset> {
        let now = Utc::now();
        let row = sqlx::query(
            r#"
            INSERT INTO assets (
                asset_uuid, asset_type, asset_name, asset_size, asset_config,
                asset_project_id, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            ON CONFLICT (asset_project_id, asset_name) DO UPDATE SET
                asset_size = EXCLUDED.asset_size,
                asset_config = EXCLUDED.asset_config,
                updated_at = EXCLUDED.updated_at
            RETURNING asset_id, asset_uuid, asset_type, asset_name, asset_size,
                      asset_config, asset_project_id, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(asset.asset_type.as_str())
        .bind(&asset.asset_name)
        .bind(asset.asset_size)
        .bind(Json(&asset.asset_config))
        .bind(asset.asset_project_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("failed to record asset {}", asset.asset_name))?;

        row_to_asset(row)
    }

    pub async fn list_assets(&self, project_id: i64, asset_type: AssetType) -> Result<Vec<Asset>> {
        let rows = sqlx::query(
            r#"
            SELECT asset_id, asset_uuid, asset_type, asset_name, asset_size,
                   asset_config, asset_project_id, created_at, updated_at
            FROM assets
            WHERE asset_project_id = $1 AND asset_type = $2
            ORDER BY asset_id ASC
            "#,
        )
        .bind(project_id)
        .bind(asset_type.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_asset).collect()
    }

    pub async fn get_asset(&self, project_id: i64, asset_name: &str) -> Result<Option<Asset>> {
        let row = sqlx::query(
            r#"
            SELECT asset_id, asset_uuid, asset_type, asset_name, asset_size,
                   asset_config, asset_project_id, created_at, updated_at
            FROM assets
            WHERE asset_project_id = $1 AND asset_name = $2
            "#,
        )
        .bind(project_id)
        .bind(asset_name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_asset).transpose()
    }
}

/// Project and asset persistence as seen by the HTTP handlers.
#[async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn ping(&self) -> Result<()>;

    async fn schema_version(&self) -> Result<Option<i64>>;

    async fn get_or_create_project(&self, project_id: i64) -> Result<Project>;

    async fn get_project(&self, project_id: i64) -> Result<Option<Project>>;

    async fn insert_asset(&self, asset: &NewAsset) -> Result<Asset>;

    async fn list_assets(&self, project_id: i64, asset_type: AssetType) -> Result<Vec<Asset>>;

    async fn get_asset(&self, project_id: i64, asset_name: &str) -> Result<Option<Asset>>;
}

#[async_trait]
impl ProjectRepository for Database {
    async fn ping(&self) -> Result<()> {
        Database::ping(self).await
    }

    async fn schema_version(&self) -> Result<Option<i64>> {
        Database::schema_version(self).await
    }

    async fn get_or_create_project(&self, project_id: i64) -> Result<Project> {
        Database::get_or_create_project(self, project_id).await
    }

    async fn get_project(&self, project_id: i64) -> Result<Option<Project>> {
        Database::get_project(self, project_id).await
    }

    async fn insert_asset(&self, asset: &NewAsset) -> Result<Asset> {
        Database::insert_asset(self, asset).await
    }

    async fn list_assets(&self, project_id: i64, asset_type: AssetType) -> Result<Vec<Asset>> {
        Database::list_assets(self, project_id, asset_type).await
    }

    async fn get_asset(&self, project_id: i64, asset_name: &str) -> Result<Option<Asset>> {
        Database::get_asset(self, project_id, asset_name).await
    }
}

#[async_trait]
impl SchemaMigrator for Database {
    async fn migrate(&self) -> Result<MigrationReport> {
        let before = self.schema_version().await.ok().flatten();
        self.apply_migrations().await?;
        let after = self.schema_version().await?;

        if let Some(latest) = latest_embedded_version() {
            if after.map_or(true, |applied| applied < latest) {
                anyhow::bail!(
                    "schema is at revision {:?} after migrating, expected {}",
                    after,
                    latest
                );
            }
        }

        Ok(MigrationReport {
            previous_version: before,
            current_version: after,
        })
    }
}

fn pool_options(settings: &DatabaseSettings) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(Duration::from_secs(10))
}

fn row_to_project(row: PgRow) -> Project {
    Project {
        project_id: row.get("project_id"),
        project_uuid: row.get("project_uuid"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_asset(row: PgRow) -> Result<Asset> {
    let asset_type: String = row.get("asset_type");
    let asset_type = AssetType::from_db(&asset_type)
        .ok_or_else(|| anyhow::anyhow!("unknown asset type {:?} in assets table", asset_type))?;

    Ok(Asset {
        asset_id: row.get("asset_id"),
        asset_uuid: row.get("asset_uuid"),
        asset_type,
        asset_name: row.get("asset_name"),
        asset_size: row.get("asset_size"),
        asset_config: row.get::<Json<AssetConfig>, _>("asset_config").0,
        asset_project_id: row.get("asset_project_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_migrations_are_ordered() {
        let versions: Vec<i64> = MIGRATOR.iter().map(|m| m.version).collect();
        assert!(!versions.is_empty());
        assert!(versions.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(latest_embedded_version(), versions.last().copied());
    }

    #[test]
    fn assets_migration_follows_projects() {
        let descriptions: Vec<String> = MIGRATOR
            .iter()
            .map(|m| m.description.to_string())
            .collect();
        let projects = descriptions
            .iter()
            .position(|d| d.contains("projects"))
            .unwrap();
        let assets = descriptions
            .iter()
            .position(|d| d.contains("assets"))
            .unwrap();
        assert!(projects < assets);
    }
}
