use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::StorageRepository;
use crate::models::{Storage, StorageConfig, StorageType};

/// Postgres-backed repository. One row per storage: the discriminator lives in
/// `type`, the active payload in the `config` JSONB column.
///
/// Expected table (schema migrations are owned by the embedding application):
///
/// ```text
/// storages (
///     id              UUID PRIMARY KEY,
///     workspace_id    UUID NOT NULL,
///     type            TEXT NOT NULL,
///     name            TEXT NOT NULL,
///     is_system       BOOLEAN NOT NULL DEFAULT FALSE,
///     last_save_error TEXT,
///     config          JSONB NOT NULL,
///     created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// )
/// ```
#[derive(Clone)]
pub struct PgStorageRepository {
    pool: PgPool,
}

impl PgStorageRepository {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct StorageRow {
    pub id: Uuid,
    pub workspace_id: Uuid,
    #[sqlx(rename = "type")]
    pub storage_type: String,
    pub name: String,
    pub is_system: bool,
    pub last_save_error: Option<String>,
    pub config: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<StorageRow> for Storage {
    type Error = anyhow::Error;

    fn try_from(row: StorageRow) -> anyhow::Result<Self> {
        let kind: StorageType = row
            .storage_type
            .parse()
            .map_err(|e| anyhow::anyhow!("storage {}: {}", row.id, e))?;
        let config = StorageConfig::from_json(kind, row.config)
            .map_err(|e| anyhow::anyhow!("storage {}: corrupt {} config: {}", row.id, kind, e))?;

        Ok(Storage {
            id: Some(row.id),
            workspace_id: row.workspace_id,
            name: row.name,
            is_system: row.is_system,
            last_save_error: row.last_save_error,
            config,
        })
    }
}

const SELECT_COLUMNS: &str =
    "SELECT id, workspace_id, type, name, is_system, last_save_error, config, created_at FROM storages";

#[async_trait]
impl StorageRepository for PgStorageRepository {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<Storage>> {
        let row = sqlx::query_as::<_, StorageRow>(&format!("{} WHERE id = $1", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Storage::try_from).transpose()
    }

    async fn find_by_workspace_id(&self, workspace_id: Uuid) -> anyhow::Result<Vec<Storage>> {
        let rows = sqlx::query_as::<_, StorageRow>(&format!(
            "{} WHERE workspace_id = $1 OR is_system = TRUE ORDER BY name ASC",
            SELECT_COLUMNS
        ))
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Storage::try_from).collect()
    }

    async fn save(&self, storage: &Storage) -> anyhow::Result<()> {
        let id = storage
            .id
            .ok_or_else(|| anyhow::anyhow!("cannot save a storage without an id"))?;
        let config = storage.config.to_json()?;

        sqlx::query(
            r#"INSERT INTO storages (id, workspace_id, type, name, is_system, last_save_error, config)
               VALUES ($1, $2, $3, $4, $5, $6, $7)
               ON CONFLICT (id) DO UPDATE SET
                   workspace_id = EXCLUDED.workspace_id,
                   type = EXCLUDED.type,
                   name = EXCLUDED.name,
                   is_system = EXCLUDED.is_system,
                   last_save_error = EXCLUDED.last_save_error,
                   config = EXCLUDED.config,
                   updated_at = NOW()"#,
        )
        .bind(id)
        .bind(storage.workspace_id)
        .bind(storage.storage_type().as_str())
        .bind(&storage.name)
        .bind(storage.is_system)
        .bind(&storage.last_save_error)
        .bind(config)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM storages WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_last_save_error(&self, id: Uuid, error: Option<&str>) -> anyhow::Result<()> {
        sqlx::query("UPDATE storages SET last_save_error = $2 WHERE id = $1")
            .bind(id)
            .bind(error)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
