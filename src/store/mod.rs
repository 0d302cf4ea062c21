pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::Storage;

pub use memory::InMemoryStorageRepository;
pub use postgres::PgStorageRepository;

/// Persistence for storage records.
///
/// Records are stored as given: sensitive fields arrive already encrypted and
/// leave the same way.
#[async_trait]
pub trait StorageRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<Storage>>;

    /// Records owned by `workspace_id` plus every system storage.
    async fn find_by_workspace_id(&self, workspace_id: Uuid) -> anyhow::Result<Vec<Storage>>;

    /// Insert or replace. The record must have an id.
    async fn save(&self, storage: &Storage) -> anyhow::Result<()>;

    async fn delete(&self, id: Uuid) -> anyhow::Result<()>;

    /// Touch only `last_save_error`, leaving concurrent edits to other fields intact.
    async fn set_last_save_error(&self, id: Uuid, error: Option<&str>) -> anyhow::Result<()>;
}
