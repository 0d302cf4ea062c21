use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use super::StorageRepository;
use crate::models::Storage;

/// Process-local repository, used by tests and embedders without a database.
#[derive(Default)]
pub struct InMemoryStorageRepository {
    rows: DashMap<Uuid, Storage>,
}

impl InMemoryStorageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl StorageRepository for InMemoryStorageRepository {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<Storage>> {
        Ok(self.rows.get(&id).map(|row| row.value().clone()))
    }

    async fn find_by_workspace_id(&self, workspace_id: Uuid) -> anyhow::Result<Vec<Storage>> {
        let mut found: Vec<Storage> = self
            .rows
            .iter()
            .filter(|row| row.workspace_id == workspace_id || row.is_system)
            .map(|row| row.value().clone())
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    async fn save(&self, storage: &Storage) -> anyhow::Result<()> {
        let id = storage
            .id
            .ok_or_else(|| anyhow::anyhow!("cannot save a storage without an id"))?;
        self.rows.insert(id, storage.clone());
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<()> {
        self.rows.remove(&id);
        Ok(())
    }

    async fn set_last_save_error(&self, id: Uuid, error: Option<&str>) -> anyhow::Result<()> {
        if let Some(mut row) = self.rows.get_mut(&id) {
            row.last_save_error = error.map(str::to_string);
        }
        Ok(())
    }
}
