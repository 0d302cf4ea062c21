use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ConnectionContext, Secrets, StorageBackend};
use crate::errors::StorageError;

/// Backups written to a directory on the server itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocalStorage {
    /// Sub-directory under the configured local root. Empty means the root.
    pub path: String,
}

impl LocalStorage {
    pub fn resolve(&self, root: &Path) -> PathBuf {
        let relative = self.path.trim_matches('/');
        if relative.is_empty() {
            root.to_path_buf()
        } else {
            root.join(relative)
        }
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    fn sensitive_fields_mut(&mut self) -> Vec<&mut String> {
        Vec::new()
    }

    fn validate(&self, _require_secrets: bool) -> Result<(), StorageError> {
        let escapes = Path::new(self.path.trim_start_matches('/'))
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)));
        if escapes {
            return Err(StorageError::invalid(
                "path must stay inside the local backup directory",
            ));
        }
        Ok(())
    }

    fn apply_update(&mut self, incoming: Self) {
        self.path = incoming.path;
    }

    async fn test_connection(
        &self,
        _secrets: &Secrets<'_>,
        ctx: &ConnectionContext,
    ) -> Result<(), StorageError> {
        let dir = self.resolve(&ctx.local_root);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            StorageError::connection(format!("cannot create directory {}: {}", dir.display(), e))
        })?;

        let marker = dir.join(format!(".storages-check-{}", Uuid::new_v4()));
        tokio::fs::write(&marker, b"check").await.map_err(|e| {
            StorageError::connection(format!("directory {} is not writable: {}", dir.display(), e))
        })?;
        tokio::fs::remove_file(&marker).await.map_err(|e| {
            StorageError::connection(format!("cannot remove check file {}: {}", marker.display(), e))
        })?;

        tracing::debug!(dir = %dir.display(), "local storage check succeeded");
        Ok(())
    }
}
