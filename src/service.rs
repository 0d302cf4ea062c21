//! Storage lifecycle: save, read, delete, test, transfer.
//!
//! Every permission and constraint check runs before the first write, so a
//! rejected call leaves the repository untouched.

use std::sync::Arc;

use uuid::Uuid;

use crate::audit::AuditLogSink;
use crate::backends::ConnectionContext;
use crate::connection::ConnectionTester;
use crate::errors::{
    AttachmentViolation, PermissionDenied, StorageError, SystemStorageViolation,
};
use crate::models::{Actor, Storage, StorageType, StorageView};
use crate::store::StorageRepository;
use crate::vault::FieldEncryptor;
use crate::workspace::{AttachedDatabaseCounter, WorkspaceAuthorizer};

#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceSettings {
    /// Hosted deployment: local storages are reserved for global admins.
    pub is_cloud: bool,
}

pub struct StorageService {
    repository: Arc<dyn StorageRepository>,
    authorizer: Arc<dyn WorkspaceAuthorizer>,
    audit: Arc<dyn AuditLogSink>,
    encryptor: Arc<dyn FieldEncryptor>,
    attachments: Option<Arc<dyn AttachedDatabaseCounter>>,
    tester: ConnectionTester,
    settings: ServiceSettings,
}

impl StorageService {
    pub fn new(
        repository: Arc<dyn StorageRepository>,
        authorizer: Arc<dyn WorkspaceAuthorizer>,
        audit: Arc<dyn AuditLogSink>,
        encryptor: Arc<dyn FieldEncryptor>,
        connection_ctx: ConnectionContext,
        settings: ServiceSettings,
    ) -> Self {
        let tester = ConnectionTester::new(encryptor.clone(), connection_ctx);
        Self {
            repository,
            authorizer,
            audit,
            encryptor,
            attachments: None,
            tester,
            settings,
        }
    }

    /// The attachment counter lives in the backup-config feature, which depends
    /// on this one, so it is wired after construction.
    pub fn with_attachment_counter(mut self, counter: Arc<dyn AttachedDatabaseCounter>) -> Self {
        self.attachments = Some(counter);
        self
    }

    pub fn connection_context(&self) -> &ConnectionContext {
        self.tester.context()
    }

    pub async fn save_storage(
        &self,
        actor: &Actor,
        workspace_id: Uuid,
        mut storage: Storage,
    ) -> Result<Storage, StorageError> {
        if !self.authorizer.can_manage_storages(workspace_id, actor).await? {
            return Err(PermissionDenied::ManageStorage.into());
        }
        self.check_local_allowed(actor, storage.storage_type())?;
        if storage.is_system && !actor.is_global_admin() {
            return Err(PermissionDenied::ManageStorage.into());
        }

        let Some(id) = storage.id else {
            storage.id = Some(Uuid::new_v4());
            storage.workspace_id = workspace_id;
            storage.last_save_error = None;

            storage.validate(true)?;
            storage.encrypt_sensitive_data(self.encryptor.as_ref())?;
            self.repository.save(&storage).await?;

            tracing::info!(storage_id = ?storage.id, workspace_id = %workspace_id, storage_type = %storage.storage_type(), "storage created");
            self.audit.write_audit_log(
                &format!("Storage created: {}", storage.name),
                Some(actor.id),
                Some(workspace_id),
            );
            return Ok(storage);
        };

        let mut existing = self
            .repository
            .find_by_id(id)
            .await?
            .ok_or(StorageError::NotFound)?;
        if existing.workspace_id != workspace_id {
            return Err(StorageError::NotInWorkspace);
        }
        if existing.is_system && !storage.is_system {
            return Err(SystemStorageViolation::CannotBeMadePrivate.into());
        }

        if existing.apply_update(storage) {
            tracing::debug!(storage_id = %id, storage_type = ?existing.storage_type(), "storage backend type changed");
        }
        // retained secrets are ciphertext, so only a missing credential fails here
        existing.validate(true)?;
        existing.encrypt_sensitive_data(self.encryptor.as_ref())?;
        self.repository.save(&existing).await?;

        tracing::info!(storage_id = %id, workspace_id = %workspace_id, "storage updated");
        self.audit.write_audit_log(
            &format!("Storage updated: {}", existing.name),
            Some(actor.id),
            Some(workspace_id),
        );
        Ok(existing)
    }

    pub async fn delete_storage(&self, actor: &Actor, storage_id: Uuid) -> Result<(), StorageError> {
        let storage = self.load(storage_id).await?;

        if !self
            .authorizer
            .can_manage_storages(storage.workspace_id, actor)
            .await?
        {
            return Err(PermissionDenied::ManageStorage.into());
        }
        if storage.is_system && !actor.is_global_admin() {
            return Err(PermissionDenied::ManageStorage.into());
        }

        if !self.attached_database_ids(storage_id).await?.is_empty() {
            return Err(AttachmentViolation::CannotDelete.into());
        }

        self.repository.delete(storage_id).await?;

        tracing::info!(storage_id = %storage_id, workspace_id = %storage.workspace_id, "storage deleted");
        self.audit.write_audit_log(
            &format!("Storage deleted: {}", storage.name),
            Some(actor.id),
            Some(storage.workspace_id),
        );
        Ok(())
    }

    /// Read one storage, redacted for `actor`.
    ///
    /// System storages are readable from every workspace.
    pub async fn get_storage(&self, actor: &Actor, id: Uuid) -> Result<StorageView, StorageError> {
        let storage = self.load(id).await?;

        if !storage.is_system {
            let (can_view, _) = self
                .authorizer
                .can_view_workspace(storage.workspace_id, actor)
                .await?;
            if !can_view {
                return Err(PermissionDenied::ViewStorage.into());
            }
        }

        Ok(self.redact(storage, actor))
    }

    pub async fn get_storages(
        &self,
        actor: &Actor,
        workspace_id: Uuid,
    ) -> Result<Vec<StorageView>, StorageError> {
        let (can_view, _) = self
            .authorizer
            .can_view_workspace(workspace_id, actor)
            .await?;
        if !can_view {
            return Err(PermissionDenied::ViewStorages.into());
        }

        let storages = self.repository.find_by_workspace_id(workspace_id).await?;
        Ok(storages
            .into_iter()
            .map(|storage| self.redact(storage, actor))
            .collect())
    }

    /// Probe a persisted storage and record the outcome in `last_save_error`.
    pub async fn test_storage_connection(
        &self,
        actor: &Actor,
        storage_id: Uuid,
    ) -> Result<(), StorageError> {
        let storage = self.load(storage_id).await?;

        let (can_view, _) = self
            .authorizer
            .can_view_workspace(storage.workspace_id, actor)
            .await?;
        if !can_view {
            return Err(PermissionDenied::TestStorage.into());
        }

        match self.tester.test(&storage).await {
            Ok(()) => {
                self.repository.set_last_save_error(storage_id, None).await?;
                tracing::info!(storage_id = %storage_id, "storage connection test succeeded");
                Ok(())
            }
            Err(StorageError::ConnectionFailed(reason)) => {
                tracing::warn!(storage_id = %storage_id, reason = %reason, "storage connection test failed");
                self.repository
                    .set_last_save_error(storage_id, Some(&reason))
                    .await?;
                Err(StorageError::ConnectionFailed(reason))
            }
            Err(e) => Err(e),
        }
    }

    /// Probe a caller-supplied storage without persisting anything.
    ///
    /// When the payload names an existing storage, it is merged onto the stored
    /// record first so omitted secrets fall back to the saved ones.
    pub async fn test_storage_connection_direct(
        &self,
        actor: &Actor,
        storage: Storage,
    ) -> Result<(), StorageError> {
        self.check_local_allowed(actor, storage.storage_type())?;

        let (can_view, _) = self
            .authorizer
            .can_view_workspace(storage.workspace_id, actor)
            .await?;
        if !can_view {
            return Err(PermissionDenied::TestStorage.into());
        }

        let candidate = match storage.id {
            Some(id) => {
                let mut existing = self.load(id).await?;
                if existing.workspace_id != storage.workspace_id {
                    return Err(StorageError::NotInWorkspace);
                }
                existing.apply_update(storage);
                existing.validate(true)?;
                existing
            }
            None => {
                storage.validate(true)?;
                storage
            }
        };

        let result = self.tester.test(&candidate).await;
        if let Err(StorageError::ConnectionFailed(reason)) = &result {
            tracing::warn!(workspace_id = %candidate.workspace_id, reason = %reason, "direct connection test failed");
        }
        result
    }

    /// Unprivileged lookup for internal callers such as the backup engine.
    /// Secrets stay encrypted.
    pub async fn get_storage_by_id(&self, id: Uuid) -> Result<Storage, StorageError> {
        self.load(id).await
    }

    pub async fn transfer_storage_to_workspace(
        &self,
        actor: &Actor,
        storage_id: Uuid,
        target_workspace_id: Uuid,
        single_database_id: Option<Uuid>,
    ) -> Result<(), StorageError> {
        let mut storage = self.load(storage_id).await?;

        if storage.is_system {
            return Err(SystemStorageViolation::CannotBeTransferred.into());
        }
        if !self
            .authorizer
            .can_manage_storages(storage.workspace_id, actor)
            .await?
        {
            return Err(PermissionDenied::SourceWorkspace.into());
        }
        if !self
            .authorizer
            .can_manage_storages(target_workspace_id, actor)
            .await?
        {
            return Err(PermissionDenied::TargetWorkspace.into());
        }

        let attached = self.attached_database_ids(storage_id).await?;
        match single_database_id {
            Some(moving) => {
                if attached.iter().any(|id| *id != moving) {
                    return Err(AttachmentViolation::OtherDatabasesAttached.into());
                }
            }
            None => {
                if !attached.is_empty() {
                    return Err(AttachmentViolation::CannotTransfer.into());
                }
            }
        }

        let source_workspace_id = storage.workspace_id;
        storage.workspace_id = target_workspace_id;
        self.repository.save(&storage).await?;

        tracing::info!(
            storage_id = %storage_id,
            from = %source_workspace_id,
            to = %target_workspace_id,
            "storage transferred"
        );
        self.audit.write_audit_log(
            &format!(
                "Storage transferred: {} from workspace {} to workspace {}",
                storage.name, source_workspace_id, target_workspace_id
            ),
            Some(actor.id),
            Some(target_workspace_id),
        );
        Ok(())
    }

    /// Remove a workspace's storages ahead of the workspace itself.
    ///
    /// Fails without deleting anything if the workspace owns a system storage.
    pub async fn on_before_workspace_deletion(&self, workspace_id: Uuid) -> Result<(), StorageError> {
        let storages = self.repository.find_by_workspace_id(workspace_id).await?;

        if storages
            .iter()
            .any(|s| s.is_system && s.workspace_id == workspace_id)
        {
            return Err(SystemStorageViolation::BlocksWorkspaceDeletion.into());
        }

        for storage in storages {
            if storage.workspace_id != workspace_id {
                continue;
            }
            let Some(id) = storage.id else { continue };
            self.repository.delete(id).await?;
            tracing::info!(storage_id = %id, workspace_id = %workspace_id, "storage removed with workspace");
        }
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<Storage, StorageError> {
        self.repository
            .find_by_id(id)
            .await?
            .ok_or(StorageError::NotFound)
    }

    async fn attached_database_ids(&self, storage_id: Uuid) -> Result<Vec<Uuid>, StorageError> {
        let counter = self.attachments.as_ref().ok_or_else(|| {
            StorageError::Internal(anyhow::anyhow!("attachment counter is not configured"))
        })?;
        Ok(counter.attached_database_ids(storage_id).await?)
    }

    fn check_local_allowed(&self, actor: &Actor, kind: StorageType) -> Result<(), StorageError> {
        if self.settings.is_cloud && kind == StorageType::Local && !actor.is_global_admin() {
            return Err(PermissionDenied::LocalStorageInCloudMode.into());
        }
        Ok(())
    }

    fn redact(&self, storage: Storage, actor: &Actor) -> StorageView {
        let conceal = storage.is_system && !actor.is_global_admin();
        storage.into_view(conceal)
    }
}
