//! Workspace-level collaborators consumed by the storage service.

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::models::{Actor, Permission, WorkspaceRole};

/// Answers whether an actor may view or manage storages in a workspace.
#[async_trait]
pub trait WorkspaceAuthorizer: Send + Sync {
    async fn can_manage_storages(&self, workspace_id: Uuid, actor: &Actor) -> anyhow::Result<bool>;

    /// View rights plus the actor's role when they are a member.
    async fn can_view_workspace(
        &self,
        workspace_id: Uuid,
        actor: &Actor,
    ) -> anyhow::Result<(bool, Option<WorkspaceRole>)>;
}

/// Lists the databases whose backup configuration points at a storage.
#[async_trait]
pub trait AttachedDatabaseCounter: Send + Sync {
    async fn attached_database_ids(&self, storage_id: Uuid) -> anyhow::Result<Vec<Uuid>>;
}

/// In-process authorizer over a membership table.
///
/// Global admins may view and manage every workspace.
#[derive(Default)]
pub struct RoleAuthorizer {
    memberships: DashMap<(Uuid, Uuid), WorkspaceRole>,
}

impl RoleAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, workspace_id: Uuid, user_id: Uuid, role: WorkspaceRole) {
        self.memberships.insert((workspace_id, user_id), role);
    }

    pub fn revoke(&self, workspace_id: Uuid, user_id: Uuid) {
        self.memberships.remove(&(workspace_id, user_id));
    }

    pub fn role_of(&self, workspace_id: Uuid, user_id: Uuid) -> Option<WorkspaceRole> {
        self.memberships
            .get(&(workspace_id, user_id))
            .map(|entry| *entry.value())
    }
}

#[async_trait]
impl WorkspaceAuthorizer for RoleAuthorizer {
    async fn can_manage_storages(&self, workspace_id: Uuid, actor: &Actor) -> anyhow::Result<bool> {
        if actor.is_global_admin() {
            return Ok(true);
        }
        Ok(self
            .role_of(workspace_id, actor.id)
            .is_some_and(|role| role.has_permission(Permission::Manage)))
    }

    async fn can_view_workspace(
        &self,
        workspace_id: Uuid,
        actor: &Actor,
    ) -> anyhow::Result<(bool, Option<WorkspaceRole>)> {
        let role = self.role_of(workspace_id, actor.id);
        if actor.is_global_admin() {
            return Ok((true, role));
        }
        Ok((
            role.is_some_and(|r| r.has_permission(Permission::View)),
            role,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_viewer_can_view_but_not_manage() {
        let authz = RoleAuthorizer::new();
        let ws = Uuid::new_v4();
        let viewer = Actor::member(Uuid::new_v4());
        authz.grant(ws, viewer.id, WorkspaceRole::Viewer);

        assert!(!authz.can_manage_storages(ws, &viewer).await.unwrap());
        let (can_view, role) = authz.can_view_workspace(ws, &viewer).await.unwrap();
        assert!(can_view);
        assert_eq!(role, Some(WorkspaceRole::Viewer));
    }

    #[tokio::test]
    async fn test_outsider_has_no_access() {
        let authz = RoleAuthorizer::new();
        let ws = Uuid::new_v4();
        let outsider = Actor::member(Uuid::new_v4());

        assert!(!authz.can_manage_storages(ws, &outsider).await.unwrap());
        assert_eq!(authz.can_view_workspace(ws, &outsider).await.unwrap(), (false, None));
    }

    #[tokio::test]
    async fn test_global_admin_bypasses_membership() {
        let authz = RoleAuthorizer::new();
        let admin = Actor::admin(Uuid::new_v4());
        let ws = Uuid::new_v4();

        assert!(authz.can_manage_storages(ws, &admin).await.unwrap());
        assert!(authz.can_view_workspace(ws, &admin).await.unwrap().0);
    }

    #[tokio::test]
    async fn test_revoke_removes_access() {
        let authz = RoleAuthorizer::new();
        let ws = Uuid::new_v4();
        let member = Actor::member(Uuid::new_v4());
        authz.grant(ws, member.id, WorkspaceRole::Member);
        assert!(authz.can_manage_storages(ws, &member).await.unwrap());

        authz.revoke(ws, member.id);
        assert!(!authz.can_manage_storages(ws, &member).await.unwrap());
    }
}
