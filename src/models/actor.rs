use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Instance-wide role of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Admin,
    Member,
}

/// The authenticated user on whose behalf an operation runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub role: UserRole,
}

impl Actor {
    pub fn new(id: Uuid, role: UserRole) -> Self {
        Self { id, role }
    }

    pub fn member(id: Uuid) -> Self {
        Self::new(id, UserRole::Member)
    }

    pub fn admin(id: Uuid) -> Self {
        Self::new(id, UserRole::Admin)
    }

    pub fn is_global_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

/// Role of a user inside one workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkspaceRole {
    Owner,
    Admin,
    Member,
    Viewer,
}

/// Permission levels checked against a workspace role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    View,
    Manage,
}

impl WorkspaceRole {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "owner" => Some(WorkspaceRole::Owner),
            "admin" => Some(WorkspaceRole::Admin),
            "member" => Some(WorkspaceRole::Member),
            "viewer" => Some(WorkspaceRole::Viewer),
            _ => None,
        }
    }

    /// Check if this role has the required permission level.
    pub fn has_permission(&self, required: Permission) -> bool {
        match required {
            Permission::View => true, // every member can view
            Permission::Manage => !matches!(self, WorkspaceRole::Viewer),
        }
    }
}
