use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::vault::VaultError;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{0}")]
    PermissionDenied(PermissionDenied),

    #[error("storage not found")]
    NotFound,

    #[error("invalid storage configuration: {0}")]
    ValidationFailed(String),

    #[error("storage does not belong to this workspace")]
    NotInWorkspace,

    #[error("{0}")]
    SystemStorage(SystemStorageViolation),

    #[error("{0}")]
    Attachment(AttachmentViolation),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("{0}")]
    ConnectionFailed(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PermissionDenied {
    #[error("insufficient permissions to manage storage in this workspace")]
    ManageStorage,
    #[error("insufficient permissions to view storage in this workspace")]
    ViewStorage,
    #[error("insufficient permissions to view storages in this workspace")]
    ViewStorages,
    #[error("insufficient permissions to test storage in this workspace")]
    TestStorage,
    #[error("insufficient permissions to manage storage in source workspace")]
    SourceWorkspace,
    #[error("insufficient permissions to manage storage in target workspace")]
    TargetWorkspace,
    #[error("local storage can only be managed by administrators in cloud mode")]
    LocalStorageInCloudMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SystemStorageViolation {
    #[error("system storage cannot be changed to non-system")]
    CannotBeMadePrivate,
    #[error("system storage cannot be transferred between workspaces")]
    CannotBeTransferred,
    #[error(
        "system storage cannot be deleted due to workspace deletion, please transfer or remove storage first"
    )]
    BlocksWorkspaceDeletion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AttachmentViolation {
    #[error("storage has attached databases and cannot be deleted")]
    CannotDelete,
    #[error("storage has attached databases and cannot be transferred")]
    CannotTransfer,
    #[error("storage has other attached databases and cannot be transferred")]
    OtherDatabasesAttached,
}

impl From<PermissionDenied> for StorageError {
    fn from(reason: PermissionDenied) -> Self {
        StorageError::PermissionDenied(reason)
    }
}

impl From<SystemStorageViolation> for StorageError {
    fn from(violation: SystemStorageViolation) -> Self {
        StorageError::SystemStorage(violation)
    }
}

impl From<AttachmentViolation> for StorageError {
    fn from(violation: AttachmentViolation) -> Self {
        StorageError::Attachment(violation)
    }
}

impl From<VaultError> for StorageError {
    fn from(e: VaultError) -> Self {
        match e {
            VaultError::Decryption(reason) => StorageError::Decryption(reason),
            VaultError::InvalidKey(reason) | VaultError::Encryption(reason) => {
                StorageError::Encryption(reason)
            }
        }
    }
}

impl StorageError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        StorageError::ValidationFailed(reason.into())
    }

    pub fn connection(reason: impl Into<String>) -> Self {
        StorageError::ConnectionFailed(reason.into())
    }
}

impl IntoResponse for StorageError {
    fn into_response(self) -> Response {
        let (status, error_type, code) = match &self {
            StorageError::PermissionDenied(_) => {
                (StatusCode::FORBIDDEN, "permission_error", "permission_denied")
            }
            StorageError::NotFound => (StatusCode::NOT_FOUND, "not_found_error", "storage_not_found"),
            StorageError::ValidationFailed(_) | StorageError::NotInWorkspace => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "validation_failed",
            ),
            StorageError::SystemStorage(_) => (
                StatusCode::BAD_REQUEST,
                "constraint_error",
                "system_storage_constraint",
            ),
            StorageError::Attachment(_) => (
                StatusCode::BAD_REQUEST,
                "constraint_error",
                "attachment_constraint",
            ),
            StorageError::ConnectionFailed(_) => (
                StatusCode::BAD_REQUEST,
                "connection_error",
                "connection_failed",
            ),
            StorageError::Encryption(_)
            | StorageError::Decryption(_)
            | StorageError::Internal(_) => {
                tracing::error!("Internal error: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                )
            }
        };

        let msg = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        (status, body).into_response()
    }
}
