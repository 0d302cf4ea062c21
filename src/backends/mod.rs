//! Backend payloads and their capability set.
//!
//! Each backend kind owns one payload struct and implements [`StorageBackend`]
//! for it. [`crate::models::StorageConfig`] dispatches to the active one.

pub mod azure_blob;
pub mod ftp;
pub mod google_drive;
pub mod local;
pub mod nas;
pub mod rclone;
pub mod s3;
pub mod sftp;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use object_store::{path::Path, ObjectStore};
use uuid::Uuid;

use crate::errors::StorageError;
use crate::vault::{is_encrypted, FieldEncryptor};

pub use azure_blob::{AzureAuthMethod, AzureBlobStorage};
pub use ftp::FtpStorage;
pub use google_drive::{GoogleDriveStorage, GoogleToken};
pub use local::LocalStorage;
pub use nas::NasStorage;
pub use rclone::RcloneStorage;
pub use s3::S3Storage;
pub use sftp::SftpStorage;

pub const DEFAULT_GOOGLE_API_BASE: &str = "https://www.googleapis.com";
pub const DEFAULT_GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Environment shared by every connection check.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    /// Directory that local storages resolve their `path` against.
    pub local_root: PathBuf,
    pub google_api_base: String,
    pub google_token_url: String,
    pub rclone_binary: String,
    /// Upper bound on a single check.
    pub timeout: Duration,
    pub http: reqwest::Client,
}

impl Default for ConnectionContext {
    fn default() -> Self {
        Self {
            local_root: std::env::temp_dir().join("storages"),
            google_api_base: DEFAULT_GOOGLE_API_BASE.to_string(),
            google_token_url: DEFAULT_GOOGLE_TOKEN_URL.to_string(),
            rclone_binary: "rclone".to_string(),
            timeout: Duration::from_secs(10),
            http: reqwest::Client::new(),
        }
    }
}

/// Reveals sensitive field values for the duration of a connection check.
///
/// Values carrying the ciphertext marker are decrypted against the owning
/// record; anything else is a fresh plaintext secret and is used as-is.
pub struct Secrets<'a> {
    encryptor: &'a dyn FieldEncryptor,
    entity_id: Option<Uuid>,
}

impl<'a> Secrets<'a> {
    pub fn new(encryptor: &'a dyn FieldEncryptor, entity_id: Option<Uuid>) -> Self {
        Self {
            encryptor,
            entity_id,
        }
    }

    pub fn reveal(&self, value: &str) -> Result<String, StorageError> {
        if !is_encrypted(value) {
            return Ok(value.to_string());
        }
        let entity_id = self.entity_id.ok_or_else(|| {
            StorageError::Decryption("encrypted value on a storage without an id".into())
        })?;
        Ok(self.encryptor.decrypt(entity_id, value)?)
    }
}

/// Capability set every backend payload implements.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Credential-bearing fields, encrypted at rest and blanked on read.
    fn sensitive_fields_mut(&mut self) -> Vec<&mut String>;

    /// Check required fields. Secrets are only required when `require_secrets`
    /// is set; otherwise an empty secret means "keep the stored one".
    fn validate(&self, require_secrets: bool) -> Result<(), StorageError>;

    /// Copy non-sensitive fields from `incoming`, and sensitive ones only when
    /// non-empty.
    fn apply_update(&mut self, incoming: Self)
    where
        Self: Sized;

    /// Reachability and authentication check. Runs under the caller's timeout.
    async fn test_connection(
        &self,
        secrets: &Secrets<'_>,
        ctx: &ConnectionContext,
    ) -> Result<(), StorageError>;

    fn encrypt_sensitive_data(
        &mut self,
        encryptor: &dyn FieldEncryptor,
        entity_id: Uuid,
    ) -> Result<(), StorageError> {
        for field in self.sensitive_fields_mut() {
            if field.is_empty() || is_encrypted(field) {
                continue;
            }
            let sealed = encryptor.encrypt(entity_id, field.as_str())?;
            *field = sealed;
        }
        Ok(())
    }

    fn hide_sensitive_data(&mut self) {
        for field in self.sensitive_fields_mut() {
            field.clear();
        }
    }
}

pub(crate) fn require(value: &str, field: &str) -> Result<(), StorageError> {
    if value.trim().is_empty() {
        return Err(StorageError::invalid(format!("{} is required", field)));
    }
    Ok(())
}

pub(crate) fn require_secret(
    value: &str,
    field: &str,
    require_secrets: bool,
) -> Result<(), StorageError> {
    if require_secrets {
        require(value, field)?;
    }
    Ok(())
}

pub(crate) fn keep_secret(current: &mut String, incoming: String) {
    if !incoming.is_empty() {
        *current = incoming;
    }
}

/// Check an object store by listing one level under `prefix`.
pub(crate) async fn check_listing(
    store: &dyn ObjectStore,
    prefix: &str,
    backend: &str,
) -> Result<(), StorageError> {
    let prefix = prefix.trim_matches('/');
    let path = (!prefix.is_empty()).then(|| Path::from(prefix));
    store
        .list_with_delimiter(path.as_ref())
        .await
        .map_err(|e| StorageError::connection(format!("failed to list {}: {}", backend, e)))?;
    Ok(())
}
