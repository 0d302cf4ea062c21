use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backends::{
    AzureBlobStorage, FtpStorage, GoogleDriveStorage, LocalStorage, NasStorage, RcloneStorage,
    S3Storage, SftpStorage, StorageBackend,
};
use crate::errors::StorageError;
use crate::vault::FieldEncryptor;

/// Discriminator selecting the active backend payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageType {
    Local,
    S3,
    Nas,
    AzureBlob,
    Ftp,
    Sftp,
    GoogleDrive,
    Rclone,
}

impl StorageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageType::Local => "LOCAL",
            StorageType::S3 => "S3",
            StorageType::Nas => "NAS",
            StorageType::AzureBlob => "AZURE_BLOB",
            StorageType::Ftp => "FTP",
            StorageType::Sftp => "SFTP",
            StorageType::GoogleDrive => "GOOGLE_DRIVE",
            StorageType::Rclone => "RCLONE",
        }
    }

    /// JSON key of the payload matching this type in [`StorageView`].
    pub fn payload_key(&self) -> &'static str {
        match self {
            StorageType::Local => "localStorage",
            StorageType::S3 => "s3Storage",
            StorageType::Nas => "nasStorage",
            StorageType::AzureBlob => "azureBlobStorage",
            StorageType::Ftp => "ftpStorage",
            StorageType::Sftp => "sftpStorage",
            StorageType::GoogleDrive => "googleDriveStorage",
            StorageType::Rclone => "rcloneStorage",
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageType {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOCAL" => Ok(StorageType::Local),
            "S3" => Ok(StorageType::S3),
            "NAS" => Ok(StorageType::Nas),
            "AZURE_BLOB" => Ok(StorageType::AzureBlob),
            "FTP" => Ok(StorageType::Ftp),
            "SFTP" => Ok(StorageType::Sftp),
            "GOOGLE_DRIVE" => Ok(StorageType::GoogleDrive),
            "RCLONE" => Ok(StorageType::Rclone),
            other => Err(StorageError::invalid(format!("unknown storage type '{}'", other))),
        }
    }
}

/// The backend-specific configuration. Exactly one variant is ever active.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageConfig {
    Local(LocalStorage),
    S3(S3Storage),
    Nas(NasStorage),
    AzureBlob(AzureBlobStorage),
    Ftp(FtpStorage),
    Sftp(SftpStorage),
    GoogleDrive(GoogleDriveStorage),
    Rclone(RcloneStorage),
}

impl StorageConfig {
    pub fn storage_type(&self) -> StorageType {
        match self {
            StorageConfig::Local(_) => StorageType::Local,
            StorageConfig::S3(_) => StorageType::S3,
            StorageConfig::Nas(_) => StorageType::Nas,
            StorageConfig::AzureBlob(_) => StorageType::AzureBlob,
            StorageConfig::Ftp(_) => StorageType::Ftp,
            StorageConfig::Sftp(_) => StorageType::Sftp,
            StorageConfig::GoogleDrive(_) => StorageType::GoogleDrive,
            StorageConfig::Rclone(_) => StorageType::Rclone,
        }
    }

    pub fn backend(&self) -> &dyn StorageBackend {
        match self {
            StorageConfig::Local(c) => c,
            StorageConfig::S3(c) => c,
            StorageConfig::Nas(c) => c,
            StorageConfig::AzureBlob(c) => c,
            StorageConfig::Ftp(c) => c,
            StorageConfig::Sftp(c) => c,
            StorageConfig::GoogleDrive(c) => c,
            StorageConfig::Rclone(c) => c,
        }
    }

    pub fn backend_mut(&mut self) -> &mut dyn StorageBackend {
        match self {
            StorageConfig::Local(c) => c,
            StorageConfig::S3(c) => c,
            StorageConfig::Nas(c) => c,
            StorageConfig::AzureBlob(c) => c,
            StorageConfig::Ftp(c) => c,
            StorageConfig::Sftp(c) => c,
            StorageConfig::GoogleDrive(c) => c,
            StorageConfig::Rclone(c) => c,
        }
    }

    /// Merge `incoming` into this payload.
    ///
    /// Same type: non-sensitive fields are copied and secrets are kept unless the
    /// incoming value is non-empty. Different type: the payload is replaced
    /// wholesale. Returns `true` in the replacement case.
    pub fn apply_update(&mut self, incoming: StorageConfig) -> bool {
        match (self, incoming) {
            (StorageConfig::Local(cur), StorageConfig::Local(new)) => cur.apply_update(new),
            (StorageConfig::S3(cur), StorageConfig::S3(new)) => cur.apply_update(new),
            (StorageConfig::Nas(cur), StorageConfig::Nas(new)) => cur.apply_update(new),
            (StorageConfig::AzureBlob(cur), StorageConfig::AzureBlob(new)) => cur.apply_update(new),
            (StorageConfig::Ftp(cur), StorageConfig::Ftp(new)) => cur.apply_update(new),
            (StorageConfig::Sftp(cur), StorageConfig::Sftp(new)) => cur.apply_update(new),
            (StorageConfig::GoogleDrive(cur), StorageConfig::GoogleDrive(new)) => {
                cur.apply_update(new)
            }
            (StorageConfig::Rclone(cur), StorageConfig::Rclone(new)) => cur.apply_update(new),
            (current, replacement) => {
                *current = replacement;
                return true;
            }
        }
        false
    }

    /// Payload as stored in the JSON column, without the discriminator.
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            StorageConfig::Local(c) => serde_json::to_value(c),
            StorageConfig::S3(c) => serde_json::to_value(c),
            StorageConfig::Nas(c) => serde_json::to_value(c),
            StorageConfig::AzureBlob(c) => serde_json::to_value(c),
            StorageConfig::Ftp(c) => serde_json::to_value(c),
            StorageConfig::Sftp(c) => serde_json::to_value(c),
            StorageConfig::GoogleDrive(c) => serde_json::to_value(c),
            StorageConfig::Rclone(c) => serde_json::to_value(c),
        }
    }

    pub fn from_json(kind: StorageType, value: serde_json::Value) -> serde_json::Result<Self> {
        Ok(match kind {
            StorageType::Local => StorageConfig::Local(serde_json::from_value(value)?),
            StorageType::S3 => StorageConfig::S3(serde_json::from_value(value)?),
            StorageType::Nas => StorageConfig::Nas(serde_json::from_value(value)?),
            StorageType::AzureBlob => StorageConfig::AzureBlob(serde_json::from_value(value)?),
            StorageType::Ftp => StorageConfig::Ftp(serde_json::from_value(value)?),
            StorageType::Sftp => StorageConfig::Sftp(serde_json::from_value(value)?),
            StorageType::GoogleDrive => StorageConfig::GoogleDrive(serde_json::from_value(value)?),
            StorageType::Rclone => StorageConfig::Rclone(serde_json::from_value(value)?),
        })
    }
}

/// A backup destination owned by a workspace.
///
/// Serializes through [`StorageView`], so the wire format carries a `type`
/// discriminator and one nullable key per backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StorageView", into = "StorageView")]
pub struct Storage {
    /// `None` until first persisted.
    pub id: Option<Uuid>,
    pub workspace_id: Uuid,
    pub name: String,
    pub is_system: bool,
    pub last_save_error: Option<String>,
    pub config: StorageConfig,
}

impl Storage {
    pub fn new(workspace_id: Uuid, name: impl Into<String>, config: StorageConfig) -> Self {
        Self {
            id: None,
            workspace_id,
            name: name.into(),
            is_system: false,
            last_save_error: None,
            config,
        }
    }

    pub fn storage_type(&self) -> StorageType {
        self.config.storage_type()
    }

    /// `require_secrets` is set for records without prior persisted secrets.
    pub fn validate(&self, require_secrets: bool) -> Result<(), StorageError> {
        if self.name.trim().is_empty() {
            return Err(StorageError::invalid("name is required"));
        }
        self.config.backend().validate(require_secrets)
    }

    pub fn encrypt_sensitive_data(&mut self, encryptor: &dyn FieldEncryptor) -> Result<(), StorageError> {
        let id = self.id.ok_or_else(|| {
            StorageError::Encryption("storage id must be assigned before encrypting".into())
        })?;
        self.config.backend_mut().encrypt_sensitive_data(encryptor, id)
    }

    pub fn hide_sensitive_data(&mut self) {
        self.config.backend_mut().hide_sensitive_data();
    }

    /// Copy the user-editable fields of `incoming` onto this record.
    ///
    /// Identity, ownership and `last_save_error` are left alone. Returns `true`
    /// when the backend type changed and the payload was replaced.
    pub fn apply_update(&mut self, incoming: Storage) -> bool {
        self.name = incoming.name;
        self.is_system = incoming.is_system;
        self.config.apply_update(incoming.config)
    }

    /// Redacted wire representation. Secrets are always blanked; with
    /// `conceal_payload` the whole backend payload is dropped as well.
    pub fn into_view(mut self, conceal_payload: bool) -> StorageView {
        self.hide_sensitive_data();
        let mut view = StorageView::from(self);
        if conceal_payload {
            view.conceal_payload();
        }
        view
    }
}

/// Wire shape of a storage: a `type` discriminator plus one nullable payload per
/// backend kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageView {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub workspace_id: Uuid,
    #[serde(rename = "type")]
    pub storage_type: StorageType,
    pub name: String,
    #[serde(default)]
    pub is_system: bool,
    #[serde(default)]
    pub last_save_error: Option<String>,

    #[serde(default)]
    pub local_storage: Option<LocalStorage>,
    #[serde(default)]
    pub s3_storage: Option<S3Storage>,
    #[serde(default)]
    pub nas_storage: Option<NasStorage>,
    #[serde(default)]
    pub azure_blob_storage: Option<AzureBlobStorage>,
    #[serde(default)]
    pub ftp_storage: Option<FtpStorage>,
    #[serde(default)]
    pub sftp_storage: Option<SftpStorage>,
    #[serde(default)]
    pub google_drive_storage: Option<GoogleDriveStorage>,
    #[serde(default)]
    pub rclone_storage: Option<RcloneStorage>,
}

impl StorageView {
    pub fn conceal_payload(&mut self) {
        self.local_storage = None;
        self.s3_storage = None;
        self.nas_storage = None;
        self.azure_blob_storage = None;
        self.ftp_storage = None;
        self.sftp_storage = None;
        self.google_drive_storage = None;
        self.rclone_storage = None;
    }

    fn payload_count(&self) -> usize {
        [
            self.local_storage.is_some(),
            self.s3_storage.is_some(),
            self.nas_storage.is_some(),
            self.azure_blob_storage.is_some(),
            self.ftp_storage.is_some(),
            self.sftp_storage.is_some(),
            self.google_drive_storage.is_some(),
            self.rclone_storage.is_some(),
        ]
        .into_iter()
        .filter(|present| *present)
        .count()
    }
}

impl From<Storage> for StorageView {
    fn from(storage: Storage) -> Self {
        let mut view = StorageView {
            id: storage.id,
            workspace_id: storage.workspace_id,
            storage_type: storage.config.storage_type(),
            name: storage.name,
            is_system: storage.is_system,
            last_save_error: storage.last_save_error,
            local_storage: None,
            s3_storage: None,
            nas_storage: None,
            azure_blob_storage: None,
            ftp_storage: None,
            sftp_storage: None,
            google_drive_storage: None,
            rclone_storage: None,
        };

        match storage.config {
            StorageConfig::Local(c) => view.local_storage = Some(c),
            StorageConfig::S3(c) => view.s3_storage = Some(c),
            StorageConfig::Nas(c) => view.nas_storage = Some(c),
            StorageConfig::AzureBlob(c) => view.azure_blob_storage = Some(c),
            StorageConfig::Ftp(c) => view.ftp_storage = Some(c),
            StorageConfig::Sftp(c) => view.sftp_storage = Some(c),
            StorageConfig::GoogleDrive(c) => view.google_drive_storage = Some(c),
            StorageConfig::Rclone(c) => view.rclone_storage = Some(c),
        }

        view
    }
}

impl TryFrom<StorageView> for Storage {
    type Error = StorageError;

    fn try_from(view: StorageView) -> Result<Self, Self::Error> {
        if view.payload_count() > 1 {
            return Err(StorageError::invalid(
                "only the payload matching the storage type may be set",
            ));
        }

        let kind = view.storage_type;
        let config = match kind {
            StorageType::Local => view.local_storage.map(StorageConfig::Local),
            StorageType::S3 => view.s3_storage.map(StorageConfig::S3),
            StorageType::Nas => view.nas_storage.map(StorageConfig::Nas),
            StorageType::AzureBlob => view.azure_blob_storage.map(StorageConfig::AzureBlob),
            StorageType::Ftp => view.ftp_storage.map(StorageConfig::Ftp),
            StorageType::Sftp => view.sftp_storage.map(StorageConfig::Sftp),
            StorageType::GoogleDrive => view.google_drive_storage.map(StorageConfig::GoogleDrive),
            StorageType::Rclone => view.rclone_storage.map(StorageConfig::Rclone),
        }
        .ok_or_else(|| {
            StorageError::invalid(format!(
                "{} storage requires the '{}' payload",
                kind,
                kind.payload_key()
            ))
        })?;

        Ok(Storage {
            // a nil id means "create"
            id: view.id.filter(|id| !id.is_nil()),
            workspace_id: view.workspace_id,
            name: view.name,
            is_system: view.is_system,
            last_save_error: view.last_save_error,
            config,
        })
    }
}
