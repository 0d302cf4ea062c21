use async_trait::async_trait;
use object_store::azure::MicrosoftAzureBuilder;
use serde::{Deserialize, Serialize};

use super::{
    keep_secret, check_listing, require, require_secret, ConnectionContext, Secrets,
    StorageBackend,
};
use crate::errors::StorageError;
use crate::vault::is_encrypted;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AzureAuthMethod {
    ConnectionString,
    #[default]
    AccountKey,
}

/// Azure Blob Storage container.
///
/// `auth_method` picks which credential is used: a full connection string, or an
/// account name plus account key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AzureBlobStorage {
    pub auth_method: AzureAuthMethod,
    pub connection_string: String,
    pub account_name: String,
    pub account_key: String,
    pub container_name: String,
    pub endpoint: String,
    pub prefix: String,
}

/// Parts of an Azure storage connection string the connection check needs.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ConnectionString {
    pub account_name: String,
    pub account_key: String,
    pub blob_endpoint: Option<String>,
}

impl ConnectionString {
    /// Parse `Key=Value;Key=Value` pairs. Values may contain `=` (base64 keys).
    pub fn parse(raw: &str) -> Result<Self, StorageError> {
        let mut parsed = ConnectionString::default();
        let mut protocol = "https".to_string();
        let mut suffix = None;

        for part in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| StorageError::invalid("malformed connection string"))?;
            match key.trim() {
                "AccountName" => parsed.account_name = value.trim().to_string(),
                "AccountKey" => parsed.account_key = value.trim().to_string(),
                "BlobEndpoint" => parsed.blob_endpoint = Some(value.trim().to_string()),
                "EndpointSuffix" => suffix = Some(value.trim().to_string()),
                "DefaultEndpointsProtocol" => protocol = value.trim().to_string(),
                _ => {}
            }
        }

        require(&parsed.account_name, "AccountName in connection string")?;
        require(&parsed.account_key, "AccountKey in connection string")?;

        if parsed.blob_endpoint.is_none() {
            if let Some(suffix) = suffix {
                parsed.blob_endpoint = Some(format!(
                    "{}://{}.blob.{}",
                    protocol, parsed.account_name, suffix
                ));
            }
        }
        Ok(parsed)
    }
}

#[async_trait]
impl StorageBackend for AzureBlobStorage {
    fn sensitive_fields_mut(&mut self) -> Vec<&mut String> {
        vec![&mut self.connection_string, &mut self.account_key]
    }

    fn validate(&self, require_secrets: bool) -> Result<(), StorageError> {
        require(&self.container_name, "container name")?;
        match self.auth_method {
            AzureAuthMethod::ConnectionString => {
                require_secret(&self.connection_string, "connection string", require_secrets)?;
                if !self.connection_string.is_empty() && !is_encrypted(&self.connection_string) {
                    ConnectionString::parse(&self.connection_string)?;
                }
            }
            AzureAuthMethod::AccountKey => {
                require(&self.account_name, "account name")?;
                require_secret(&self.account_key, "account key", require_secrets)?;
            }
        }
        Ok(())
    }

    fn apply_update(&mut self, incoming: Self) {
        self.auth_method = incoming.auth_method;
        self.account_name = incoming.account_name;
        self.container_name = incoming.container_name;
        self.endpoint = incoming.endpoint;
        self.prefix = incoming.prefix;
        keep_secret(&mut self.connection_string, incoming.connection_string);
        keep_secret(&mut self.account_key, incoming.account_key);
    }

    async fn test_connection(
        &self,
        secrets: &Secrets<'_>,
        _ctx: &ConnectionContext,
    ) -> Result<(), StorageError> {
        let (account, key, endpoint) = match self.auth_method {
            AzureAuthMethod::ConnectionString => {
                let parsed = ConnectionString::parse(&secrets.reveal(&self.connection_string)?)
                    .map_err(|e| StorageError::connection(e.to_string()))?;
                (parsed.account_name, parsed.account_key, parsed.blob_endpoint)
            }
            AzureAuthMethod::AccountKey => (
                self.account_name.clone(),
                secrets.reveal(&self.account_key)?,
                (!self.endpoint.is_empty()).then(|| self.endpoint.clone()),
            ),
        };

        let mut builder = MicrosoftAzureBuilder::new()
            .with_account(&account)
            .with_access_key(key)
            .with_container_name(&self.container_name);
        if let Some(endpoint) = endpoint {
            builder = builder
                .with_allow_http(endpoint.starts_with("http://"))
                .with_endpoint(endpoint);
        }

        let store = builder.build().map_err(|e| {
            StorageError::connection(format!("invalid Azure Blob configuration: {}", e))
        })?;

        check_listing(&store, &self.prefix, "Azure Blob container").await?;
        tracing::debug!(account = %account, container = %self.container_name, "Azure Blob connection check succeeded");
        Ok(())
    }
}
