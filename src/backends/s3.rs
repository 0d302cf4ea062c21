use async_trait::async_trait;
use object_store::aws::AmazonS3Builder;
use serde::{Deserialize, Serialize};

use super::{
    keep_secret, check_listing, require, require_secret, ConnectionContext, Secrets,
    StorageBackend,
};
use crate::errors::StorageError;

/// Amazon S3 or any S3-compatible service (MinIO, R2, Wasabi).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct S3Storage {
    pub s3_bucket: String,
    pub s3_region: String,
    pub s3_access_key: String,
    pub s3_secret_key: String,
    /// Custom endpoint for S3-compatible services. Empty means AWS.
    pub s3_endpoint: String,
    pub s3_prefix: String,
    pub s3_use_virtual_hosted_style: bool,
}

#[async_trait]
impl StorageBackend for S3Storage {
    fn sensitive_fields_mut(&mut self) -> Vec<&mut String> {
        vec![&mut self.s3_access_key, &mut self.s3_secret_key]
    }

    fn validate(&self, require_secrets: bool) -> Result<(), StorageError> {
        require(&self.s3_bucket, "S3 bucket")?;
        require(&self.s3_region, "S3 region")?;
        require_secret(&self.s3_access_key, "S3 access key", require_secrets)?;
        require_secret(&self.s3_secret_key, "S3 secret key", require_secrets)?;

        if !self.s3_endpoint.is_empty() {
            let endpoint = url::Url::parse(&self.s3_endpoint)
                .map_err(|e| StorageError::invalid(format!("invalid S3 endpoint: {}", e)))?;
            if !matches!(endpoint.scheme(), "http" | "https") {
                return Err(StorageError::invalid("S3 endpoint must be an http(s) URL"));
            }
        }
        Ok(())
    }

    fn apply_update(&mut self, incoming: Self) {
        self.s3_bucket = incoming.s3_bucket;
        self.s3_region = incoming.s3_region;
        self.s3_endpoint = incoming.s3_endpoint;
        self.s3_prefix = incoming.s3_prefix;
        self.s3_use_virtual_hosted_style = incoming.s3_use_virtual_hosted_style;
        keep_secret(&mut self.s3_access_key, incoming.s3_access_key);
        keep_secret(&mut self.s3_secret_key, incoming.s3_secret_key);
    }

    async fn test_connection(
        &self,
        secrets: &Secrets<'_>,
        _ctx: &ConnectionContext,
    ) -> Result<(), StorageError> {
        let access_key = secrets.reveal(&self.s3_access_key)?;
        let secret_key = secrets.reveal(&self.s3_secret_key)?;

        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&self.s3_bucket)
            .with_region(&self.s3_region)
            .with_access_key_id(access_key)
            .with_secret_access_key(secret_key)
            .with_virtual_hosted_style_request(self.s3_use_virtual_hosted_style);

        if !self.s3_endpoint.is_empty() {
            builder = builder
                .with_endpoint(&self.s3_endpoint)
                .with_allow_http(self.s3_endpoint.starts_with("http://"));
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::connection(format!("invalid S3 configuration: {}", e)))?;

        check_listing(&store, &self.s3_prefix, "S3 bucket").await?;
        tracing::debug!(bucket = %self.s3_bucket, "S3 connection check succeeded");
        Ok(())
    }
}
