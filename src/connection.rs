use std::sync::Arc;

use crate::backends::{ConnectionContext, Secrets};
use crate::errors::StorageError;
use crate::models::Storage;
use crate::vault::FieldEncryptor;

/// Routes a connection test to the active backend and bounds it in time.
///
/// Checks run against the in-memory record; nothing is persisted here.
pub struct ConnectionTester {
    encryptor: Arc<dyn FieldEncryptor>,
    ctx: ConnectionContext,
}

impl ConnectionTester {
    pub fn new(encryptor: Arc<dyn FieldEncryptor>, ctx: ConnectionContext) -> Self {
        Self { encryptor, ctx }
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.ctx
    }

    pub async fn test(&self, storage: &Storage) -> Result<(), StorageError> {
        let secrets = Secrets::new(self.encryptor.as_ref(), storage.id);
        let check = storage.config.backend().test_connection(&secrets, &self.ctx);

        match tokio::time::timeout(self.ctx.timeout, check).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    storage_type = %storage.storage_type(),
                    timeout_secs = self.ctx.timeout.as_secs(),
                    "connection test timed out"
                );
                Err(StorageError::connection(format!(
                    "connection test timed out after {}s",
                    self.ctx.timeout.as_secs()
                )))
            }
        }
    }
}
