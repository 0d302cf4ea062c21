pub mod builtin;

use thiserror::Error;
use uuid::Uuid;

/// Prefix carried by every encrypted field value at rest.
pub const ENCRYPTED_PREFIX: &str = "enc:";

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("invalid master key: {0}")]
    InvalidKey(String),

    #[error("field encryption failed: {0}")]
    Encryption(String),

    #[error("field decryption failed: {0}")]
    Decryption(String),
}

/// Field-level encryption scoped to an owning entity.
///
/// Implementations bind every ciphertext to `entity_id`, so a value copied onto a
/// different record fails to decrypt. Implementations hold no per-call state and
/// are shared across concurrent requests.
pub trait FieldEncryptor: Send + Sync {
    /// Encrypt `plaintext`, returning a value that starts with [`ENCRYPTED_PREFIX`].
    fn encrypt(&self, entity_id: Uuid, plaintext: &str) -> Result<String, VaultError>;

    /// Decrypt a value previously produced by [`FieldEncryptor::encrypt`].
    fn decrypt(&self, entity_id: Uuid, ciphertext: &str) -> Result<String, VaultError>;
}

/// Whether a stored field value is already ciphertext.
pub fn is_encrypted(value: &str) -> bool {
    value.starts_with(ENCRYPTED_PREFIX)
}
