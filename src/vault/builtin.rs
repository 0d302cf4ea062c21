use aes_gcm::{
    aead::{Aead, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use uuid::Uuid;
use zeroize::Zeroizing;

use super::{FieldEncryptor, VaultError, ENCRYPTED_PREFIX};

type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 12;
const KEY_CONTEXT: &[u8] = b"storages/field-key/v1:";

/// AES-256-GCM field encryptor.
///
/// Each entity gets its own key, derived as `HMAC-SHA256(master, context || entity_id)`,
/// and the entity id is also passed as associated data.
///
/// Stored format: `enc:` + base64(nonce || ciphertext || tag).
pub struct AesFieldEncryptor {
    master: Zeroizing<[u8; 32]>,
}

impl AesFieldEncryptor {
    pub fn new(master_key_hex: &str) -> anyhow::Result<Self> {
        let master = parse_master_key(master_key_hex)?;
        Ok(Self {
            master: Zeroizing::new(master),
        })
    }

    fn entity_cipher(&self, entity_id: Uuid) -> Result<Aes256Gcm, VaultError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(self.master.as_slice())
            .map_err(|e| VaultError::InvalidKey(e.to_string()))?;
        mac.update(KEY_CONTEXT);
        mac.update(entity_id.as_bytes());

        let mut derived = Zeroizing::new([0u8; 32]);
        derived.copy_from_slice(&mac.finalize().into_bytes());

        Aes256Gcm::new_from_slice(derived.as_slice())
            .map_err(|e| VaultError::InvalidKey(format!("{:?}", e)))
    }
}

impl FieldEncryptor for AesFieldEncryptor {
    fn encrypt(&self, entity_id: Uuid, plaintext: &str) -> Result<String, VaultError> {
        let cipher = self.entity_cipher(entity_id)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: entity_id.as_bytes(),
                },
            )
            .map_err(|e| VaultError::Encryption(e.to_string()))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);

        Ok(format!(
            "{}{}",
            ENCRYPTED_PREFIX,
            base64::engine::general_purpose::STANDARD.encode(blob)
        ))
    }

    fn decrypt(&self, entity_id: Uuid, ciphertext: &str) -> Result<String, VaultError> {
        let encoded = ciphertext
            .strip_prefix(ENCRYPTED_PREFIX)
            .ok_or_else(|| VaultError::Decryption("value is not encrypted".into()))?;

        let blob = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| VaultError::Decryption(format!("malformed ciphertext: {}", e)))?;
        if blob.len() <= NONCE_LEN {
            return Err(VaultError::Decryption("ciphertext too short".into()));
        }

        let (nonce_bytes, sealed) = blob.split_at(NONCE_LEN);
        let cipher = self.entity_cipher(entity_id)?;
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(
                    Nonce::from_slice(nonce_bytes),
                    Payload {
                        msg: sealed,
                        aad: entity_id.as_bytes(),
                    },
                )
                // wrong entity, wrong key or tampered data all land here
                .map_err(|_| VaultError::Decryption("authentication failed".into()))?,
        );

        String::from_utf8(plaintext.to_vec())
            .map_err(|_| VaultError::Decryption("plaintext is not valid UTF-8".into()))
    }
}

pub fn parse_master_key(hex: &str) -> anyhow::Result<[u8; 32]> {
    if hex.len() != 64 {
        anyhow::bail!(
            "STORAGES_MASTER_KEY must be 64 hex chars (32 bytes), got {} chars",
            hex.len()
        );
    }
    let bytes = hex::decode(hex)?;
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}
