use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::Disconnect;
use russh_keys::key::{KeyPair, PublicKey};
use russh_sftp::client::SftpSession;
use serde::{Deserialize, Serialize};

use super::{keep_secret, require, ConnectionContext, Secrets, StorageBackend};
use crate::errors::StorageError;
use crate::vault::is_encrypted;

/// SFTP over SSH, with password or private-key authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SftpStorage {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub private_key: String,
    pub skip_host_key_verify: bool,
    pub path: String,
}

impl Default for SftpStorage {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 22,
            username: String::new(),
            password: String::new(),
            private_key: String::new(),
            skip_host_key_verify: false,
            path: String::new(),
        }
    }
}

fn check_private_key(key: &str) -> Result<(), StorageError> {
    let key = key.trim();
    if key.starts_with("-----BEGIN ") && key.contains("PRIVATE KEY-----") {
        return Ok(());
    }
    Err(StorageError::invalid(
        "private key must be a PEM or OpenSSH private key",
    ))
}

#[async_trait]
impl StorageBackend for SftpStorage {
    fn sensitive_fields_mut(&mut self) -> Vec<&mut String> {
        vec![&mut self.password, &mut self.private_key]
    }

    fn validate(&self, require_secrets: bool) -> Result<(), StorageError> {
        require(&self.host, "SFTP host")?;
        if self.port == 0 {
            return Err(StorageError::invalid("SFTP port must be between 1 and 65535"));
        }
        require(&self.username, "SFTP username")?;

        if require_secrets && self.password.is_empty() && self.private_key.is_empty() {
            return Err(StorageError::invalid(
                "SFTP password or private key is required",
            ));
        }
        if !self.private_key.is_empty() && !is_encrypted(&self.private_key) {
            check_private_key(&self.private_key)?;
        }
        Ok(())
    }

    fn apply_update(&mut self, incoming: Self) {
        self.host = incoming.host;
        self.port = incoming.port;
        self.username = incoming.username;
        self.skip_host_key_verify = incoming.skip_host_key_verify;
        self.path = incoming.path;
        keep_secret(&mut self.password, incoming.password);
        keep_secret(&mut self.private_key, incoming.private_key);
    }

    async fn test_connection(
        &self,
        secrets: &Secrets<'_>,
        _ctx: &ConnectionContext,
    ) -> Result<(), StorageError> {
        let password = secrets.reveal(&self.password)?;
        let private_key = secrets.reveal(&self.private_key)?;
        let key = if private_key.is_empty() {
            None
        } else {
            let pair = russh_keys::decode_secret_key(&private_key, None).map_err(|e| {
                StorageError::connection(format!("invalid SFTP private key: {}", e))
            })?;
            Some(Arc::new(pair))
        };

        let handler = HostKeyPolicy {
            host: self.host.clone(),
            port: self.port,
            skip_verify: self.skip_host_key_verify,
        };
        let mut session = client::connect(
            Arc::new(client::Config::default()),
            (self.host.as_str(), self.port),
            handler,
        )
        .await
        .map_err(|e| self.handshake_error(e))?;

        let result = self.authenticate_and_stat(&mut session, &password, key).await;
        // best effort, the outcome is already decided
        let _ = session
            .disconnect(Disconnect::ByApplication, "", "en")
            .await;
        result?;

        tracing::debug!(host = %self.host, port = self.port, "SFTP connection check succeeded");
        Ok(())
    }
}

impl SftpStorage {
    fn handshake_error(&self, e: russh::Error) -> StorageError {
        match e {
            russh::Error::UnknownKey => StorageError::connection(format!(
                "host key of {}:{} is not in known_hosts, add it or enable skipHostKeyVerify",
                self.host, self.port
            )),
            other => StorageError::connection(format!(
                "failed to establish SSH session with {}:{}: {}",
                self.host, self.port, other
            )),
        }
    }

    async fn authenticate_and_stat(
        &self,
        session: &mut Handle<HostKeyPolicy>,
        password: &str,
        key: Option<Arc<KeyPair>>,
    ) -> Result<(), StorageError> {
        let auth_error =
            |e: russh::Error| StorageError::connection(format!("SSH authentication error: {}", e));

        let mut authenticated = false;
        if let Some(key) = key {
            authenticated = session
                .authenticate_publickey(&self.username, key)
                .await
                .map_err(auth_error)?;
        }
        if !authenticated && !password.is_empty() {
            authenticated = session
                .authenticate_password(&self.username, password)
                .await
                .map_err(auth_error)?;
        }
        if !authenticated {
            return Err(StorageError::connection(format!(
                "SSH authentication failed for user '{}'",
                self.username
            )));
        }

        let channel = session.channel_open_session().await.map_err(|e| {
            StorageError::connection(format!("failed to open SFTP session channel: {}", e))
        })?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| StorageError::connection(format!("SFTP subsystem request failed: {}", e)))?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| StorageError::connection(format!("SFTP subsystem unavailable: {}", e)))?;

        let path = if self.path.is_empty() { "." } else { self.path.as_str() };
        let metadata = sftp.metadata(path).await.map_err(|e| {
            StorageError::connection(format!("SFTP path '{}' is not accessible: {}", path, e))
        })?;
        if !metadata.is_dir() {
            return Err(StorageError::connection(format!(
                "SFTP path '{}' is not a directory",
                path
            )));
        }
        Ok(())
    }
}

/// Accepts the server key when verification is off, otherwise only keys
/// already listed in the user's known_hosts.
struct HostKeyPolicy {
    host: String,
    port: u16,
    skip_verify: bool,
}

#[async_trait]
impl client::Handler for HostKeyPolicy {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        if self.skip_verify {
            return Ok(true);
        }
        match russh_keys::check_known_hosts(&self.host, self.port, server_public_key) {
            Ok(known) => Ok(known),
            Err(e) => {
                tracing::warn!(host = %self.host, port = self.port, error = %e, "SSH host key rejected");
                Ok(false)
            }
        }
    }
}
