mod ntlm;
mod smb2;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;

use self::ntlm::{Challenge, Credentials};
use self::smb2::{
    describe_status, Signer, DIALECTS, SESSION_FLAG_ENCRYPT_DATA, SESSION_FLAG_IS_GUEST,
    SESSION_FLAG_IS_NULL, STATUS_ACCESS_DENIED, STATUS_BAD_NETWORK_NAME,
    STATUS_MORE_PROCESSING_REQUIRED, STATUS_SUCCESS,
};
use super::{keep_secret, require, require_secret, ConnectionContext, Secrets, StorageBackend};
use crate::errors::StorageError;

/// SMB/CIFS network share.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NasStorage {
    pub host: String,
    pub port: u16,
    pub share: String,
    pub username: String,
    pub password: String,
    pub use_ssl: bool,
    pub domain: String,
    pub path: String,
}

impl Default for NasStorage {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 445,
            share: String::new(),
            username: String::new(),
            password: String::new(),
            use_ssl: false,
            domain: String::new(),
            path: String::new(),
        }
    }
}

#[async_trait]
impl StorageBackend for NasStorage {
    fn sensitive_fields_mut(&mut self) -> Vec<&mut String> {
        vec![&mut self.password]
    }

    fn validate(&self, require_secrets: bool) -> Result<(), StorageError> {
        require(&self.host, "NAS host")?;
        if self.port == 0 {
            return Err(StorageError::invalid("NAS port must be between 1 and 65535"));
        }
        require(&self.share, "NAS share")?;
        require(&self.username, "NAS username")?;
        require_secret(&self.password, "NAS password", require_secrets)
    }

    fn apply_update(&mut self, incoming: Self) {
        self.host = incoming.host;
        self.port = incoming.port;
        self.share = incoming.share;
        self.username = incoming.username;
        self.use_ssl = incoming.use_ssl;
        self.domain = incoming.domain;
        self.path = incoming.path;
        keep_secret(&mut self.password, incoming.password);
    }

    async fn test_connection(
        &self,
        secrets: &Secrets<'_>,
        _ctx: &ConnectionContext,
    ) -> Result<(), StorageError> {
        let password = secrets.reveal(&self.password)?;

        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| {
                StorageError::connection(format!(
                    "failed to connect to NAS {}:{}: {}",
                    self.host, self.port, e
                ))
            })?;

        let mut client = SmbClient::new(stream);
        let dialect = client.negotiate().await?;
        let session = client
            .session_setup(&self.credentials(&password), &self.username)
            .await?;

        match session {
            Session::Signed(session_key) => {
                let signer = Signer::new(dialect, &session_key)?;
                client.tree_connect(&self.unc_path(), &signer).await?;
            }
            Session::Encrypted => {
                // encrypted sessions reject unencrypted TREE_CONNECT, credentials are verified
                tracing::debug!(host = %self.host, "NAS requires SMB3 encryption, share not checked");
            }
        }

        tracing::debug!(host = %self.host, share = %self.share, dialect = %format!("0x{:04X}", dialect), "NAS connection check succeeded");
        Ok(())
    }
}

impl NasStorage {
    /// `DOMAIN\user` in the username supplies the domain when none is set.
    fn credentials<'a>(&'a self, password: &'a str) -> Credentials<'a> {
        match self.username.split_once('\\') {
            Some((domain, user)) if self.domain.is_empty() => Credentials {
                user,
                domain,
                password,
            },
            _ => Credentials {
                user: &self.username,
                domain: &self.domain,
                password,
            },
        }
    }

    fn unc_path(&self) -> String {
        format!(
            "\\\\{}\\{}",
            self.host,
            self.share.trim_matches(|c| c == '/' || c == '\\')
        )
    }
}

enum Session {
    Signed([u8; 16]),
    Encrypted,
}

struct SmbClient {
    stream: TcpStream,
    next_message_id: u64,
    session_id: u64,
}

impl SmbClient {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            next_message_id: 0,
            session_id: 0,
        }
    }

    fn message_id(&mut self) -> u64 {
        let id = self.next_message_id;
        self.next_message_id += 1;
        id
    }

    async fn roundtrip(&mut self, message: &[u8]) -> Result<smb2::Response, StorageError> {
        smb2::send(&mut self.stream, message).await?;
        smb2::recv(&mut self.stream).await
    }

    async fn negotiate(&mut self) -> Result<u16, StorageError> {
        let id = self.message_id();
        let request = smb2::negotiate_request(id, uuid::Uuid::new_v4().as_bytes());
        let response = self.roundtrip(&request).await?;
        if response.status() != STATUS_SUCCESS {
            return Err(StorageError::connection(format!(
                "SMB negotiate failed with status {}",
                describe_status(response.status())
            )));
        }

        let (_, dialect) = response.negotiated()?;
        if !DIALECTS.contains(&dialect) {
            return Err(StorageError::connection(format!(
                "NAS selected unsupported SMB dialect 0x{:04X}",
                dialect
            )));
        }
        Ok(dialect)
    }

    async fn session_setup(
        &mut self,
        creds: &Credentials<'_>,
        username: &str,
    ) -> Result<Session, StorageError> {
        let token = ntlm::spnego_init(&ntlm::negotiate_message());
        let id = self.message_id();
        let response = self
            .roundtrip(&smb2::session_setup_request(id, 0, &token))
            .await?;
        if response.status() != STATUS_MORE_PROCESSING_REQUIRED {
            return Err(StorageError::connection(format!(
                "SMB session setup failed with status {}",
                describe_status(response.status())
            )));
        }
        self.session_id = response.session_id();
        let challenge = Challenge::parse(response.security_buffer()?)?;

        let auth = ntlm::authenticate_message(
            creds,
            &challenge,
            rand::random::<[u8; 8]>(),
            ntlm::filetime_now(),
        )?;
        let token = ntlm::spnego_response(&auth.message);
        let id = self.message_id();
        let response = self
            .roundtrip(&smb2::session_setup_request(id, self.session_id, &token))
            .await?;
        if response.status() != STATUS_SUCCESS {
            return Err(StorageError::connection(format!(
                "SMB authentication failed for user '{}': {}",
                username,
                describe_status(response.status())
            )));
        }

        let flags = response.session_flags()?;
        if flags & (SESSION_FLAG_IS_GUEST | SESSION_FLAG_IS_NULL) != 0 {
            return Err(StorageError::connection(format!(
                "SMB authentication failed for user '{}': server fell back to guest access",
                username
            )));
        }
        if flags & SESSION_FLAG_ENCRYPT_DATA != 0 {
            return Ok(Session::Encrypted);
        }
        Ok(Session::Signed(auth.session_key))
    }

    async fn tree_connect(&mut self, unc_path: &str, signer: &Signer) -> Result<(), StorageError> {
        let id = self.message_id();
        let mut request = smb2::tree_connect_request(id, self.session_id, unc_path);
        signer.sign(&mut request)?;
        let response = self.roundtrip(&request).await?;

        match response.status() {
            STATUS_SUCCESS => Ok(()),
            STATUS_BAD_NETWORK_NAME => Err(StorageError::connection(format!(
                "SMB share {} does not exist",
                unc_path
            ))),
            STATUS_ACCESS_DENIED => Err(StorageError::connection(format!(
                "access to SMB share {} was denied",
                unc_path
            ))),
            status => Err(StorageError::connection(format!(
                "SMB tree connect to {} failed with status {}",
                unc_path,
                describe_status(status)
            ))),
        }
    }
}
