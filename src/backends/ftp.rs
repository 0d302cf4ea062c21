use std::sync::Arc;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use super::{keep_secret, require, require_secret, ConnectionContext, Secrets, StorageBackend};
use crate::errors::StorageError;

/// FTP server, optionally upgraded to explicit FTPS (`AUTH TLS`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FtpStorage {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub use_ssl: bool,
    pub path: String,
}

impl Default for FtpStorage {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 21,
            username: String::new(),
            password: String::new(),
            use_ssl: false,
            path: String::new(),
        }
    }
}

#[async_trait]
impl StorageBackend for FtpStorage {
    fn sensitive_fields_mut(&mut self) -> Vec<&mut String> {
        vec![&mut self.password]
    }

    fn validate(&self, require_secrets: bool) -> Result<(), StorageError> {
        require(&self.host, "FTP host")?;
        if self.port == 0 {
            return Err(StorageError::invalid("FTP port must be between 1 and 65535"));
        }
        require(&self.username, "FTP username")?;
        require_secret(&self.password, "FTP password", require_secrets)?;
        single_line(&self.username, "FTP username")?;
        single_line(&self.password, "FTP password")?;
        single_line(&self.path, "FTP path")
    }

    fn apply_update(&mut self, incoming: Self) {
        self.host = incoming.host;
        self.port = incoming.port;
        self.username = incoming.username;
        self.use_ssl = incoming.use_ssl;
        self.path = incoming.path;
        keep_secret(&mut self.password, incoming.password);
    }

    async fn test_connection(
        &self,
        secrets: &Secrets<'_>,
        _ctx: &ConnectionContext,
    ) -> Result<(), StorageError> {
        let password = secrets.reveal(&self.password)?;
        single_line(&password, "FTP password")?;

        let tcp = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| {
                StorageError::connection(format!(
                    "failed to connect to FTP server {}:{}: {}",
                    self.host, self.port, e
                ))
            })?;

        let mut control = BufReader::new(tcp);
        expect(&mut control, &[220], "greeting").await?;

        if self.use_ssl {
            send(&mut control, "AUTH TLS").await?;
            expect(&mut control, &[234], "AUTH TLS").await?;
            let tls = upgrade(control.into_inner(), &self.host).await?;
            self.session(BufReader::new(tls), &password).await?;
        } else {
            self.session(control, &password).await?;
        }

        tracing::debug!(host = %self.host, port = self.port, tls = self.use_ssl, "FTP connection check succeeded");
        Ok(())
    }
}

impl FtpStorage {
    async fn session<S>(&self, mut control: BufReader<S>, password: &str) -> Result<(), StorageError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        send(&mut control, &format!("USER {}", self.username)).await?;
        let (code, _) = expect(&mut control, &[230, 331], "USER").await?;
        if code == 331 {
            send(&mut control, &format!("PASS {}", password)).await?;
            expect(&mut control, &[230, 202], "login").await?;
        }

        if !self.path.is_empty() {
            send(&mut control, &format!("CWD {}", self.path)).await?;
            expect(&mut control, &[250], "CWD").await?;
        }

        // best effort, the check already succeeded
        if send(&mut control, "QUIT").await.is_ok() {
            let _ = read_reply(&mut control).await;
        }
        Ok(())
    }
}

/// Values end up on the control channel verbatim, a line break would smuggle
/// in another command.
fn single_line(value: &str, field: &str) -> Result<(), StorageError> {
    if value.contains(['\r', '\n']) {
        return Err(StorageError::invalid(format!(
            "{} must not contain line breaks",
            field
        )));
    }
    Ok(())
}

async fn upgrade(tcp: TcpStream, host: &str) -> Result<tokio_rustls::client::TlsStream<TcpStream>, StorageError> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| StorageError::connection(format!("TLS setup failed: {}", e)))?
    .with_root_certificates(roots)
    .with_no_client_auth();

    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| StorageError::connection(format!("invalid TLS server name '{}': {}", host, e)))?;

    TlsConnector::from(Arc::new(config))
        .connect(server_name, tcp)
        .await
        .map_err(|e| StorageError::connection(format!("TLS handshake with FTP server failed: {}", e)))
}

async fn send<S>(control: &mut BufReader<S>, command: &str) -> Result<(), StorageError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let stream = control.get_mut();
    stream
        .write_all(format!("{}\r\n", command).as_bytes())
        .await
        .map_err(|e| StorageError::connection(format!("FTP write failed: {}", e)))?;
    stream
        .flush()
        .await
        .map_err(|e| StorageError::connection(format!("FTP write failed: {}", e)))
}

async fn expect<S>(
    control: &mut BufReader<S>,
    accepted: &[u16],
    step: &str,
) -> Result<(u16, String), StorageError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (code, text) = read_reply(control).await?;
    if !accepted.contains(&code) {
        return Err(StorageError::connection(format!(
            "FTP {} failed: {} {}",
            step, code, text
        )));
    }
    Ok((code, text))
}

/// Read one reply, following `NNN-` continuation lines until `NNN `.
async fn read_reply<S>(control: &mut BufReader<S>) -> Result<(u16, String), StorageError>
where
    S: AsyncRead + Unpin,
{
    let first = read_line(control).await?;
    let code = parse_code(&first)?;

    if first.as_bytes().get(3) == Some(&b'-') {
        let terminator = format!("{} ", &first[..3]);
        loop {
            let line = read_line(control).await?;
            if line.starts_with(&terminator) {
                return Ok((code, line[4..].trim().to_string()));
            }
        }
    }

    Ok((code, first.get(4..).unwrap_or_default().trim().to_string()))
}

async fn read_line<S>(control: &mut BufReader<S>) -> Result<String, StorageError>
where
    S: AsyncRead + Unpin,
{
    let mut line = String::new();
    let read = control
        .read_line(&mut line)
        .await
        .map_err(|e| StorageError::connection(format!("FTP read failed: {}", e)))?;
    if read == 0 {
        return Err(StorageError::connection("FTP server closed the connection"));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn parse_code(line: &str) -> Result<u16, StorageError> {
    line.get(..3)
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| StorageError::connection(format!("unexpected FTP reply '{}'", line)))
}
