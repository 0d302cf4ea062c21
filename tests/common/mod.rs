#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use uuid::Uuid;

use storages::audit::AuditLogSink;
use storages::backends::ConnectionContext;
use storages::models::{Actor, WorkspaceRole};
use storages::store::InMemoryStorageRepository;
use storages::vault::builtin::AesFieldEncryptor;
use storages::workspace::{AttachedDatabaseCounter, RoleAuthorizer};
use storages::{ServiceSettings, StorageService};

pub const MASTER_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub message: String,
    pub actor_id: Option<Uuid>,
    pub workspace_id: Option<Uuid>,
}

#[derive(Default)]
pub struct RecordingAudit {
    entries: Mutex<Vec<AuditEntry>>,
}

impl RecordingAudit {
    pub fn messages(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.message.clone())
            .collect()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap().clone()
    }
}

impl AuditLogSink for RecordingAudit {
    fn write_audit_log(&self, message: &str, actor_id: Option<Uuid>, workspace_id: Option<Uuid>) {
        self.entries.lock().unwrap().push(AuditEntry {
            message: message.to_string(),
            actor_id,
            workspace_id,
        });
    }
}

/// Attachment table set up by each test.
#[derive(Default)]
pub struct FixedAttachments {
    attached: DashMap<Uuid, Vec<Uuid>>,
}

impl FixedAttachments {
    pub fn attach(&self, storage_id: Uuid, database_id: Uuid) {
        self.attached.entry(storage_id).or_default().push(database_id);
    }

    pub fn detach_all(&self, storage_id: Uuid) {
        self.attached.remove(&storage_id);
    }
}

#[async_trait]
impl AttachedDatabaseCounter for FixedAttachments {
    async fn attached_database_ids(&self, storage_id: Uuid) -> anyhow::Result<Vec<Uuid>> {
        Ok(self
            .attached
            .get(&storage_id)
            .map(|ids| ids.value().clone())
            .unwrap_or_default())
    }
}

pub struct Harness {
    pub service: StorageService,
    pub repo: Arc<InMemoryStorageRepository>,
    pub authz: Arc<RoleAuthorizer>,
    pub audit: Arc<RecordingAudit>,
    pub attachments: Arc<FixedAttachments>,
    pub encryptor: Arc<AesFieldEncryptor>,
    pub local_root: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(ServiceSettings::default())
    }

    pub fn cloud() -> Self {
        Self::with_settings(ServiceSettings { is_cloud: true })
    }

    pub fn with_settings(settings: ServiceSettings) -> Self {
        let repo = Arc::new(InMemoryStorageRepository::new());
        let authz = Arc::new(RoleAuthorizer::new());
        let audit = Arc::new(RecordingAudit::default());
        let attachments = Arc::new(FixedAttachments::default());
        let encryptor = Arc::new(AesFieldEncryptor::new(MASTER_KEY).unwrap());
        let local_root = tempfile::tempdir().unwrap();

        let ctx = ConnectionContext {
            local_root: local_root.path().to_path_buf(),
            timeout: std::time::Duration::from_secs(5),
            ..Default::default()
        };

        let service = StorageService::new(
            repo.clone(),
            authz.clone(),
            audit.clone(),
            encryptor.clone(),
            ctx,
            settings,
        )
        .with_attachment_counter(attachments.clone());

        Self {
            service,
            repo,
            authz,
            audit,
            attachments,
            encryptor,
            local_root,
        }
    }

    /// A fresh member holding `role` in `workspace_id`.
    pub fn member_of(&self, workspace_id: Uuid, role: WorkspaceRole) -> Actor {
        let actor = Actor::member(Uuid::new_v4());
        self.authz.grant(workspace_id, actor.id, role);
        actor
    }
}

/// Minimal FTP control-channel server accepting one session.
///
/// Returns the port and a handle resolving to every command received.
pub async fn spawn_ftp_server(password: &'static str) -> (u16, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut lines = BufReader::new(read).lines();
        let mut seen = Vec::new();

        write
            .write_all(b"220-Welcome\r\n220 Test FTP ready\r\n")
            .await
            .unwrap();

        while let Ok(Some(line)) = lines.next_line().await {
            seen.push(line.clone());
            let reply: &[u8] = if line.starts_with("USER ") {
                b"331 Password required\r\n"
            } else if let Some(given) = line.strip_prefix("PASS ") {
                if given == password {
                    b"230 Logged in\r\n"
                } else {
                    b"530 Login incorrect\r\n"
                }
            } else if line.starts_with("CWD ") {
                b"250 Directory changed\r\n"
            } else if line == "QUIT" {
                let _ = write.write_all(b"221 Bye\r\n").await;
                break;
            } else {
                b"502 Not implemented\r\n"
            };
            if write.write_all(reply).await.is_err() {
                break;
            }
        }
        seen
    });

    (port, handle)
}
