use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use super::{keep_secret, require_secret, ConnectionContext, Secrets, StorageBackend};
use crate::errors::StorageError;
use crate::vault::is_encrypted;

/// Any remote rclone can reach, described by a full rclone config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RcloneStorage {
    pub config_content: String,
    /// Path inside the remote, without the `remote:` prefix.
    pub remote_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RcloneRemote {
    pub name: String,
    pub kind: String,
}

/// Parse the INI-style rclone config and return its remotes in file order.
pub fn parse_remotes(config: &str) -> Result<Vec<RcloneRemote>, StorageError> {
    let mut remotes: Vec<(String, Option<String>)> = Vec::new();

    for (lineno, raw) in config.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(section) = line.strip_prefix('[') {
            let name = section
                .strip_suffix(']')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .ok_or_else(|| {
                    StorageError::invalid(format!("rclone config line {}: bad section header", lineno + 1))
                })?;
            remotes.push((name.to_string(), None));
            continue;
        }

        let (key, value) = line.split_once('=').ok_or_else(|| {
            StorageError::invalid(format!("rclone config line {}: expected key = value", lineno + 1))
        })?;
        let Some((_, kind)) = remotes.last_mut() else {
            return Err(StorageError::invalid(format!(
                "rclone config line {}: key outside of a [remote] section",
                lineno + 1
            )));
        };
        if key.trim() == "type" {
            *kind = Some(value.trim().to_string());
        }
    }

    let remotes: Vec<RcloneRemote> = remotes
        .into_iter()
        .map(|(name, kind)| {
            kind.filter(|k| !k.is_empty())
                .map(|kind| RcloneRemote {
                    name: name.clone(),
                    kind,
                })
                .ok_or_else(|| StorageError::invalid(format!("rclone remote [{}] has no type", name)))
        })
        .collect::<Result<_, _>>()?;

    if remotes.is_empty() {
        return Err(StorageError::invalid(
            "rclone config must define at least one [remote]",
        ));
    }
    Ok(remotes)
}

#[async_trait]
impl StorageBackend for RcloneStorage {
    fn sensitive_fields_mut(&mut self) -> Vec<&mut String> {
        vec![&mut self.config_content]
    }

    fn validate(&self, require_secrets: bool) -> Result<(), StorageError> {
        require_secret(&self.config_content, "rclone config", require_secrets)?;
        if !self.config_content.is_empty() && !is_encrypted(&self.config_content) {
            parse_remotes(&self.config_content)?;
        }
        Ok(())
    }

    fn apply_update(&mut self, incoming: Self) {
        self.remote_path = incoming.remote_path;
        keep_secret(&mut self.config_content, incoming.config_content);
    }

    async fn test_connection(
        &self,
        secrets: &Secrets<'_>,
        ctx: &ConnectionContext,
    ) -> Result<(), StorageError> {
        let config = secrets.reveal(&self.config_content)?;
        let remotes = parse_remotes(&config).map_err(|e| StorageError::connection(e.to_string()))?;
        let remote = &remotes[0];

        let file = tempfile::Builder::new()
            .prefix("rclone-")
            .suffix(".conf")
            .tempfile()
            .map_err(|e| StorageError::Internal(e.into()))?;
        tokio::fs::write(file.path(), config.as_bytes())
            .await
            .map_err(|e| StorageError::Internal(e.into()))?;

        let target = format!("{}:{}", remote.name, self.remote_path.trim_start_matches('/'));
        let output = Command::new(&ctx.rclone_binary)
            .arg("lsf")
            .arg(&target)
            .arg("--config")
            .arg(file.path())
            .arg("--max-depth")
            .arg("1")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                StorageError::connection(format!(
                    "failed to run '{}': {}",
                    ctx.rclone_binary, e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("rclone exited with an error");
            return Err(StorageError::connection(format!(
                "rclone could not list {}: {}",
                target,
                reason.trim()
            )));
        }

        tracing::debug!(remote = %remote.name, kind = %remote.kind, "rclone connection check succeeded");
        Ok(())
    }
}
