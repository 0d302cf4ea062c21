use std::path::PathBuf;
use std::time::Duration;

use crate::backends::{ConnectionContext, DEFAULT_GOOGLE_API_BASE, DEFAULT_GOOGLE_TOKEN_URL};
use crate::service::ServiceSettings;

const INSECURE_MASTER_KEY: &str = "CHANGE_ME_32_BYTE_HEX_KEY";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub master_key: String,
    /// Hosted deployment. Set via STORAGES_CLOUD_MODE.
    pub cloud_mode: bool,
    /// Root directory for local storages. Set via STORAGES_LOCAL_ROOT.
    pub local_root: PathBuf,
    /// Upper bound on one connection test.
    /// Set via STORAGES_CONNECTION_TIMEOUT_SECS. Default: 10.
    pub connection_timeout_secs: u64,
    pub google_api_base: String,
    pub google_token_url: String,
    pub rclone_binary: String,
    /// Emit logs as JSON. Set STORAGES_LOG_FORMAT=json.
    pub log_json: bool,
}

impl Config {
    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            is_cloud: self.cloud_mode,
        }
    }

    pub fn connection_context(&self) -> ConnectionContext {
        ConnectionContext {
            local_root: self.local_root.clone(),
            google_api_base: self.google_api_base.clone(),
            google_token_url: self.google_token_url.clone(),
            rclone_binary: self.rclone_binary.clone(),
            timeout: Duration::from_secs(self.connection_timeout_secs),
            http: reqwest::Client::new(),
        }
    }

    pub fn has_insecure_master_key(&self) -> bool {
        self.master_key == INSECURE_MASTER_KEY
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let master_key =
        std::env::var("STORAGES_MASTER_KEY").unwrap_or_else(|_| INSECURE_MASTER_KEY.into());

    if master_key == INSECURE_MASTER_KEY {
        let env_mode = std::env::var("STORAGES_ENV")
            .or_else(|_| std::env::var("RUST_ENV"))
            .unwrap_or_default();
        if env_mode == "production" {
            anyhow::bail!(
                "STORAGES_MASTER_KEY is still the insecure placeholder. \
                 Set a proper 64-char hex key before running in production."
            );
        }
    }

    Ok(Config {
        database_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/storages".into()),
        master_key,
        cloud_mode: env_flag("STORAGES_CLOUD_MODE"),
        local_root: std::env::var("STORAGES_LOCAL_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir().join("storages")),
        connection_timeout_secs: std::env::var("STORAGES_CONNECTION_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(10),
        google_api_base: std::env::var("STORAGES_GOOGLE_API_BASE")
            .unwrap_or_else(|_| DEFAULT_GOOGLE_API_BASE.into()),
        google_token_url: std::env::var("STORAGES_GOOGLE_TOKEN_URL")
            .unwrap_or_else(|_| DEFAULT_GOOGLE_TOKEN_URL.into()),
        rclone_binary: std::env::var("STORAGES_RCLONE_BINARY").unwrap_or_else(|_| "rclone".into()),
        log_json: std::env::var("STORAGES_LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false),
    })
}
