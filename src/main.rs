use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::AsyncReadExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use storages::audit::TracingAuditLog;
use storages::backends::google_drive;
use storages::config::{self, Config};
use storages::connection::ConnectionTester;
use storages::models::{Actor, Storage};
use storages::store::PgStorageRepository;
use storages::vault::builtin::AesFieldEncryptor;
use storages::vault::FieldEncryptor;
use storages::workspace::RoleAuthorizer;
use storages::StorageService;

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let json_layer = cfg.log_json.then(|| tracing_subscriber::fmt::layer().json());
    let text_layer = (!cfg.log_json).then(tracing_subscriber::fmt::layer);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "storages=info".into()),
        ))
        .with(text_layer)
        .with(json_layer)
        .init();

    if cfg.has_insecure_master_key() {
        tracing::warn!("STORAGES_MASTER_KEY is not set, encryption commands will fail");
    }

    match args.command {
        cli::Commands::Check { file } => {
            let raw = if file.to_str() == Some("-") {
                let mut buf = String::new();
                tokio::io::stdin().read_to_string(&mut buf).await?;
                buf
            } else {
                tokio::fs::read_to_string(&file)
                    .await
                    .with_context(|| format!("failed to read {}", file.display()))?
            };
            let storage: Storage =
                serde_json::from_str(&raw).context("invalid storage document")?;
            storage.validate(storage.id.is_none())?;

            let tester = ConnectionTester::new(encryptor(&cfg)?, cfg.connection_context());
            tester.test(&storage).await?;
            println!("✅ {} storage '{}' is reachable", storage.storage_type(), storage.name);
        }
        cli::Commands::Test { storage_id } => {
            let service = build_service(&cfg).await?;
            service
                .test_storage_connection(&operator(), storage_id)
                .await?;
            println!("✅ Storage {} is reachable", storage_id);
        }
        cli::Commands::List { workspace_id } => {
            let service = build_service(&cfg).await?;
            let storages = service.get_storages(&operator(), workspace_id).await?;
            println!("{}", serde_json::to_string_pretty(&storages)?);
        }
        cli::Commands::Encrypt { storage_id, value } => {
            let sealed = encryptor(&cfg)?.encrypt(storage_id, &value)?;
            println!("{}", sealed);
        }
        cli::Commands::Decrypt { storage_id, value } => {
            let plain = encryptor(&cfg)?.decrypt(storage_id, &value)?;
            println!("{}", plain);
        }
        cli::Commands::GoogleAuth {
            client_id,
            client_secret,
            code,
            redirect_uri,
        } => {
            let token = google_drive::exchange_authorization_code(
                &cfg.connection_context(),
                &client_id,
                &client_secret,
                &code,
                &redirect_uri,
            )
            .await?;
            println!("{}", token);
        }
    }

    Ok(())
}

/// The CLI acts with instance-wide admin rights.
fn operator() -> Actor {
    Actor::admin(Uuid::nil())
}

fn encryptor(cfg: &Config) -> anyhow::Result<Arc<dyn FieldEncryptor>> {
    Ok(Arc::new(AesFieldEncryptor::new(&cfg.master_key)?))
}

async fn build_service(cfg: &Config) -> anyhow::Result<StorageService> {
    let repository = PgStorageRepository::connect(&cfg.database_url)
        .await
        .context("failed to connect to the database")?;

    Ok(StorageService::new(
        Arc::new(repository),
        Arc::new(RoleAuthorizer::new()),
        Arc::new(TracingAuditLog),
        encryptor(cfg)?,
        cfg.connection_context(),
        cfg.service_settings(),
    ))
}
