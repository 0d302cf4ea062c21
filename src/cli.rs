use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

/// Maintenance tool for backup storage destinations
#[derive(Parser)]
#[command(name = "storages", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a storage JSON document and run its connection check
    Check {
        /// Path to the document, `-` for stdin
        #[arg(long)]
        file: PathBuf,
    },

    /// Probe a saved storage and record the result on it
    Test {
        #[arg(long)]
        storage_id: Uuid,
    },

    /// List a workspace's storages with secrets hidden
    List {
        #[arg(long)]
        workspace_id: Uuid,
    },

    /// Encrypt a field value for a storage
    Encrypt {
        #[arg(long)]
        storage_id: Uuid,
        #[arg(long)]
        value: String,
    },

    /// Decrypt a stored field value
    Decrypt {
        #[arg(long)]
        storage_id: Uuid,
        #[arg(long)]
        value: String,
    },

    /// Exchange a Google OAuth authorization code for a token JSON
    GoogleAuth {
        #[arg(long, env = "GOOGLE_CLIENT_ID")]
        client_id: String,
        #[arg(long, env = "GOOGLE_CLIENT_SECRET")]
        client_secret: String,
        #[arg(long)]
        code: String,
        #[arg(long)]
        redirect_uri: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_list() {
        let ws = Uuid::new_v4();
        let cli = Cli::try_parse_from(["storages", "list", "--workspace-id", &ws.to_string()]).unwrap();
        assert!(matches!(cli.command, Commands::List { workspace_id } if workspace_id == ws));
    }

    #[test]
    fn test_rejects_bad_uuid() {
        assert!(Cli::try_parse_from(["storages", "test", "--storage-id", "nope"]).is_err());
    }
}
