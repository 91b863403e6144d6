use clap::{Parser, Subcommand};

/// tfc-secrets — Terraform Cloud / Enterprise API token issuance
#[derive(Parser)]
#[command(name = "tfc-secrets", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind; defaults to TFC_SECRETS_PORT
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Rotate the management token once and exit
    RotateRoot,

    /// Inspect roles
    Roles {
        #[command(subcommand)]
        command: RoleCommands,
    },
}

#[derive(Subcommand)]
pub enum RoleCommands {
    /// List role names
    List,
}
