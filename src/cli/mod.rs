// src/cli/mod.rs — CLI definition (clap derive)

pub mod admin;
pub mod migrate;
pub mod serve;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "counseldesk",
    about = "Counseling-session recording, transcription and analysis service",
    version
)]
pub struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Log filter when RUST_LOG is unset (e.g. info, debug, counseldesk=trace)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the REST API
    Serve {
        /// Bind address (overrides server.host)
        #[arg(long)]
        host: Option<String>,
        /// Port (overrides server.port)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Show or apply database migrations
    Migrate {
        /// Show migration status only
        #[arg(long)]
        status: bool,
        /// Roll back the most recent migration
        #[arg(long, conflicts_with = "status")]
        rollback: bool,
    },
    /// Create an administrator account
    CreateAdmin {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        password: String,
    },
    /// Insert a demo clinic with a manager, counselors and customers
    Seed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serve_with_globals() {
        let cli = Cli::parse_from([
            "counseldesk",
            "serve",
            "--port",
            "9000",
            "--config",
            "/etc/counseldesk.toml",
        ]);
        assert_eq!(cli.config.as_deref(), Some("/etc/counseldesk.toml"));
        assert_eq!(cli.log_level, "info");
        match cli.command {
            Commands::Serve { host, port } => {
                assert_eq!(host, None);
                assert_eq!(port, Some(9000));
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn test_migrate_flags_conflict() {
        assert!(Cli::try_parse_from(["counseldesk", "migrate", "--status", "--rollback"]).is_err());
        assert!(Cli::try_parse_from(["counseldesk", "migrate", "--rollback"]).is_ok());
    }
}
