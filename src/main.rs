// src/main.rs — counseldesk entry point

use clap::Parser;

use counseldesk::cli::{self, Cli, Commands};
use counseldesk::infra::config::Config;
use counseldesk::infra::logger;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    // Initialize logging (RUST_LOG wins over --log-level)
    logger::init_logging(&cli.log_level);

    if let Err(e) = run(cli).await {
        tracing::error!("{e:#}");
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Load config (falls back to defaults if no config.toml)
    let config = match &cli.config {
        Some(path) => Config::load_from(std::path::Path::new(path))?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Serve { host, port } => cli::serve::run_serve(config, host, port).await,
        Commands::Migrate { status, rollback } => {
            cli::migrate::run_migrate(&config.database.resolved_path(), status, rollback)
        }
        Commands::CreateAdmin {
            email,
            name,
            password,
        } => cli::admin::run_create_admin(config, &email, &name, &password).await,
        Commands::Seed => cli::admin::run_seed(config).await,
    }
}
