use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use guia_assistant::AssistantGateway;
use guia_catalog::Catalog;
use guia_session::SessionService;
use guia_store::{sessions::SessionRepo, Database};

#[derive(Parser)]
#[command(name = "guia", about = "Guided-procedure tracker backend")]
struct Cli {
    /// Port to listen on.
    #[arg(long, env = "GUIA_PORT", default_value_t = 5000)]
    port: u16,

    /// SQLite database path.
    #[arg(long, env = "GUIA_DB", default_value = "guia.db")]
    db: PathBuf,

    /// Directory holding areas.json and the nodos/ step graphs.
    #[arg(long, env = "GUIA_CATALOG_DIR", default_value = "catalog")]
    catalog_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("starting guia server");

    let catalog = Arc::new(
        Catalog::load(&cli.catalog_dir)
            .with_context(|| format!("loading catalog from {}", cli.catalog_dir.display()))?,
    );

    let db = Database::open(&cli.db)
        .with_context(|| format!("opening database at {}", cli.db.display()))?;

    let assistant = Arc::new(AssistantGateway::from_env());
    if !assistant.is_configured() {
        tracing::warn!("no assistant credential configured, chat runs in fallback mode");
    }

    let state = guia_server::AppState {
        service: Arc::new(SessionService::new(
            SessionRepo::new(db),
            Arc::clone(&catalog),
        )),
        catalog,
        assistant,
    };

    let config = guia_server::ServerConfig { port: cli.port };
    let handle = guia_server::start(config, state)
        .await
        .context("starting server")?;

    tracing::info!(port = handle.port, "guia server ready");

    tokio::signal::ctrl_c().await.context("waiting for ctrl+c")?;
    tracing::info!("shutting down");

    Ok(())
}
