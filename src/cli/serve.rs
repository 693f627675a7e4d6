// src/cli/serve.rs — `counseldesk serve`

use crate::app::AppContext;
use crate::db;
use crate::infra::config::Config;

/// Open the database, wire the context and serve until ctrl-c.
pub async fn run_serve(mut config: Config, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config.validate_for_serve()?;
    if config.transcription.api_key.is_empty() || config.analysis.api_key.is_empty() {
        tracing::warn!("No OpenAI API key configured; transcription and analysis jobs will fail");
    }
    if config.storage.bucket.is_empty() {
        tracing::warn!("No storage bucket configured; upload slots will not work");
    }

    let db_path = config.database.resolved_path();
    let store = db::open(&db_path)?;
    tracing::info!(path = %db_path.display(), "Database ready");
    let (transcriptions, analyses) = store.fail_interrupted_tasks()?;
    if transcriptions + analyses > 0 {
        tracing::warn!(transcriptions, analyses, "Marked interrupted tasks as failed");
    }
    let (handle, _store_task) = db::spawn_store_server(store);

    let host = config.server.host.clone();
    let port = config.server.port;
    let ctx = AppContext::from_config(handle, config)?;
    crate::api::start_server(ctx, &host, port).await
}
