use anyhow::Result;

use pillsure_rag::api;
use pillsure_rag::bootstrap;
use pillsure_rag::config::Settings;
use pillsure_rag::rag::ingestion::IngestionPipeline;

#[tokio::main]
async fn main() -> Result<()> {
    bootstrap::init_tracing();

    let settings = Settings::load()?;
    tracing::info!("RAG system starting up...");

    let state = bootstrap::build_state(&settings).await?;

    match state.engine.stats().await {
        Ok(stats) => tracing::info!(
            "Indexed medicines: {}, doctors: {}",
            stats.medicines,
            stats.doctors
        ),
        Err(e) => tracing::warn!("Could not read index stats: {:#}", e),
    }

    IngestionPipeline::start_scheduler(
        state.ingestion.clone(),
        settings.rag.ingest_interval_minutes,
    );

    let app = api::router(state, settings.server.request_timeout());

    let listener = tokio::net::TcpListener::bind(settings.server.bind_addr()).await?;
    tracing::info!("RAG API listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
