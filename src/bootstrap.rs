//! Builds the long-lived components once at startup and hands them out
//! explicitly. Shared by the server and the ingestion CLI.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::catalog::{CatalogSource, PostgresCatalog};
use crate::config::{Settings, VectorBackend};
use crate::llm::LlmClient;
use crate::rag::embeddings::{EmbeddingGenerator, Embeddings};
use crate::rag::ingestion::IngestionPipeline;
use crate::rag::memory_index::MemoryIndex;
use crate::rag::recommender::RecommendationGenerator;
use crate::rag::search::CatalogSearch;
use crate::rag::vector_store::{VectorIndex, VectorStore};
use crate::rag::RagEngine;

/// Log level used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info";

pub fn log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

pub fn init_tracing() {
    tracing_subscriber::fmt().with_env_filter(log_filter()).init();
}

pub fn build_embeddings(settings: &Settings) -> Result<Embeddings> {
    let model_dir = settings.embedding.model_dir.as_deref().map(Path::new);
    let generator = EmbeddingGenerator::new(model_dir, settings.embedding.dimension)?;
    Ok(Embeddings::new(
        Arc::new(generator),
        settings.embedding.failure_policy,
    ))
}

pub async fn build_index(settings: &Settings) -> Result<Arc<dyn VectorIndex>> {
    match settings.vector.backend {
        VectorBackend::Qdrant => {
            tracing::info!("Connecting to Qdrant: {}", settings.vector.url);
            let store = VectorStore::new(
                &settings.vector.url,
                &settings.vector.collection_prefix,
                settings.embedding.dimension,
            )
            .await
            .context("Failed to initialize the vector index")?;
            Ok(Arc::new(store))
        }
        VectorBackend::Memory => {
            tracing::warn!("Using the in-memory vector index, contents are lost on restart");
            Ok(Arc::new(MemoryIndex::new(settings.embedding.dimension)))
        }
    }
}

pub async fn build_catalog(settings: &Settings) -> Result<Arc<dyn CatalogSource>> {
    tracing::info!("Connecting to catalog database");
    Ok(Arc::new(PostgresCatalog::new(&settings.database).await?))
}

pub async fn build_ingestion(
    settings: &Settings,
    embeddings: Embeddings,
    index: Arc<dyn VectorIndex>,
) -> Result<Arc<IngestionPipeline>> {
    let catalog = build_catalog(settings).await?;
    Ok(Arc::new(IngestionPipeline::new(
        catalog,
        embeddings,
        index,
        settings.rag.ingest_page_size,
    )))
}

pub async fn build_state(settings: &Settings) -> Result<Arc<AppState>> {
    let embeddings = build_embeddings(settings)?;
    let index = build_index(settings).await?;
    let ingestion = build_ingestion(settings, embeddings.clone(), index.clone()).await?;

    tracing::info!("Using LLM {} at {}", settings.llm.model, settings.llm.base_url);
    let llm = LlmClient::new(&settings.llm).context("Failed to build the LLM client")?;

    let engine = RagEngine::new(
        CatalogSearch::new(embeddings, index),
        RecommendationGenerator::new(Arc::new(llm)),
        settings.rag.clone(),
    );

    Ok(Arc::new(AppState { engine, ingestion }))
}
