use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::Method,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::error::ApiError;
use crate::models::{
    DoctorDetails, DoctorSearch, DoctorSearchResponse, ExampleQueries, HealthResponse,
    IngestResponse, MedicineDetails, MedicineSearch, MedicineSearchResponse, MessageResponse,
    SpecializationsResponse, StatsResponse, SymptomQuery, SymptomResponse,
};
use crate::rag::ingestion::{IngestStatus, IngestTarget, IngestionPipeline};
use crate::rag::records::CollectionKind;
use crate::rag::search::{DoctorFilters, MedicineFilters};
use crate::rag::{clamp_limit, RagEngine};

const DEFAULT_SEARCH_LIMIT: u64 = 10;

pub struct AppState {
    pub engine: RagEngine,
    pub ingestion: Arc<IngestionPipeline>,
}

type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn router(state: Arc<AppState>, request_timeout: Duration) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/query/symptoms", post(query_symptoms))
        .route("/search/medicines", post(search_medicines))
        .route("/search/doctors", post(search_doctors))
        .route("/medicines/:id", get(get_medicine))
        .route("/doctors/:id", get(get_doctor))
        .route("/specializations", get(list_specializations))
        .route("/stats", get(stats))
        .route("/admin/ingest-data", post(ingest_all))
        .route("/admin/ingest-medicines", post(ingest_medicines))
        .route("/admin/ingest-doctors", post(ingest_doctors))
        .route("/admin/medicines/:id/sync", post(sync_medicine))
        .route("/admin/doctors/:id/sync", post(sync_doctor))
        .route("/admin/ingest-status", get(ingest_status))
        .route("/examples/queries", get(example_queries))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(TimeoutLayer::new(request_timeout)),
        )
        .with_state(state)
}

async fn root() -> Json<MessageResponse> {
    Json(MessageResponse {
        message: "Medicine & Doctor RAG API is running".to_string(),
    })
}

async fn health_check(State(state): State<Arc<AppState>>) -> ApiResult<HealthResponse> {
    let collections = state.engine.stats().await.map_err(|e| {
        tracing::error!("Health check failed: {:#}", e);
        ApiError::Internal("Service unhealthy".to_string())
    })?;
    let llm_reachable = state.engine.recommender().llm().health_check().await;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
        collections,
        llm_reachable,
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}

async fn query_symptoms(
    State(state): State<Arc<AppState>>,
    Json(query): Json<SymptomQuery>,
) -> Json<SymptomResponse> {
    Json(state.engine.answer(query).await)
}

async fn search_medicines(
    State(state): State<Arc<AppState>>,
    Json(search): Json<MedicineSearch>,
) -> ApiResult<MedicineSearchResponse> {
    let limit = clamp_limit(search.limit, DEFAULT_SEARCH_LIMIT);
    let medicines = state
        .engine
        .search()
        .search_medicines(&search.medicine_name, limit, &MedicineFilters::default())
        .await
        .map_err(|e| ApiError::internal("Error searching medicines", format!("{:#}", e)))?;

    Ok(Json(MedicineSearchResponse {
        count: medicines.len(),
        medicines,
    }))
}

async fn search_doctors(
    State(state): State<Arc<AppState>>,
    Json(search): Json<DoctorSearch>,
) -> ApiResult<DoctorSearchResponse> {
    let limit = clamp_limit(search.limit, DEFAULT_SEARCH_LIMIT);
    let filters = DoctorFilters {
        specialization: Some(search.specialization.clone()),
        min_satisfaction: None,
    };
    let doctors = state
        .engine
        .search()
        .search_doctors(&search.specialization, limit, &filters)
        .await
        .map_err(|e| ApiError::internal("Error searching doctors", format!("{:#}", e)))?;

    Ok(Json(DoctorSearchResponse {
        count: doctors.len(),
        doctors,
    }))
}

async fn get_medicine(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<MedicineDetails> {
    let medicine = state
        .ingestion
        .catalog()
        .medicine(&id)
        .await
        .map_err(|e| ApiError::internal("Error getting medicine details", format!("{:#}", e)))?
        .ok_or_else(|| ApiError::NotFound("Medicine not found".to_string()))?;

    Ok(Json(MedicineDetails { medicine }))
}

async fn get_doctor(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<DoctorDetails> {
    let doctor = state
        .ingestion
        .catalog()
        .doctor(&id)
        .await
        .map_err(|e| ApiError::internal("Error getting doctor details", format!("{:#}", e)))?
        .ok_or_else(|| ApiError::NotFound("Doctor not found".to_string()))?;

    let mut doctors = vec![doctor];
    state
        .ingestion
        .resolve_specializations(&mut doctors)
        .await
        .map_err(|e| ApiError::internal("Error getting doctor details", format!("{:#}", e)))?;
    let doctor = doctors.remove(0);

    Ok(Json(DoctorDetails {
        display_name: doctor.display_name(),
        doctor,
    }))
}

async fn list_specializations(
    State(state): State<Arc<AppState>>,
) -> ApiResult<SpecializationsResponse> {
    let specializations = state
        .ingestion
        .catalog()
        .specializations()
        .await
        .map_err(|e| ApiError::internal("Error getting specializations", format!("{:#}", e)))?;

    Ok(Json(SpecializationsResponse {
        count: specializations.len(),
        specializations,
    }))
}

async fn stats(State(state): State<Arc<AppState>>) -> ApiResult<StatsResponse> {
    let collections = state
        .engine
        .stats()
        .await
        .map_err(|e| ApiError::internal("Error getting stats", format!("{:#}", e)))?;

    Ok(Json(StatsResponse {
        status: "operational".to_string(),
        collections,
        timestamp: Utc::now(),
    }))
}

/// Spawned so a client disconnect or request timeout cannot cancel a run
/// halfway and leave the guard set.
async fn run_ingestion(
    state: Arc<AppState>,
    target: IngestTarget,
    message: &str,
) -> ApiResult<IngestResponse> {
    let pipeline = state.ingestion.clone();
    let reports = tokio::spawn(async move { pipeline.run(target).await })
        .await
        .map_err(|e| ApiError::internal("Ingestion task failed", e))??;

    let collections = state
        .engine
        .stats()
        .await
        .map_err(|e| ApiError::internal("Error getting stats", format!("{:#}", e)))?;

    Ok(Json(IngestResponse {
        message: message.to_string(),
        reports,
        collections,
    }))
}

async fn ingest_all(State(state): State<Arc<AppState>>) -> ApiResult<IngestResponse> {
    run_ingestion(state, IngestTarget::All, "Data ingestion completed successfully").await
}

async fn ingest_medicines(State(state): State<Arc<AppState>>) -> ApiResult<IngestResponse> {
    run_ingestion(
        state,
        IngestTarget::Medicines,
        "Medicine ingestion completed successfully",
    )
    .await
}

async fn ingest_doctors(State(state): State<Arc<AppState>>) -> ApiResult<IngestResponse> {
    run_ingestion(
        state,
        IngestTarget::Doctors,
        "Doctor ingestion completed successfully",
    )
    .await
}

async fn sync_record(
    state: Arc<AppState>,
    kind: CollectionKind,
    id: String,
) -> ApiResult<MessageResponse> {
    let found = state
        .ingestion
        .update_one(kind, &id)
        .await
        .map_err(|e| ApiError::internal("Error syncing record", format!("{:#}", e)))?;

    if !found {
        return Err(ApiError::NotFound(format!("{} record {} not found", kind, id)));
    }
    Ok(Json(MessageResponse {
        message: format!("Synced {} record {}", kind, id),
    }))
}

async fn sync_medicine(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<MessageResponse> {
    sync_record(state, CollectionKind::Medicines, id).await
}

async fn sync_doctor(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<MessageResponse> {
    sync_record(state, CollectionKind::Doctors, id).await
}

async fn ingest_status(State(state): State<Arc<AppState>>) -> Json<IngestStatus> {
    Json(state.ingestion.status().await)
}

async fn example_queries() -> Json<ExampleQueries> {
    Json(ExampleQueries::builtin())
}
