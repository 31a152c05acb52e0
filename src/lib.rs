pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

use crate::config::IngestConfig;
use crate::services::disk::{DiskGuard, SpaceProbe, SystemSpaceProbe};
use crate::services::ingest::{BatchLimits, FieldMap, IngestService};
use crate::services::rate_limit::{CounterStore, InMemoryCounterStore, RateLimiter};
use crate::services::scanner::create_scanner;
use crate::services::storage::ContentStore;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn,
    routing::{get, post},
};
use std::sync::Arc;
use std::time::Duration;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::upload::upload_files,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            api::handlers::upload::UploadResponse,
            api::handlers::health::HealthResponse,
            models::FileMetadata,
            models::Category,
        )
    ),
    tags(
        (name = "uploads", description = "File ingestion endpoints"),
        (name = "system", description = "Service health")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub ingest: Arc<IngestService>,
    pub limiter: RateLimiter,
    pub counters: Arc<dyn CounterStore>,
    pub batch_limits: BatchLimits,
    pub config: IngestConfig,
}

impl AppState {
    /// Builds the pipeline with the platform free-space probe.
    pub async fn from_config(config: IngestConfig) -> anyhow::Result<Self> {
        Self::with_probe(config, Arc::new(SystemSpaceProbe)).await
    }

    pub async fn with_probe(
        config: IngestConfig,
        probe: Arc<dyn SpaceProbe>,
    ) -> anyhow::Result<Self> {
        let store = ContentStore::open(&config.upload_root).await?;
        let scanner = Arc::from(create_scanner(&config.scanner_type));
        let disk_guard = DiskGuard::new(probe, store.root(), config.min_free_bytes);

        let ingest = IngestService::new(store, scanner, disk_guard)
            .with_unknown_signature_policy(config.unknown_signature_policy);

        let counters: Arc<dyn CounterStore> = Arc::new(InMemoryCounterStore::new());
        let limiter = RateLimiter::new(
            counters.clone(),
            config.uploads_per_hour,
            Duration::from_secs(3600),
        );

        let batch_limits = BatchLimits {
            fields: FieldMap::standard(),
            max_files: config.max_files_per_request,
            max_total_bytes: config.max_batch_bytes,
        };

        Ok(Self {
            ingest: Arc::new(ingest),
            limiter,
            counters,
            batch_limits,
            config,
        })
    }
}

pub fn create_app(state: AppState) -> Router {
    let body_limit = state.config.max_request_bytes;

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/upload", post(api::handlers::upload::upload_files))
        .route("/health", get(api::handlers::health::health_check))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .with_state(state)
}
