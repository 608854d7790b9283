use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::header::CONTENT_LENGTH;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::config::{Literal, Settings};
use crate::db::ProjectRepository;
use crate::files::{self, StoredFile, UploadWriter};
use crate::llm::LanguageModel;
use crate::models::{
    Asset, AssetConfig, AssetListResponse, AssetResponse, AssetType, CollectionResponse, EmbedRequest,
    EmbedResponse, GenerateRequest, GenerateResponse, HealthResponse, IndexActionResponse,
    NewAsset, UploadResponse, WelcomeResponse,
};
use crate::signals::ResponseSignal;
use crate::vectordb::{collection_name, VectorStore};

/// Multipart framing allowance on top of the configured file size limit.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    settings: Arc<Settings>,
    db: Arc<dyn ProjectRepository>,
    generation: Arc<dyn LanguageModel>,
    embedding: Arc<dyn LanguageModel>,
    vector_store: Arc<dyn VectorStore>,
}

impl AppState {
    pub fn new(
        settings: Arc<Settings>,
        db: Arc<dyn ProjectRepository>,
        generation: Arc<dyn LanguageModel>,
        embedding: Arc<dyn LanguageModel>,
        vector_store: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            settings,
            db,
            generation,
            embedding,
            vector_store,
        }
    }

    fn project_collection(&self, project_id: i64) -> String {
        collection_name(self.settings.llm.embedding_model_size, project_id)
    }
}

pub fn build_router(state: AppState) -> Router {
    let body_limit = usize::try_from(state.settings.files.max_size_bytes())
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route("/api/v1", get(welcome))
        .route("/api/v1/", get(welcome))
        .route("/api/v1/health", get(health))
        .route("/api/v1/data/upload/:project_id", post(upload_file))
        .route("/api/v1/data/assets/:project_id", get(list_assets))
        .route("/api/v1/data/assets/:project_id/:file_id", get(get_asset))
        .route("/api/v1/nlp/generate", post(generate))
        .route("/api/v1/nlp/embed", post(embed))
        .route("/api/v1/nlp/index/info/:project_id", get(index_info))
        .route("/api/v1/nlp/index/:project_id", delete(delete_index))
        .route("/api/v1/nlp/index/optimize/:project_id", post(optimize_index))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server<S>(addr: SocketAddr, state: AppState, shutdown: S) -> Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    let app = build_router(state);

    tracing::info!("listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn welcome(State(state): State<AppState>) -> Json<WelcomeResponse> {
    Json(WelcomeResponse {
        app_name: state.settings.app.name.clone(),
        app_version: state.settings.app.version.clone(),
    })
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database = match state.db.ping().await {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!("health check: {:#}", err);
            false
        }
    };
    let schema_version = if database {
        state.db.schema_version().await.ok().flatten()
    } else {
        None
    };

    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            database,
            schema_version,
            generation_backend: state.generation.backend().as_str().to_string(),
            embedding_backend: state.embedding.backend().as_str().to_string(),
            vector_db_backend: state.vector_store.backend_name().to_string(),
        }),
    )
}

async fn upload_file(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let project_id = valid_project_id(project_id)?;
    let settings = &state.settings.files;

    // Content-Length covers the whole multipart body, framing included.
    let declared_size = headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        .map(|length| length.saturating_sub(MULTIPART_OVERHEAD as u64));

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::new(StatusCode::BAD_REQUEST, ResponseSignal::FileUploadFailed, err.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let content_type = field.content_type().unwrap_or_default().to_string();
        files::validate_file(settings, Some(&content_type), declared_size)
            .map_err(|signal| ApiError::signal(StatusCode::BAD_REQUEST, signal))?;

        let original_name = field.file_name().unwrap_or("file").to_string();
        let mut writer = UploadWriter::create(settings, project_id, &original_name)
            .await
            .map_err(ApiError::upload)?;

        loop {
            match field.chunk().await {
                Ok(Some(chunk)) => {
                    if let Err(err) = writer.write_chunk(&chunk).await {
                        writer.abort().await;
                        return Err(ApiError::upload(err));
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    writer.abort().await;
                    return Err(ApiError::new(
                        StatusCode::BAD_REQUEST,
                        ResponseSignal::FileUploadFailed,
                        err.to_string(),
                    ));
                }
            }
        }

        let stored = writer.finish().await.map_err(ApiError::upload)?;
        let asset = match record_upload(state.db.as_ref(), project_id, &stored, original_name, content_type).await {
            Ok(asset) => asset,
            Err(err) => {
                files::discard(&stored.path).await;
                return Err(err.into());
            }
        };

        tracing::info!(
            project_id,
            file_id = %stored.file_id,
            bytes = stored.size,
            "file uploaded"
        );

        return Ok(Json(UploadResponse {
            signal: ResponseSignal::FileUploadSuccess,
            file_id: stored.file_id,
            asset_id: asset.asset_id,
        }));
    }

    Err(ApiError::new(
        StatusCode::BAD_REQUEST,
        ResponseSignal::FileUploadFailed,
        "multipart body has no `file` field",
    ))
}

async fn record_upload(
    db: &dyn ProjectRepository,
    project_id: i64,
    stored: &StoredFile,
    original_name: String,
    content_type: String,
) -> Result<Asset> {
    let project = db.get_or_create_project(project_id).await?;
    db.insert_asset(&NewAsset {
        asset_type: AssetType::File,
        asset_name: stored.file_id.clone(),
        asset_size: i64::try_from(stored.size).unwrap_or(i64::MAX),
        asset_config: AssetConfig {
            original_name,
            content_type,
            sha256: stored.sha256.clone(),
        },
        asset_project_id: project.project_id,
    })
    .await
}

async fn list_assets(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
) -> Result<Json<AssetListResponse>, ApiError> {
    let project_id = valid_project_id(project_id)?;
    let project = state
        .db
        .get_project(project_id)
        .await?
        .ok_or_else(|| ApiError::signal(StatusCode::NOT_FOUND, ResponseSignal::ProjectNotFound))?;

    let assets = state.db.list_assets(project.project_id, AssetType::File).await?;
    if assets.is_empty() {
        return Err(ApiError::signal(StatusCode::NOT_FOUND, ResponseSignal::NoFilesError));
    }

    Ok(Json(AssetListResponse {
        signal: ResponseSignal::FileValidatedSuccess,
        assets,
    }))
}

async fn get_asset(
    State(state): State<AppState>,
    Path((project_id, file_id)): Path<(i64, String)>,
) -> Result<Json<AssetResponse>, ApiError> {
    let project_id = valid_project_id(project_id)?;
    match state.db.get_asset(project_id, &file_id).await? {
        Some(asset) => Ok(Json(AssetResponse {
            signal: ResponseSignal::FileValidatedSuccess,
            asset,
        })),
        None => Err(ApiError::signal(StatusCode::NOT_FOUND, ResponseSignal::FileIdError)),
    }
}

async fn generate(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, ApiError> {
    if request.prompt.trim().is_empty() {
        return Err(ApiError::signal(StatusCode::BAD_REQUEST, ResponseSignal::InputEmpty));
    }

    if request.max_output_tokens == Some(0) {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            ResponseSignal::InvalidGenerationParameters,
            "max_output_tokens must be greater than zero",
        ));
    }
    if let Some(temperature) = request.temperature {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ApiError::new(
                StatusCode::BAD_REQUEST,
                ResponseSignal::InvalidGenerationParameters,
                format!("temperature {temperature} is outside 0.0..=2.0"),
            ));
        }
    }

    let llm = &state.settings.llm;
    let max_output_tokens = request.max_output_tokens.unwrap_or(llm.generation_max_tokens);
    let temperature = request.temperature.unwrap_or(llm.generation_temperature);

    let text = state
        .generation
        .generate_text(&request.prompt, max_output_tokens, temperature)
        .await
        .map_err(|err| ApiError::upstream(ResponseSignal::GenerationFailed, err))?;

    Ok(Json(GenerateResponse {
        signal: ResponseSignal::GenerationSuccess,
        text,
    }))
}

async fn embed(
    State(state): State<AppState>,
    Json(request): Json<EmbedRequest>,
) -> Result<Json<EmbedResponse>, ApiError> {
    if request.text.trim().is_empty() {
        return Err(ApiError::signal(StatusCode::BAD_REQUEST, ResponseSignal::InputEmpty));
    }

    let vector = state
        .embedding
        .embed_text(&request.text, request.document_type)
        .await
        .map_err(|err| ApiError::upstream(ResponseSignal::EmbeddingFailed, err))?;

    Ok(Json(EmbedResponse {
        signal: ResponseSignal::EmbeddingSuccess,
        size: vector.len(),
        vector,
    }))
}

async fn index_info(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
) -> Result<Json<CollectionResponse>, ApiError> {
    let name = state.project_collection(valid_project_id(project_id)?);
    let collection = state
        .vector_store
        .collection_info(&name)
        .await
        .map_err(ApiError::vectordb)?;

    Ok(Json(CollectionResponse {
        signal: ResponseSignal::VectordbCollectionRetrieved,
        collection,
    }))
}

async fn delete_index(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
) -> Result<Json<IndexActionResponse>, ApiError> {
    let name = state.project_collection(valid_project_id(project_id)?);
    let applied = state
        .vector_store
        .delete_collection(&name)
        .await
        .map_err(ApiError::vectordb)?;

    Ok(Json(IndexActionResponse {
        signal: ResponseSignal::VectordbCollectionDeleted,
        collection: name,
        applied,
    }))
}

async fn optimize_index(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
) -> Result<Json<IndexActionResponse>, ApiError> {
    let name = state.project_collection(valid_project_id(project_id)?);
    let applied = state
        .vector_store
        .optimize_collection(&name)
        .await
        .map_err(ApiError::vectordb)?;

    Ok(Json(IndexActionResponse {
        signal: ResponseSignal::VectordbCollectionOptimized,
        collection: name,
        applied,
    }))
}

/// Project ids are caller-chosen but must be positive; they name directories
/// and collections.
fn valid_project_id(project_id: i64) -> Result<i64, ApiError> {
    if project_id > 0 {
        Ok(project_id)
    } else {
        Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            ResponseSignal::InvalidProjectId,
            format!("project id {project_id} must be positive"),
        ))
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    signal: Option<ResponseSignal>,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, signal: ResponseSignal, message: impl Into<String>) -> Self {
        Self {
            status,
            signal: Some(signal),
            message: message.into(),
        }
    }

    fn signal(status: StatusCode, signal: ResponseSignal) -> Self {
        Self::new(status, signal, signal.as_str())
    }

    fn upload(err: files::UploadError) -> Self {
        tracing::warn!("upload rejected: {}", err);
        Self::new(StatusCode::BAD_REQUEST, err.signal(), err.to_string())
    }

    fn upstream(signal: ResponseSignal, err: anyhow::Error) -> Self {
        tracing::error!("provider request failed: {:#}", err);
        Self::new(StatusCode::BAD_GATEWAY, signal, format!("{:#}", err))
    }

    fn vectordb(err: anyhow::Error) -> Self {
        tracing::error!("vector store request failed: {:#}", err);
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            ResponseSignal::VectordbError,
            format!("{:#}", err),
        )
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(value: anyhow::Error) -> Self {
        tracing::error!("request failed: {:#}", value);
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            signal: None,
            message: value.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "signal": self.signal, "error": self.message });
        (self.status, Json(body)).into_response()
    }
}
