// SPDX-License-Identifier: MIT

//! Web UI and JSON API for the gallery.

use axum::{
    extract::{Multipart, Query, State},
    http::StatusCode,
    response::{Html, Json},
    routing::{get, post},
    Router,
};
use minijinja::{context, Environment};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::info;

use crate::config::AppConfig;
use crate::metadata::{self, merge, sensitivity, CanonicalMetadata};
use crate::store::{GalleryStore, ImageRecord, SearchFilter};

/// Shared application state
pub struct AppState {
    pub store: Mutex<GalleryStore>,
    pub config: AppConfig,
    pub templates: Environment<'static>,
}

impl AppState {
    pub fn new(store: GalleryStore, config: AppConfig) -> crate::Result<Self> {
        let mut templates = Environment::new();
        templates.add_template("index", include_str!("../../templates/index.html"))?;
        Ok(Self {
            store: Mutex::new(store),
            config,
            templates,
        })
    }
}

/// Create the web application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let uploads = ServeDir::new(&state.config.storage.upload_dir);
    Router::new()
        // Pages
        .route("/", get(index_page))
        // API endpoints
        .route("/images", get(api_get_images))
        .route("/models", get(api_get_models))
        .route("/search", get(api_search))
        .route("/extract_metadata", post(api_extract_metadata))
        .route("/upload", post(api_upload))
        .route("/update_nsfw", post(api_update_nsfw))
        .nest_service("/uploads", uploads)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

type ApiError = (StatusCode, Json<ErrorResponse>);

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn server_error(message: impl Into<String>) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

// === Page Handlers ===

async fn index_page(State(state): State<Arc<AppState>>) -> Result<Html<String>, ApiError> {
    let store = state.store.lock().map_err(|_| server_error("store lock"))?;
    let images: Vec<ImageRecord> = store.all().into_iter().cloned().collect();
    let models = store.models();
    let categories = store.categories();
    drop(store);

    let template = state
        .templates
        .get_template("index")
        .map_err(|e| server_error(e.to_string()))?;
    let html = template
        .render(context! {
            images => images,
            models => models,
            categories => categories,
        })
        .map_err(|e| server_error(e.to_string()))?;
    Ok(Html(html))
}

// === API Handlers ===

async fn api_get_images(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ImageRecord>>, ApiError> {
    let store = state.store.lock().map_err(|_| server_error("store lock"))?;
    Ok(Json(store.all().into_iter().cloned().collect()))
}

async fn api_get_models(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<String>>, ApiError> {
    let store = state.store.lock().map_err(|_| server_error("store lock"))?;
    Ok(Json(store.models()))
}

#[derive(Deserialize)]
struct SearchQuery {
    q: Option<String>,
    category: Option<String>,
    model: Option<String>,
    tool: Option<String>,
}

async fn api_search(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<ImageRecord>>, ApiError> {
    let filter = SearchFilter {
        text: query.q.filter(|q| !q.is_empty()),
        category: query.category.filter(|c| !c.is_empty()),
        model: query.model.filter(|m| !m.is_empty()),
        tool: query.tool.filter(|t| !t.is_empty()),
    };
    let store = state.store.lock().map_err(|_| server_error("store lock"))?;
    Ok(Json(store.search(&filter).into_iter().cloned().collect()))
}

/// Extract metadata from an uploaded image without storing it.
async fn api_extract_metadata(
    mut multipart: Multipart,
) -> Result<Json<CanonicalMetadata>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.to_string()))?
    {
        if field.name() == Some("image") {
            let bytes = field.bytes().await.map_err(|e| bad_request(e.to_string()))?;
            return Ok(Json(metadata::extract_from_bytes(&bytes)));
        }
    }
    Err(bad_request("no image field in request"))
}

#[derive(Default)]
struct UploadForm {
    file: Option<(String, Vec<u8>)>,
    category: Option<String>,
    overlay: CanonicalMetadata,
}

async fn read_upload_form(multipart: &mut Multipart) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.to_string()))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if name == "image" {
            let original = field
                .file_name()
                .unwrap_or("upload.png")
                .to_string();
            let bytes = field.bytes().await.map_err(|e| bad_request(e.to_string()))?;
            form.file = Some((original, bytes.to_vec()));
            continue;
        }
        let text = field.text().await.map_err(|e| bad_request(e.to_string()))?;
        match name.as_str() {
            "category" => form.category = Some(text),
            "prompt" => form.overlay.prompt = text,
            "negative_prompt" => form.overlay.negative_prompt = text,
            "steps" => form.overlay.steps = text,
            "sampler" => form.overlay.sampler = text,
            "cfg_scale" => form.overlay.cfg_scale = text,
            "seed" => form.overlay.seed = text,
            "size" => form.overlay.size = text,
            "model_name" => {
                form.overlay.model_name = text.clone();
                form.overlay.model = text;
            }
            "tools" => {
                form.overlay.tools = text
                    .split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(String::from)
                    .collect();
            }
            _ => {}
        }
    }
    Ok(form)
}

#[derive(Serialize)]
struct UploadResponse {
    success: bool,
    filename: String,
    metadata: CanonicalMetadata,
    is_nsfw: bool,
}

/// Store an uploaded image: extract its metadata, overlay form fields, and
/// add it to the gallery.
async fn api_upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let form = read_upload_form(&mut multipart).await?;
    let Some((original_filename, bytes)) = form.file else {
        return Err(bad_request("no image field in request"));
    };
    let Some(category) = form.category.filter(|c| !c.is_empty()) else {
        return Err(bad_request("category is required"));
    };
    if form.overlay.tools.is_empty() {
        return Err(bad_request("at least one tools entry is required"));
    }

    let file_hash = blake3::hash(&bytes).to_hex().to_string();

    let extracted = metadata::extract_partial(&bytes);
    // Either the embedded metadata or the form wins, per config; the loser
    // still fills any gaps.
    let mut merged = if state.config.extraction.prefer_form_fields {
        let mut merged = form.overlay.clone();
        merged.fill_from(&extracted);
        merged
    } else {
        let mut merged = extracted;
        merged.fill_from(&form.overlay);
        merged
    };
    if merged.size.is_empty() {
        if let Some(dims) = metadata::containers::probe_dimensions(&bytes) {
            merged.size = dims;
        }
    }
    let mut meta = merge::finalize(merged);
    meta.is_nsfw = sensitivity::classify_with_terms(
        &format!("{} {}", meta.prompt, meta.negative_prompt),
        &state.config.extraction.extra_sensitive_terms,
    );

    let extension = Path::new(&original_filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("png");
    // Timestamped name; the uuid suffix disambiguates same-instant uploads.
    let filename = format!(
        "{}_{}.{}",
        chrono::Utc::now().format("%Y%m%d_%H%M%S"),
        uuid::Uuid::new_v4().simple(),
        extension
    );

    let mut store = state.store.lock().map_err(|_| server_error("store lock"))?;
    if store.contains_hash(&file_hash) {
        return Err(bad_request("this image is already in the gallery"));
    }

    let upload_dir = Path::new(&state.config.storage.upload_dir);
    std::fs::create_dir_all(upload_dir).map_err(|e| server_error(e.to_string()))?;
    std::fs::write(upload_dir.join(&filename), &bytes)
        .map_err(|e| server_error(e.to_string()))?;

    let record = ImageRecord {
        filename: filename.clone(),
        original_filename,
        upload_date: chrono::Utc::now(),
        category,
        file_hash,
        metadata: meta,
    };
    store
        .insert(record.clone())
        .map_err(|e| server_error(e.to_string()))?;

    info!("stored {} ({})", filename, record.category);
    Ok(Json(UploadResponse {
        success: true,
        is_nsfw: record.metadata.is_nsfw,
        filename,
        metadata: record.metadata,
    }))
}

#[derive(Deserialize)]
struct UpdateNsfwRequest {
    filename: String,
    is_nsfw: bool,
}

#[derive(Serialize)]
struct UpdateNsfwResponse {
    filename: String,
    is_nsfw: bool,
}

async fn api_update_nsfw(
    State(state): State<Arc<AppState>>,
    Json(request): Json<UpdateNsfwRequest>,
) -> Result<Json<UpdateNsfwResponse>, ApiError> {
    let mut store = state.store.lock().map_err(|_| server_error("store lock"))?;
    store
        .set_nsfw(&request.filename, request.is_nsfw)
        .map_err(|e| bad_request(e.to_string()))?;
    Ok(Json(UpdateNsfwResponse {
        filename: request.filename,
        is_nsfw: request.is_nsfw,
    }))
}

/// Start the web server with config and store
pub async fn start_server(config: AppConfig, store: GalleryStore) -> crate::Result<()> {
    let addr = format!("{}:{}", config.web.host, config.web.port);
    let state = Arc::new(AppState::new(store, config)?);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Gallery available at http://{}", addr);

    let router = create_router(state);
    axum::serve(listener, router)
        .await
        .map_err(|e| crate::PromptpixError::Server(e.to_string()))?;

    Ok(())
}
