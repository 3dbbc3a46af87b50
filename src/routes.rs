use crate::{
    captioner::{caption_file, Caption, CaptionError, Captioner, ImageInfo},
    error::ApiError,
    page,
    state::AppState,
    styles::{catalog, Style, StyleInfo},
    upload::{allowed_file, secure_filename, StagedFile, MAX_BATCH_FILES, MAX_CONTENT_LENGTH},
};
use axum::{
    body::Bytes,
    extract::{
        multipart::{Multipart, MultipartRejection},
        DefaultBodyLimit, State,
    },
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::{any::Any, path::PathBuf, sync::Arc};
use tower::ServiceBuilder;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};
use tokio::task::JoinError;
use tracing::{error, info, warn};

const INVALID_FILE_TYPE: &str = "Invalid file type. Use JPG, PNG, WebP, or BMP";
const INVALID_STYLE: &str = "Invalid style. Use creative, technical, or simple";
const INTERNAL_ERROR: &str = "Internal server error";

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
    pub models_loaded: bool,
    pub device: String,
}

#[derive(Serialize, Deserialize)]
pub struct StylesResponse {
    pub styles: Vec<StyleInfo>,
}

#[derive(Serialize, Deserialize)]
pub struct CaptionResponse {
    pub caption: String,
    pub confidence: f32,
    pub style: Style,
    pub image_info: ImageInfo,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
#[serde(untagged)]
pub enum BatchEntry {
    Captioned {
        filename: String,
        caption: String,
        confidence: f32,
        success: bool,
    },
    Failed {
        filename: String,
        error: String,
        success: bool,
    },
}

impl BatchEntry {
    fn from_result(filename: String, result: Result<Caption, CaptionError>) -> Self {
        match result {
            Ok(caption) => Self::Captioned {
                filename,
                caption: caption.text,
                confidence: caption.confidence,
                success: true,
            },
            Err(e) => {
                warn!("failed to caption {}: {}", filename, e);
                Self::Failed {
                    filename,
                    error: e.to_string(),
                    success: false,
                }
            }
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct BatchResponse {
    pub captions: Vec<BatchEntry>,
    pub total_processed: usize,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(page::index))
        .route("/health", get(health))
        .route("/styles", get(styles))
        .route("/caption", post(caption_image))
        .route("/batch-caption", post(batch_caption))
        .layer(DefaultBodyLimit::max(MAX_CONTENT_LENGTH))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CatchPanicLayer::custom(handle_panic))
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    ApiError::internal(anyhow::anyhow!("handler panicked: {detail}")).into_response()
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        message: "Image Captioning API is running".to_string(),
        models_loaded: state.models_loaded(),
        device: state.device().to_string(),
    })
}

async fn styles() -> Json<StylesResponse> {
    Json(StylesResponse { styles: catalog() })
}

async fn caption_image(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<CaptionResponse>, ApiError> {
    let form = UploadForm::read(multipart?).await?;

    let file = form
        .files_named("file")
        .next()
        .ok_or_else(|| ApiError::bad_request("No file provided"))?;
    if file.filename.is_empty() {
        return Err(ApiError::bad_request("No file selected"));
    }
    if !allowed_file(&file.filename) {
        return Err(ApiError::bad_request(INVALID_FILE_TYPE));
    }

    let style = match form.style.as_deref() {
        Some(value) => value
            .parse::<Style>()
            .map_err(|_| ApiError::bad_request(INVALID_STYLE))?,
        None => Style::default(),
    };

    let captioner = state.captioner()?;

    let filename = secure_filename(&file.filename);
    let staged = StagedFile::write(state.upload_dir(), &filename, &file.bytes)
        .await
        .map_err(ApiError::internal)?;

    let (caption, image_info) = caption_staged(captioner, staged.path().to_path_buf(), style)
        .await
        .map_err(ApiError::internal)??;
    info!("captioned {} ({})", filename, style);

    Ok(Json(CaptionResponse {
        caption: caption.text,
        confidence: caption.confidence,
        style,
        image_info,
    }))
}

async fn batch_caption(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<BatchResponse>, ApiError> {
    let form = UploadForm::read(multipart?).await?;

    let files: Vec<&FilePart> = form.files_named("files").collect();
    if files.is_empty() {
        return Err(ApiError::bad_request("No files provided"));
    }

    let style = form
        .style
        .as_deref()
        .map(Style::parse_or_default)
        .unwrap_or_default();

    let captioner = state.captioner()?;

    let mut captions = Vec::new();
    for file in files.into_iter().take(MAX_BATCH_FILES) {
        if !allowed_file(&file.filename) {
            continue;
        }

        let filename = secure_filename(&file.filename);
        let staged = StagedFile::write(state.upload_dir(), &filename, &file.bytes)
            .await
            .map_err(ApiError::internal)?;

        let outcome = caption_staged(captioner.clone(), staged.path().to_path_buf(), style).await;
        drop(staged);

        let entry = match outcome {
            Ok(result) => BatchEntry::from_result(filename, result.map(|(caption, _)| caption)),
            Err(e) => {
                error!("inference worker failed on {}: {}", filename, e);
                BatchEntry::Failed {
                    filename,
                    error: INTERNAL_ERROR.to_string(),
                    success: false,
                }
            }
        };
        captions.push(entry);
    }

    info!("batch captioned {} file(s) ({})", captions.len(), style);

    Ok(Json(BatchResponse {
        total_processed: captions.len(),
        captions,
    }))
}

/// Runs decoding and inference on the blocking pool.
///
/// The outer error is a panicked or cancelled worker. Its text is for the log only.
async fn caption_staged(
    captioner: Arc<dyn Captioner>,
    path: PathBuf,
    style: Style,
) -> Result<Result<(Caption, ImageInfo), CaptionError>, JoinError> {
    tokio::task::spawn_blocking(move || caption_file(captioner.as_ref(), &path, style)).await
}

struct FilePart {
    field: String,
    filename: String,
    bytes: Bytes,
}

/// Multipart body read fully into memory, bounded by the request body limit.
struct UploadForm {
    files: Vec<FilePart>,
    style: Option<String>,
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut files = Vec::new();
        let mut style = None;

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            // parts without a filename are plain form values, not uploads
            match field.file_name().map(str::to_string) {
                Some(filename) => files.push(FilePart {
                    field: name,
                    filename,
                    bytes: field.bytes().await?,
                }),
                None if name == "style" => style = Some(field.text().await?),
                None => {}
            }
        }

        Ok(Self { files, style })
    }

    fn files_named<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a FilePart> + 'a {
        self.files.iter().filter(move |file| file.field == field)
    }
}
