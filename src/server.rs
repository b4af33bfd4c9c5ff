//! HTTP front-end: upload form, upload handling, result page, raw image
//! serving.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::config::{ServerConfig, APP_VERSION};
use crate::error::AppError;
use crate::inference::{load_translator, Generator};
use crate::pages;
use crate::storage::{detect_image_format, sanitize_filename, ImageStore, StorageError, StoreKind};

/// Headroom on top of the file size limit for multipart framing.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Shared state handed to every handler.
pub struct AppState {
    pub store: ImageStore,
    pub generator: Generator,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    model: String,
    version: &'static str,
}

/// Build the router. `max_upload_bytes` bounds the uploaded file.
pub fn app_router(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(index).post(upload))
        .route("/result/:filename", get(result))
        .route("/uploads/:filename", get(serve_upload))
        .route("/outputs/:filename", get(serve_output))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(
            max_upload_bytes.saturating_add(MULTIPART_OVERHEAD),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Open storage, load the model, and serve until Ctrl-C or SIGTERM.
pub async fn start_server(config: ServerConfig) -> Result<(), ServerError> {
    let store = ImageStore::open(&config.upload_dir, &config.output_dir)?;
    let generator = Generator::new(load_translator(&config.model_path));

    let state = Arc::new(AppState { store, generator });
    let app = app_router(state.clone(), config.max_upload_bytes);

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;

    tracing::info!(
        addr = %addr,
        model = state.generator.model_name(),
        "Server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(ServerError::Serve)?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down gracefully...");
        },
    }
}

// ---------------------------------------------------------------------------
// Axum handlers
// ---------------------------------------------------------------------------

async fn index(State(state): State<Arc<AppState>>) -> Html<String> {
    Html(pages::index_page(state.generator.is_passthrough()))
}

async fn upload(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, AppError> {
    // Not a multipart form at all: no file was sent
    let Ok(mut multipart) = multipart else {
        tracing::debug!("Upload without a multipart body");
        return Ok(Redirect::to("/").into_response());
    };

    let Some((client_name, bytes)) = read_file_field(&mut multipart).await? else {
        tracing::debug!("Upload without a file field");
        return Ok(Redirect::to("/").into_response());
    };

    if client_name.is_empty() {
        tracing::debug!("Upload with empty filename");
        return Ok(Redirect::to("/").into_response());
    }

    let Some(filename) = sanitize_filename(&client_name) else {
        tracing::warn!(original = %client_name, "Filename sanitized to nothing");
        return Ok(Redirect::to("/").into_response());
    };

    if detect_image_format(&bytes).is_none() {
        tracing::warn!(filename = %filename, size = bytes.len(), "Rejected non-image upload");
        return Err(AppError::UnsupportedMedia(
            "Please upload a PNG, JPEG, GIF, BMP or WebP image.".to_string(),
        ));
    }

    state.store.save_upload(&filename, &bytes)?;
    tracing::info!(filename = %filename, size = bytes.len(), "Upload saved");

    state.generator.generate(&state.store, &filename).await?;

    Ok(Redirect::to(&format!("/result/{filename}")).into_response())
}

/// First `file` part that is a file upload, as `(client filename, bytes)`.
async fn read_file_field(multipart: &mut Multipart) -> Result<Option<(String, Bytes)>, AppError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        // A plain form value named `file` is not an upload
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let bytes = field.bytes().await.map_err(multipart_error)?;
        return Ok(Some((filename, bytes)));
    }
    Ok(None)
}

fn multipart_error(err: MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge
    } else {
        AppError::BadRequest(err.body_text())
    }
}

async fn result(Path(filename): Path<String>) -> Html<String> {
    Html(pages::result_page(&filename))
}

async fn serve_upload(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<Response, AppError> {
    serve_stored(&state.store, StoreKind::Upload, filename).await
}

async fn serve_output(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<Response, AppError> {
    serve_stored(&state.store, StoreKind::Output, filename).await
}

async fn serve_stored(
    store: &ImageStore,
    kind: StoreKind,
    filename: String,
) -> Result<Response, AppError> {
    let Some(file) = store.read(kind, &filename).await? else {
        return Err(AppError::NotFound(filename));
    };

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, file.content_type)
        .header(header::CONTENT_LENGTH, file.bytes.len().to_string())
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from(file.bytes))
        .unwrap_or_else(|_| {
            (StatusCode::INTERNAL_SERVER_ERROR, "Response build failed").into_response()
        }))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        model: state.generator.model_name().to_string(),
        version: APP_VERSION,
    })
}
