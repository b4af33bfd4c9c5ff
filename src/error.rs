//! HTTP-facing errors rendered as HTML pages for the browser.

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};

use crate::inference::InferenceError;
use crate::pages;
use crate::storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Unsupported media: {0}")]
    UnsupportedMedia(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Upload too large")]
    PayloadTooLarge,
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, heading, message) = match &self {
            AppError::UnsupportedMedia(detail) => (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "Unsupported file",
                detail.clone(),
            ),
            AppError::NotFound(detail) => (StatusCode::NOT_FOUND, "Not found", detail.clone()),
            AppError::BadRequest(detail) => {
                (StatusCode::BAD_REQUEST, "Invalid request", detail.clone())
            }
            AppError::PayloadTooLarge => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "Upload too large",
                "The file exceeds the upload size limit".to_string(),
            ),
            AppError::Internal(detail) => {
                tracing::error!(detail, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Something went wrong",
                    "An internal error occurred".to_string(),
                )
            }
        };

        (status, Html(pages::error_page(heading, &message))).into_response()
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<InferenceError> for AppError {
    fn from(err: InferenceError) -> Self {
        match err {
            // Sniffed as an image but the decoder rejected it
            InferenceError::Decode(e) => {
                AppError::UnsupportedMedia(format!("Could not decode image: {e}"))
            }
            other => AppError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_text(response: Response) -> String {
        let body = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn unsupported_media_returns_415_page() {
        let response = AppError::UnsupportedMedia("not an image".into()).into_response();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "text/html; charset=utf-8"
        );
        assert!(body_text(response).await.contains("not an image"));
    }

    #[tokio::test]
    async fn not_found_returns_404() {
        let response = AppError::NotFound("missing.png".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn bad_request_returns_400() {
        let response = AppError::BadRequest("malformed multipart".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn payload_too_large_returns_413() {
        let response = AppError::PayloadTooLarge.into_response();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn internal_hides_details() {
        let response = AppError::Internal("disk on fire at /srv/outputs".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let text = body_text(response).await;
        assert!(text.contains("An internal error occurred"));
        assert!(!text.contains("/srv/outputs"));
    }

    #[test]
    fn decode_failure_maps_to_unsupported_media() {
        let decode = image::load_from_memory(b"\x89PNG\r\n\x1a\ngarbage").unwrap_err();
        let err: AppError = InferenceError::Decode(decode).into();
        assert!(matches!(err, AppError::UnsupportedMedia(_)));
    }

    #[test]
    fn inference_failure_maps_to_internal() {
        let err: AppError = InferenceError::Inference("forward failed".into()).into();
        assert!(matches!(err, AppError::Internal(_)));
    }

    #[test]
    fn storage_failure_maps_to_internal() {
        let err: AppError = StorageError::Io {
            path: "/srv/uploads/a.png".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        }
        .into();
        assert!(matches!(err, AppError::Internal(_)));
    }
}
