use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Failures reported by the storage engine and by storage clients.
///
/// The `Display` text is what the console shows to users, so keep it short
/// and free of internal detail.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("The specified bucket '{0}' does not exist")]
    BucketNotFound(String),
    #[error("The bucket '{0}' already exists")]
    BucketAlreadyExists(String),
    #[error("The bucket '{0}' is not empty")]
    BucketNotEmpty(String),
    #[error("The specified key '{key}' does not exist in bucket '{bucket}'")]
    ObjectNotFound { bucket: String, key: String },
    #[error("Invalid bucket name: {0}")]
    InvalidBucketName(String),
    #[error("Invalid object key: {0}")]
    InvalidObjectKey(String),
    #[error("Corrupt metadata: {0}")]
    CorruptMetadata(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Errors returned by the web console's HTTP handlers.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("{0}")]
    BadRequest(String),
    #[error("No console page matches '{0}'")]
    RouteNotFound(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: String,
    message: String,
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Storage(err) => match err {
                StorageError::BucketNotFound(_) => (StatusCode::NOT_FOUND, "NoSuchBucket"),
                StorageError::BucketAlreadyExists(_) => {
                    (StatusCode::CONFLICT, "BucketAlreadyOwnedByYou")
                }
                StorageError::BucketNotEmpty(_) => (StatusCode::CONFLICT, "BucketNotEmpty"),
                StorageError::ObjectNotFound { .. } => (StatusCode::NOT_FOUND, "NoSuchKey"),
                StorageError::InvalidBucketName(_) => {
                    (StatusCode::BAD_REQUEST, "InvalidBucketName")
                }
                StorageError::InvalidObjectKey(_) => (StatusCode::BAD_REQUEST, "InvalidObjectKey"),
                StorageError::CorruptMetadata(_) | StorageError::Io(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "InternalError")
                }
            },
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "InvalidRequest"),
            AppError::RouteNotFound(_) => (StatusCode::NOT_FOUND, "NoSuchRoute"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }

        let body = axum::Json(ErrorResponse {
            error: code.to_string(),
            code: code.to_string(),
            message: self.to_string(),
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_map_to_s3_codes() {
        let err = AppError::from(StorageError::ObjectNotFound {
            bucket: "my-bucket".into(),
            key: "a.txt".into(),
        });
        assert_eq!(err.status_and_code(), (StatusCode::NOT_FOUND, "NoSuchKey"));
        assert_eq!(
            err.to_string(),
            "The specified key 'a.txt' does not exist in bucket 'my-bucket'"
        );

        let err = AppError::from(StorageError::BucketNotEmpty("photos".into()));
        assert_eq!(err.status_and_code().0, StatusCode::CONFLICT);
    }

    #[test]
    fn io_errors_are_internal() {
        let err = AppError::from(StorageError::from(std::io::Error::other("disk gone")));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
