use crate::services::{
    account_service::AccountError, library_service::LibraryError, storage_service::StorageError,
};
use axum::{
    Json,
    extract::multipart::MultipartError,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, msg)
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, msg)
    }

    pub fn payload_too_large(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::PAYLOAD_TOO_LARGE, msg)
    }

    /// Log the real cause and hide it from the client.
    fn hidden(err: &dyn std::error::Error) -> Self {
        tracing::error!("internal error: {}", err);
        Self::internal("Internal server error")
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        let mut response = (self.status, body).into_response();
        if self.status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("internal error: {:#}", err);
        AppError::internal("Internal server error")
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match &err {
            StorageError::ObjectNotFound { .. } => AppError::not_found("File not found"),
            StorageError::ObjectAlreadyExists { .. } => AppError::conflict(err.to_string()),
            StorageError::ObjectTooLarge { .. } => AppError::payload_too_large(err.to_string()),
            StorageError::AccessDenied(_) => {
                AppError::forbidden("Object path is outside your storage namespace")
            }
            StorageError::InvalidObjectKey => AppError::bad_request(err.to_string()),
            StorageError::IncomingBody(inner) => match inner.downcast_ref::<MultipartError>() {
                Some(multipart) => AppError::new(multipart.status(), multipart.body_text()),
                None => AppError::bad_request(err.to_string()),
            },
            StorageError::BucketNotFound(_) | StorageError::Sqlx(_) | StorageError::Io(_) => {
                AppError::hidden(&err)
            }
        }
    }
}

impl From<LibraryError> for AppError {
    fn from(err: LibraryError) -> Self {
        match err {
            LibraryError::InvalidInput(msg) => AppError::bad_request(msg),
            LibraryError::EmptyFile => AppError::bad_request("Uploaded file is empty"),
            quota @ LibraryError::QuotaExceeded { .. } => {
                AppError::payload_too_large(quota.to_string())
            }
            LibraryError::BookNotFound(_) => AppError::not_found("Book not found"),
            LibraryError::Storage(inner) => inner.into(),
            LibraryError::Sqlx(ref inner) => AppError::hidden(inner),
        }
    }
}

impl From<AccountError> for AppError {
    fn from(err: AccountError) -> Self {
        match &err {
            AccountError::InvalidInput(msg) => AppError::bad_request(msg.clone()),
            AccountError::EmailTaken => AppError::conflict(err.to_string()),
            AccountError::InvalidCredentials | AccountError::InvalidSession => {
                AppError::unauthorized(err.to_string())
            }
            AccountError::Forbidden => AppError::forbidden(err.to_string()),
            AccountError::ProfileNotFound | AccountError::UserNotFound(_) => {
                AppError::not_found(err.to_string())
            }
            AccountError::RoleAlreadyAssigned(_) => AppError::conflict(err.to_string()),
            AccountError::RoleNotAssigned(_) => AppError::not_found(err.to_string()),
            AccountError::Password(_)
            | AccountError::Jwt(_)
            | AccountError::Sqlx(_)
            | AccountError::TaskJoin(_) => AppError::hidden(&err),
        }
    }
}
