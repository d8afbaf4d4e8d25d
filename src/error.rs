use axum::response::{IntoResponse, Response};
use http::{header, StatusCode};
use serde_json::json;

#[derive(Debug)]
pub enum AppError {
    Validation(String),
    NotFound(String),
    Permission(String),
    InvalidState(String),
    TooManyRequests(u64),
    ResourceFault(String),
    InternalServerError(anyhow::Error),
}

impl AppError {
    pub fn validation<T>(t: T) -> Self
    where
        T: ToString,
    {
        AppError::Validation(t.to_string())
    }

    pub fn not_found<T>(t: T) -> Self
    where
        T: ToString,
    {
        AppError::NotFound(t.to_string())
    }

    pub fn permission<T>(t: T) -> Self
    where
        T: ToString,
    {
        AppError::Permission(t.to_string())
    }

    pub fn invalid_state<T>(t: T) -> Self
    where
        T: ToString,
    {
        AppError::InvalidState(t.to_string())
    }

    pub fn resource_fault<T>(t: T) -> Self
    where
        T: ToString,
    {
        AppError::ResourceFault(t.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Validation(err) => (StatusCode::BAD_REQUEST, err).into_response(),
            AppError::NotFound(err) => (StatusCode::NOT_FOUND, err).into_response(),
            AppError::Permission(err) => (StatusCode::FORBIDDEN, err).into_response(),
            AppError::InvalidState(err) => (StatusCode::CONFLICT, err).into_response(),
            AppError::TooManyRequests(retry_after) => {
                let body = json!({
                    "status": 429,
                    "error": "Too Many Requests",
                    "message": "Rate limit exceeded. Please retry later.",
                })
                .to_string();
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    [
                        (header::RETRY_AFTER, retry_after.to_string()),
                        (header::CONTENT_TYPE, "application/json".to_string()),
                    ],
                    body,
                )
                    .into_response()
            }
            AppError::ResourceFault(err) => {
                (StatusCode::INTERNAL_SERVER_ERROR, err).into_response()
            }
            AppError::InternalServerError(err) => {
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
            }
        }
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        AppError::InternalServerError(err.into())
    }
}
