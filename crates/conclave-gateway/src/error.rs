//! HTTP error responses: `{"detail": "..."}` with a status per error kind

use axum::Json;
use axum::extract::multipart::MultipartError;
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use conclave_core::ConclaveError;

use crate::protocol::ErrorBody;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl ApiError {
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }
}

impl From<ConclaveError> for ApiError {
    fn from(err: ConclaveError) -> Self {
        let status = match &err {
            ConclaveError::Validation(_) => StatusCode::BAD_REQUEST,
            e if e.is_not_found() => StatusCode::NOT_FOUND,
            ConclaveError::Conflict(_)
            | ConclaveError::InUse { .. }
            | ConclaveError::SessionBusy(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", err);
        }
        Self {
            status,
            detail: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        Self::bad_request(format!("Failed to read upload: {}", err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { detail: self.detail })).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ConclaveError::validation("bad"), StatusCode::BAD_REQUEST),
            (ConclaveError::ProfileNotFound("x".into()), StatusCode::NOT_FOUND),
            (ConclaveError::SessionNotFound("x".into()), StatusCode::NOT_FOUND),
            (ConclaveError::KnowledgeSetNotFound("x".into()), StatusCode::NOT_FOUND),
            (ConclaveError::Conflict("x".into()), StatusCode::CONFLICT),
            (ConclaveError::in_use("x", "referenced"), StatusCode::CONFLICT),
            (ConclaveError::SessionBusy("x".into()), StatusCode::CONFLICT),
            (ConclaveError::UnknownAgentVariant("oracle".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (ConclaveError::Storage("disk".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status, expected);
        }
    }

    #[test]
    fn test_detail_is_error_message() {
        let api = ApiError::from(ConclaveError::ProfileNotFound("ghost".into()));
        assert_eq!(api.detail, "profile 'ghost' not found");
    }
}
