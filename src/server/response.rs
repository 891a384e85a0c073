use axum::{
    Json,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;

use crate::error::{AuthRejection, Error, Result as CrateResult};

/// Standard API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    #[must_use]
    pub fn success(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
        }
    }
}

/// API error that converts to a proper HTTP response
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "data": null, "error": self.message });
        let mut response = (self.status, Json(body)).into_response();

        if self.status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                "WWW-Authenticate",
                HeaderValue::from_static("HMAC realm=\"deepsea\""),
            );
        }

        response
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Authorization(AuthRejection::QuotaExceeded) => {
                Self::forbidden(AuthRejection::QuotaExceeded.reason())
            }
            Error::Authorization(rejection) => Self::unauthorized(rejection.reason()),
            Error::OwnershipConflict(name) => {
                Self::conflict(format!("Repository name already owned: {name}"))
            }
            Error::Decode(e) => Self::bad_request(e.to_string()),
            Error::NotFound => Self::not_found("Not found"),
            other => {
                tracing::error!("Request failed: {other}");
                Self::internal("Internal server error")
            }
        }
    }
}

/// Extension trait for converting crate results to API errors with a custom message.
pub trait ResultExt<T> {
    fn api_err(self, message: &'static str) -> Result<T, ApiError>;
}

impl<T> ResultExt<T> for CrateResult<T> {
    fn api_err(self, message: &'static str) -> Result<T, ApiError> {
        self.map_err(|e| {
            tracing::error!("{message}: {e}");
            ApiError::internal(message)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_errors_use_the_response_envelope() {
        let response = ApiError::from(Error::Authorization(AuthRejection::SignatureMismatch))
            .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key("WWW-Authenticate"));

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["data"], serde_json::Value::Null);
        assert_eq!(json["error"], "Signature mismatch");
    }

    #[test]
    fn test_error_status_mapping() {
        let status = |e: Error| ApiError::from(e).status;
        assert_eq!(
            status(Error::Authorization(AuthRejection::QuotaExceeded)),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status(Error::Authorization(AuthRejection::InvalidKey)),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status(Error::OwnershipConflict("b".to_string())),
            StatusCode::CONFLICT
        );
        assert_eq!(status(Error::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(
            status(Error::Config("broken".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
