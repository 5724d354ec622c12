//! JSON response envelope and API errors for the producer endpoints.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use herald_core::{PushError, RegistrationError};
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

/// `{"code": 200, "msg": "ok", "data": ...}`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    /// HTTP status code, repeated in the body.
    pub code: u16,
    /// Human-readable status.
    pub msg: String,
    /// Payload, omitted when empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    /// Successful response carrying `data`.
    pub fn ok(data: T) -> Self {
        Self {
            code: StatusCode::OK.as_u16(),
            msg: "ok".into(),
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    /// Successful response with no payload.
    pub fn empty() -> Self {
        Self {
            code: StatusCode::OK.as_u16(),
            msg: "ok".into(),
            data: None,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

/// Error returned by an HTTP handler.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Identity could not be resolved.
    #[error("unauthorized: {0}")]
    Unauthorized(#[from] RegistrationError),

    /// Malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The shared bus could not be reached.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl ApiError {
    /// Bad request with `msg`.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<PushError> for ApiError {
    fn from(error: PushError) -> Self {
        match error {
            PushError::Registration(e) => Self::Unauthorized(e),
            other => Self::ServiceUnavailable(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!(error = %self, "request failed");
        }
        let body = ApiResponse::<()> {
            code: status.as_u16(),
            msg: self.to_string(),
            data: None,
        };
        (status, Json(body)).into_response()
    }
}

/// Result alias for handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use herald_core::BusError;

    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), 10_000).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn ok_envelope() {
        let value = body_json(ApiResponse::ok(serde_json::json!({"delivered": 1})).into_response()).await;
        assert_eq!(value["code"], 200);
        assert_eq!(value["msg"], "ok");
        assert_eq!(value["data"]["delivered"], 1);
    }

    #[tokio::test]
    async fn empty_envelope_omits_data() {
        let value = body_json(ApiResponse::empty().into_response()).await;
        assert_eq!(value["code"], 200);
        assert!(value.get("data").is_none());
    }

    #[tokio::test]
    async fn unauthorized_maps_to_401() {
        let response = ApiError::from(RegistrationError::MissingCredentials).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let value = body_json(response).await;
        assert_eq!(value["code"], 401);
        assert!(value["msg"].as_str().unwrap().starts_with("unauthorized"));
    }

    #[test]
    fn push_errors_map_to_status() {
        let bus = ApiError::from(PushError::from(BusError::Unavailable("down".into())));
        assert_eq!(bus.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        let auth = ApiError::from(PushError::from(RegistrationError::Expired));
        assert_eq!(auth.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::bad_request("x").status_code(), StatusCode::BAD_REQUEST);
    }
}
