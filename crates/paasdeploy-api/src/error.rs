//! HTTP error mapping: the sentinel taxonomy in `paasdeploy_core::Error` to
//! the status codes every handler in this crate returns, per §7
//! ("handlers map the sentinel kind to an HTTP status (not specified here)").

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

#[derive(Debug)]
pub struct ApiError(pub paasdeploy_core::Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            paasdeploy_core::Error::NotFound(_) => StatusCode::NOT_FOUND,
            paasdeploy_core::Error::NoDeployAvailable => StatusCode::NOT_FOUND,
            paasdeploy_core::Error::AlreadyExists(_) => StatusCode::CONFLICT,
            paasdeploy_core::Error::DeployInProgress(_) => StatusCode::CONFLICT,
            paasdeploy_core::Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            paasdeploy_core::Error::Forbidden(_) => StatusCode::FORBIDDEN,
            paasdeploy_core::Error::QueueFull(_) => StatusCode::TOO_MANY_REQUESTS,
            paasdeploy_core::Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            paasdeploy_core::Error::Cancelled => StatusCode::CONFLICT,
            paasdeploy_core::Error::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let body = Json(json!({
            "error": self.0.to_string(),
            "kind": self.0.kind(),
        }));

        (status, body).into_response()
    }
}

impl From<paasdeploy_core::Error> for ApiError {
    fn from(err: paasdeploy_core::Error) -> Self {
        Self(err)
    }
}

impl From<paasdeploy_db::DbError> for ApiError {
    fn from(err: paasdeploy_db::DbError) -> Self {
        Self(err.into())
    }
}

impl From<paasdeploy_config::ConfigError> for ApiError {
    fn from(err: paasdeploy_config::ConfigError) -> Self {
        Self(paasdeploy_core::Error::InvalidInput(err.to_string()))
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
