//! Maps [`MeridianError`] onto an HTTP response, the way `orbit-web`'s
//! `WebError` maps onto `axum::response::Response` — except the mapping
//! itself is driven by [`MeridianError::category`] (spec §7) rather than a
//! one-variant-per-arm match, so every new `MeridianError` variant gets a
//! status for free.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::{ErrorCategory, MeridianError};

pub type ApiResult<T> = Result<T, ApiError>;

pub struct ApiError(pub MeridianError);

impl From<MeridianError> for ApiError {
    fn from(e: MeridianError) -> Self {
        ApiError(e)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error_kind: &'static str,
    message: String,
    request_id: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let category = self.0.category();
        let status = match category {
            ErrorCategory::Transient | ErrorCategory::RateLimited => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCategory::AuthExpired => StatusCode::UNAUTHORIZED,
            ErrorCategory::NotFound => StatusCode::NOT_FOUND,
            ErrorCategory::Conflict => StatusCode::CONFLICT,
            ErrorCategory::Safety => StatusCode::FORBIDDEN,
            ErrorCategory::Fatal => StatusCode::BAD_REQUEST,
        };

        let body = ErrorBody {
            error_kind: category_name(category),
            message: self.0.to_string(),
            request_id: None,
        };

        (status, Json(body)).into_response()
    }
}

fn category_name(category: ErrorCategory) -> &'static str {
    match category {
        ErrorCategory::Transient => "transient",
        ErrorCategory::RateLimited => "rate_limited",
        ErrorCategory::AuthExpired => "auth_expired",
        ErrorCategory::NotFound => "not_found",
        ErrorCategory::Conflict => "conflict",
        ErrorCategory::Fatal => "fatal",
        ErrorCategory::Safety => "safety",
    }
}
