use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::error;

use journal_infra::services::QueryError;
use journal_infra::store::StoreError;

pub fn query_error_to_response(err: QueryError) -> axum::response::Response {
    match err {
        QueryError::InvalidArgument(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        QueryError::Store(e) => store_error_to_response(e),
    }
}

/// Storage failures are logged in full and reported without detail.
pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    error!(error = %err, "storage failure while serving request");
    internal_error()
}

pub fn internal_error() -> axum::response::Response {
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "internal error")
}

pub fn not_found() -> axum::response::Response {
    json_error(StatusCode::NOT_FOUND, "not_found", "journal not found")
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
