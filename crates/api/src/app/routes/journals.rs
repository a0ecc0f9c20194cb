use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Extension, Path, Query,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use journal_core::JournalId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::OwnerContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_journals).post(create_journal))
        // Older clients post to the explicit create path.
        .route("/create", post(create_journal))
        .route("/paged", get(list_journals_paged))
        .route("/:id", get(get_journal))
}

pub async fn create_journal(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    body: Result<Json<dto::CreateJournalRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "validation_error",
                rejection.body_text(),
            );
        }
    };

    match services
        .creator
        .create(owner.owner_id().clone(), body.content)
        .await
    {
        Ok(entry) => (
            StatusCode::CREATED,
            Json(dto::CreateJournalResponse::created(entry)),
        )
            .into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn list_journals(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
) -> axum::response::Response {
    match services.queries.list(owner.owner_id()).await {
        Ok(entries) => Json(
            entries
                .into_iter()
                .map(dto::JournalResponse::from)
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(e) => errors::query_error_to_response(e),
    }
}

pub async fn list_journals_paged(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    params: Result<Query<dto::PageParams>, QueryRejection>,
) -> axum::response::Response {
    let Query(params) = match params {
        Ok(p) => p,
        Err(rejection) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "validation_error",
                rejection.body_text(),
            );
        }
    };

    match services
        .queries
        .page(owner.owner_id(), params.page(), params.size())
        .await
    {
        Ok(page) => Json(dto::PaginatedJournalResponse::from(page)).into_response(),
        Err(e) => errors::query_error_to_response(e),
    }
}

/// Unknown, foreign-owned and malformed ids all answer the same 404.
pub async fn get_journal(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let Ok(id) = id.parse::<JournalId>() else {
        return errors::not_found();
    };

    match services.queries.get(owner.owner_id(), id).await {
        Ok(Some(entry)) => Json(dto::JournalResponse::from(entry)).into_response(),
        Ok(None) => errors::not_found(),
        Err(e) => errors::query_error_to_response(e),
    }
}
