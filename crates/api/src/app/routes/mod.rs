use axum::Router;

pub mod journals;
pub mod system;

/// Router for all owner-scoped endpoints.
pub fn router() -> Router {
    Router::new().nest("/journals", journals::router())
}
