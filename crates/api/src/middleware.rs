use axum::{
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::Next,
    response::Response,
};

use journal_core::OwnerId;

use crate::context::OwnerContext;

/// Header carrying the caller's identity, set by the upstream gateway.
pub const OWNER_HEADER: &str = "x-user-id";

pub const CONTENT_SECURITY_POLICY: &str = "default-src 'self'; \
     script-src 'self'; \
     style-src 'self'; \
     img-src 'self' data:; \
     font-src 'self'; \
     connect-src 'self'; \
     frame-ancestors 'none'; \
     base-uri 'self'; \
     form-action 'self'";

/// Resolve the owner from `X-User-Id` and attach it as [`OwnerContext`].
///
/// The identifier is trusted as given; a missing or blank header is 401.
pub async fn owner_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let owner_id = extract_owner(req.headers())?;
    req.extensions_mut().insert(OwnerContext::new(owner_id));

    Ok(next.run(req).await)
}

fn extract_owner(headers: &HeaderMap) -> Result<OwnerId, StatusCode> {
    let header = headers.get(OWNER_HEADER).ok_or(StatusCode::UNAUTHORIZED)?;
    let header = header.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?;

    OwnerId::new(header.trim()).map_err(|_| StatusCode::UNAUTHORIZED)
}

/// Add the security response headers to every response.
pub async fn security_headers(req: axum::http::Request<axum::body::Body>, next: Next) -> Response {
    let mut res = next.run(req).await;
    let headers = res.headers_mut();

    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(CONTENT_SECURITY_POLICY),
    );
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));

    res
}
