use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::routes::{AppError, AppState};

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Guard for mutating routes: `X-ADMIN-TOKEN` must equal the configured token byte for
/// byte. With no token configured every request passes.
pub async fn require_admin(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if state.admin_token.is_empty() {
        return next.run(request).await;
    }
    let supplied = request
        .headers()
        .get(ADMIN_TOKEN_HEADER)
        .map(|value| value.as_bytes())
        .unwrap_or_default();
    if supplied == state.admin_token.as_bytes() {
        next.run(request).await
    } else {
        tracing::warn!(path = %request.uri().path(), "rejected admin request");
        AppError::Unauthorized.into_response()
    }
}
