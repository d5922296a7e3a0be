use axum::response::IntoResponse;

use crate::APP_USER_AGENT;

// Undocumented build-info root, useful for smoke checks behind a proxy.
pub async fn root() -> impl IntoResponse {
    APP_USER_AGENT
}
