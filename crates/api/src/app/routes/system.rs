use std::sync::Arc;

use axum::{extract::Extension, Json};

use crate::app::{dto, errors};
use crate::app::services::AppServices;

pub async fn healthz() -> Json<dto::HealthResponse> {
    Json(dto::HealthResponse { ok: true })
}

/// Projector progress against the head of the event log.
pub async fn metrics(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    let lag = match services.read_model().projector_lag().await {
        Ok(lag) => lag,
        Err(e) => return errors::read_model_error_to_response(e),
    };
    let head_position = match services.event_store().head_position().await {
        Ok(head) => head,
        Err(e) => return errors::store_error_to_response(e),
    };

    axum::response::IntoResponse::into_response(Json(dto::MetricsResponse {
        cursor_position: lag.cursor_position,
        accounts_indexed: lag.accounts_indexed,
        head_position,
        lag: head_position.saturating_sub(lag.cursor_position),
    }))
}
