use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use ledgerflow_core::ExpectedVersion;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::CorrelationContext;

pub const NOT_FOUND_MESSAGE: &str = "not found (projection may be behind)";

pub fn router() -> Router {
    Router::new()
        .route("/:id", get(get_account))
        .route("/:id/timeline", get(get_timeline))
        .route("/:id/open", post(open_account))
        .route("/:id/deposit", post(deposit))
        .route("/:id/withdraw", post(withdraw))
}

pub async fn open_account(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(correlation): Extension<CorrelationContext>,
    Path(id): Path<String>,
    body: Result<Json<dto::OpenAccountRequest>, JsonRejection>,
) -> axum::response::Response {
    let account_id = match dto::parse_account_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let body = match dto::parse_body(body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .dispatcher()
        .open_account(
            account_id,
            body.owner,
            ExpectedVersion::exact(body.expected_version),
            correlation.into_inner(),
        )
        .await
    {
        Ok(outcome) => Json(dto::CommandResponse::from(outcome)).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn deposit(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(correlation): Extension<CorrelationContext>,
    Path(id): Path<String>,
    body: Result<Json<dto::MoneyRequest>, JsonRejection>,
) -> axum::response::Response {
    let account_id = match dto::parse_account_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let body = match dto::parse_body(body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .dispatcher()
        .deposit(
            account_id,
            body.amount,
            ExpectedVersion::exact(body.expected_version),
            correlation.into_inner(),
        )
        .await
    {
        Ok(outcome) => Json(dto::CommandResponse::from(outcome)).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn withdraw(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(correlation): Extension<CorrelationContext>,
    Path(id): Path<String>,
    body: Result<Json<dto::MoneyRequest>, JsonRejection>,
) -> axum::response::Response {
    let account_id = match dto::parse_account_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let body = match dto::parse_body(body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .dispatcher()
        .withdraw(
            account_id,
            body.amount,
            ExpectedVersion::exact(body.expected_version),
            correlation.into_inner(),
        )
        .await
    {
        Ok(outcome) => Json(dto::CommandResponse::from(outcome)).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

/// Projected account row. May trail the event store; `version` says how far.
pub async fn get_account(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let account_id = match dto::parse_account_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.read_model().get_account(&account_id).await {
        Ok(Some(account)) => Json(dto::AccountResponse {
            found: true,
            account,
        })
        .into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(dto::AccountNotFoundResponse {
                found: false,
                message: NOT_FOUND_MESSAGE,
            }),
        )
            .into_response(),
        Err(e) => errors::read_model_error_to_response(e),
    }
}

pub async fn get_timeline(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let account_id = match dto::parse_account_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.read_model().get_timeline(&account_id).await {
        Ok(items) => Json(dto::TimelineResponse { items }).into_response(),
        Err(e) => errors::read_model_error_to_response(e),
    }
}
